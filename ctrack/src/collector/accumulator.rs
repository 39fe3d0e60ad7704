use crate::collector::clock::Clock;
use crate::collector::retention::RetentionRegistry;
use crate::collector::traffic::{TrafficCounter, TrafficState, TrafficValue};
use ctrack_common::net::Direction;
use ctrack_common::types::{AccumulatorKey, Conn, Destination, TrafficKey, Workload};
use log::{debug, trace};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Connections per tuple observed in a single scrape
pub type TupleCount = HashMap<AccumulatorKey, u64>;

/// Result of one accumulation pass, consumed by rendering
#[derive(Debug)]
pub struct Cycle {
    /// Counts built from this scrape's connections only
    pub counts: TupleCount,
    /// Every retained tuple with its count this cycle, zero when
    /// it was not observed
    pub tuples: Vec<(AccumulatorKey, u64)>,
    /// Byte totals, snapshotted under the same lock as this
    /// cycle's observations
    pub traffic: Vec<(TrafficKey, TrafficValue)>,
}

/// Correlates connections with workloads and the node, and owns all
/// state which outlives a scrape: retained tuples, the workloads
/// they belong to, and the byte counters.
pub struct Accumulator {
    clock: Arc<dyn Clock>,
    node_ips: HashSet<IpAddr>,
    tuples: RetentionRegistry<AccumulatorKey>,
    /// Last seen copy of each workload so retained tuples keep
    /// their labels while the workload is missing
    workloads: RetentionRegistry<String, Arc<Workload>>,
    traffic: TrafficCounter,
}

impl Accumulator {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration, node_ips: HashSet<IpAddr>) -> Self {
        Self {
            clock,
            node_ips,
            tuples: RetentionRegistry::new(ttl),
            workloads: RetentionRegistry::new(ttl),
            traffic: TrafficCounter::new(ttl),
        }
    }

    pub fn accumulate(&self, workloads: &[Workload], conns: &[Conn]) -> Cycle {
        let now = self.clock.now();
        let mut counts = TupleCount::new();

        let traffic = {
            let mut traffic = self.traffic.lock();

            for workload in workloads {
                for conn in conns {
                    let Some((destination, direction)) = correlate(conn, |ip| ip == workload.ip) else {
                        continue;
                    };
                    record(&mut counts, &mut traffic, Some(&workload.name), conn, destination, direction, now);
                }

                self.workloads
                    .upsert(workload.name.clone(), Arc::new(workload.clone()), now);
            }

            if !self.node_ips.is_empty() {
                for conn in conns {
                    let Some((destination, direction)) = correlate(conn, |ip| self.node_ips.contains(&ip)) else {
                        continue;
                    };
                    record(&mut counts, &mut traffic, None, conn, destination, direction, now);
                }
            }

            traffic.snapshot()
        };

        for key in counts.keys() {
            self.tuples.upsert(key.clone(), (), now);
        }

        let tuples = self
            .tuples
            .snapshot()
            .into_iter()
            .map(|key| {
                let count = counts.get(&key).copied().unwrap_or(0);
                (key, count)
            })
            .collect();

        debug!(
            "Accumulated {} tuples from {} workloads x {} conns ({} retained, {} traffic keys)",
            counts.len(),
            workloads.len(),
            conns.len(),
            self.tuples.len(),
            traffic.len()
        );

        Cycle {
            counts,
            tuples,
            traffic,
        }
    }

    /// Workload as last seen by [`Accumulator::accumulate`]
    pub fn workload(&self, name: &str) -> Option<Arc<Workload>> {
        self.workloads.get(&name.to_string())
    }

    /// Evicts stale tuples and the workloads remembered for them
    pub fn sweep_tuples(&self) -> usize {
        let now = self.clock.now();
        let evicted = self.tuples.sweep(now);
        let workloads = self.workloads.sweep(now);
        trace!("Swept {} tuples and {} workloads", evicted, workloads);
        evicted
    }

    pub fn sweep_traffic(&self) -> usize {
        let evicted = self.traffic.sweep(self.clock.now());
        trace!("Swept {} traffic keys", evicted);
        evicted
    }
}

/// Direction and attributable destination of `conn` from the point of
/// view of whoever owns the addresses matched by `owns`
fn correlate(conn: &Conn, owns: impl Fn(IpAddr) -> bool) -> Option<(Destination, Direction)> {
    if owns(conn.origin_ip) {
        Some((Destination::remote(conn.dest_ip, conn.dest_port), Direction::Outgoing))
    } else if owns(conn.dest_ip) {
        Some((Destination::local_port(conn.dest_port), Direction::Incoming))
    } else {
        None
    }
}

fn record(
    counts: &mut TupleCount,
    traffic: &mut TrafficState,
    workload: Option<&str>,
    conn: &Conn,
    destination: Destination,
    direction: Direction,
    now: Instant,
) {
    let key = AccumulatorKey {
        workload: workload.map(str::to_string),
        state: conn.state.clone(),
        protocol: conn.protocol.clone(),
        destination,
        direction,
    };

    traffic.observe(TrafficKey::from(&key), conn.id, conn.origin_bytes, conn.reply_bytes, now);
    *counts.entry(key).or_insert(0) += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::clock::ManualClock;

    const TTL: Duration = Duration::from_secs(120);

    fn conn(id: u64, origin: &str, dest: &str, dport: u16) -> Conn {
        Conn {
            id,
            origin_ip: origin.parse().unwrap(),
            origin_port: 33404,
            dest_ip: dest.parse().unwrap(),
            dest_port: dport,
            protocol: "tcp".into(),
            state: "ESTABLISHED".into(),
            origin_bytes: 0,
            reply_bytes: 0,
        }
    }

    fn workload() -> Workload {
        Workload::new("my-container1", "10.10.1.2".parse().unwrap()).with_label("app", "app1")
    }

    fn key(dest: Destination, direction: Direction) -> AccumulatorKey {
        AccumulatorKey {
            workload: Some("my-container1".into()),
            state: "ESTABLISHED".into(),
            protocol: "tcp".into(),
            destination: dest,
            direction,
        }
    }

    fn alice() -> AccumulatorKey {
        key(
            Destination::remote("192.168.50.4".parse().unwrap(), 2375),
            Direction::Outgoing,
        )
    }

    fn count_of(cycle: &Cycle, key: &AccumulatorKey) -> Option<u64> {
        cycle.tuples.iter().find(|(k, _)| k == key).map(|(_, c)| *c)
    }

    fn accumulator(clock: Arc<ManualClock>) -> Accumulator {
        Accumulator::new(clock, TTL, HashSet::new())
    }

    #[test]
    fn correlates_outgoing_and_incoming() {
        let acc = accumulator(Arc::new(ManualClock::new()));
        let conns = vec![
            conn(1, "10.100.1.2", "192.165.50.4", 443),
            conn(2, "10.10.1.2", "192.168.50.4", 2375),
            conn(3, "10.10.1.2", "192.168.50.4", 2375),
            conn(4, "10.10.1.2", "192.168.50.5", 2376),
            conn(5, "192.168.50.5", "10.10.1.2", 7070),
        ];

        let cycle = acc.accumulate(&[workload()], &conns);

        assert_eq!(cycle.counts.len(), 3);
        assert_eq!(cycle.counts[&alice()], 2);
        assert_eq!(
            cycle.counts[&key(
                Destination::remote("192.168.50.5".parse().unwrap(), 2376),
                Direction::Outgoing
            )],
            1
        );
        assert_eq!(
            cycle.counts[&key(Destination::local_port(7070), Direction::Incoming)],
            1
        );
    }

    #[test]
    fn unseen_tuple_renders_zero_until_ttl() {
        let clock = Arc::new(ManualClock::new());
        let acc = accumulator(clock.clone());
        let w = workload();

        let first = acc.accumulate(
            &[w.clone()],
            &[
                conn(1, "10.10.1.2", "192.168.50.4", 2375),
                conn(2, "10.10.1.2", "192.168.50.4", 2375),
            ],
        );
        assert_eq!(count_of(&first, &alice()), Some(2));

        clock.advance(Duration::from_secs(30));
        let second = acc.accumulate(&[w.clone()], &[]);
        assert!(second.counts.is_empty());
        assert_eq!(count_of(&second, &alice()), Some(0));

        clock.advance(TTL);
        acc.sweep_tuples();
        let third = acc.accumulate(&[w], &[]);
        assert_eq!(count_of(&third, &alice()), None);
    }

    #[test]
    fn sweep_within_ttl_keeps_tuple() {
        let clock = Arc::new(ManualClock::new());
        let acc = accumulator(clock.clone());
        acc.accumulate(&[workload()], &[conn(1, "10.10.1.2", "192.168.50.4", 2375)]);

        clock.advance(TTL);
        assert_eq!(acc.sweep_tuples(), 0);
        let cycle = acc.accumulate(&[], &[]);
        assert_eq!(count_of(&cycle, &alice()), Some(0));
    }

    #[test]
    fn missing_workload_keeps_labels_until_evicted() {
        let clock = Arc::new(ManualClock::new());
        let acc = accumulator(clock.clone());
        acc.accumulate(&[workload()], &[conn(1, "10.10.1.2", "192.168.50.4", 2375)]);

        clock.advance(Duration::from_secs(10));
        let cycle = acc.accumulate(&[], &[conn(1, "10.10.1.2", "192.168.50.4", 2375)]);
        assert_eq!(count_of(&cycle, &alice()), Some(0));

        let remembered = acc.workload("my-container1").unwrap();
        assert_eq!(remembered.labels["app"], "app1");

        clock.advance(TTL * 2);
        acc.sweep_tuples();
        assert!(acc.workload("my-container1").is_none());
    }

    #[test]
    fn node_pass_attributes_host_connections() {
        let clock = Arc::new(ManualClock::new());
        let node_ips = HashSet::from(["10.0.0.5".parse().unwrap()]);
        let acc = Accumulator::new(clock, TTL, node_ips);

        let cycle = acc.accumulate(
            &[],
            &[
                conn(1, "10.0.0.5", "1.1.1.1", 53),
                conn(2, "172.16.0.9", "10.0.0.5", 22),
                conn(3, "172.16.0.9", "172.16.0.10", 22),
            ],
        );

        assert_eq!(cycle.counts.len(), 2);
        assert!(cycle.counts.keys().all(|k| k.workload.is_none()));
        assert!(cycle.counts.contains_key(&AccumulatorKey {
            workload: None,
            state: "ESTABLISHED".into(),
            protocol: "tcp".into(),
            destination: Destination::local_port(22),
            direction: Direction::Incoming,
        }));
    }

    #[test]
    fn traffic_is_keyed_without_state() {
        let clock = Arc::new(ManualClock::new());
        let acc = accumulator(clock.clone());

        let mut established = conn(1, "10.10.1.2", "192.168.50.4", 2375);
        established.origin_bytes = 100;
        established.reply_bytes = 1000;
        let mut syn_sent = conn(2, "10.10.1.2", "192.168.50.4", 2375);
        syn_sent.state = "SYN_SENT".into();
        syn_sent.origin_bytes = 60;

        let cycle = acc.accumulate(&[workload()], &[established.clone(), syn_sent]);
        assert_eq!(cycle.counts.len(), 2);
        assert_eq!(cycle.traffic.len(), 1);
        assert_eq!(cycle.traffic[0].1.totals.origin_bytes, 160);
        assert_eq!(cycle.traffic[0].1.totals.reply_bytes, 1000);

        clock.advance(Duration::from_secs(5));
        established.origin_bytes = 150;
        let cycle = acc.accumulate(&[workload()], &[established]);
        assert_eq!(cycle.traffic[0].1.totals.origin_bytes, 210);

        clock.advance(TTL * 2);
        assert_eq!(acc.sweep_traffic(), 1);
    }
}
