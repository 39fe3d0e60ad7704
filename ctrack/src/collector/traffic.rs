use crate::collector::retention::is_stale;
use ctrack_common::types::{TrafficKey, TrafficTotals};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Cumulative totals of one traffic key plus when it was last fed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficValue {
    pub totals: TrafficTotals,
    pub last_seen: Instant,
}

/// Raw kernel counters of one conntrack entry as last observed
#[derive(Debug, Clone, Copy)]
struct PreviousConn {
    origin_bytes: u64,
    reply_bytes: u64,
    last_seen: Instant,
}

/// Turns per-connection byte counters, which restart at zero whenever
/// an entry is replaced, into never decreasing totals per traffic key.
///
/// Connection ids are only unique while the kernel entry lives. An id
/// reused within the ttl window is read as a continuation of the old
/// entry, its bytes only count once they exceed the old raw value.
#[derive(Debug, Default)]
pub struct TrafficState {
    totals: HashMap<TrafficKey, TrafficValue>,
    previous: HashMap<u64, PreviousConn>,
}

impl TrafficState {
    /// Folds one raw observation of connection `id` into the totals of `key`
    pub fn observe(&mut self, key: TrafficKey, id: u64, origin_bytes: u64, reply_bytes: u64, now: Instant) {
        let (origin_delta, reply_delta) = match self.previous.get(&id) {
            // a decrease means the entry was replaced, it adds nothing
            Some(prev) => (
                origin_bytes.saturating_sub(prev.origin_bytes),
                reply_bytes.saturating_sub(prev.reply_bytes),
            ),
            // first sighting, whatever it already moved is new to us
            None => (origin_bytes, reply_bytes),
        };

        let value = self.totals.entry(key).or_insert(TrafficValue {
            totals: TrafficTotals::default(),
            last_seen: now,
        });
        value.totals.origin_bytes = value.totals.origin_bytes.saturating_add(origin_delta);
        value.totals.reply_bytes = value.totals.reply_bytes.saturating_add(reply_delta);
        value.last_seen = now;

        self.previous.insert(
            id,
            PreviousConn {
                origin_bytes,
                reply_bytes,
                last_seen: now,
            },
        );
    }

    pub fn snapshot(&self) -> Vec<(TrafficKey, TrafficValue)> {
        self.totals
            .iter()
            .map(|(key, value)| (key.clone(), *value))
            .collect()
    }

    /// Evicts totals and per-connection state older than `ttl`,
    /// returns the number of evicted traffic keys
    pub fn sweep(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.totals.len();
        self.totals
            .retain(|_, value| !is_stale(value.last_seen, ttl, now));
        self.previous
            .retain(|_, prev| !is_stale(prev.last_seen, ttl, now));
        before - self.totals.len()
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}

/// Shared, mutex guarded [`TrafficState`]. Scrapes take the lock once for
/// the whole observe-then-snapshot section so a rendered snapshot never
/// interleaves with another scrape's observations.
#[derive(Debug)]
pub struct TrafficCounter {
    state: Mutex<TrafficState>,
    ttl: Duration,
}

impl TrafficCounter {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(TrafficState::default()),
            ttl,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, TrafficState> {
        self.state.lock()
    }

    pub fn observe(&self, key: TrafficKey, id: u64, origin_bytes: u64, reply_bytes: u64, now: Instant) {
        self.lock().observe(key, id, origin_bytes, reply_bytes, now);
    }

    pub fn snapshot(&self) -> Vec<(TrafficKey, TrafficValue)> {
        self.lock().snapshot()
    }

    pub fn sweep(&self, now: Instant) -> usize {
        self.lock().sweep(now, self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrack_common::net::Direction;
    use ctrack_common::types::Destination;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(120);

    fn key() -> TrafficKey {
        TrafficKey {
            workload: None,
            destination: Destination::remote("10.1.1.1".parse().unwrap(), 8000),
            direction: Direction::Outgoing,
        }
    }

    fn totals(counter: &TrafficCounter) -> TrafficTotals {
        let items = counter.snapshot();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].0, key());
        items[0].1.totals
    }

    #[test]
    fn first_observation_counts_in_full() {
        let counter = TrafficCounter::new(TTL);
        counter.observe(key(), 10, 10, 10, Instant::now());

        assert_eq!(
            totals(&counter),
            TrafficTotals {
                origin_bytes: 10,
                reply_bytes: 10
            }
        );
    }

    #[test]
    fn distinct_connections_add_up() {
        let now = Instant::now();
        let counter = TrafficCounter::new(TTL);
        counter.observe(key(), 10, 10, 10, now);
        counter.observe(key(), 11, 110, 110, now);
        counter.observe(key(), 10, 100, 100, now);

        let t = totals(&counter);
        assert_eq!(t.origin_bytes, 210);
        assert_eq!(t.reply_bytes, 210);
    }

    #[test]
    fn decrease_is_ignored_then_growth_counts_from_new_base() {
        let t0 = Instant::now();
        let counter = TrafficCounter::new(TTL);
        counter.observe(key(), 10, 10, 10, t0);
        counter.observe(key(), 10, 9, 9, t0 + Duration::from_secs(1));

        let t = totals(&counter);
        assert_eq!((t.origin_bytes, t.reply_bytes), (10, 10));

        counter.observe(key(), 10, 30, 30, t0 + Duration::from_secs(2));
        let t = totals(&counter);
        assert_eq!((t.origin_bytes, t.reply_bytes), (31, 31));
    }

    #[test]
    fn origin_and_reply_are_independent() {
        let now = Instant::now();
        let counter = TrafficCounter::new(TTL);
        counter.observe(key(), 1, 100, 50, now);
        counter.observe(key(), 1, 90, 80, now);

        let t = totals(&counter);
        assert_eq!((t.origin_bytes, t.reply_bytes), (100, 80));
    }

    #[test]
    fn totals_never_decrease() {
        let now = Instant::now();
        let counter = TrafficCounter::new(TTL);
        let raws = [5u64, 3, 0, 17, 17, 2, u64::MAX, 1, 40];
        let mut last = TrafficTotals::default();

        for (i, raw) in raws.iter().enumerate() {
            counter.observe(key(), (i % 3) as u64, *raw, *raw, now);
            let t = totals(&counter);
            assert!(t.origin_bytes >= last.origin_bytes);
            assert!(t.reply_bytes >= last.reply_bytes);
            last = t;
        }
    }

    #[test]
    fn sweep_drops_stale_totals_and_connection_state() {
        let start = Instant::now();
        let counter = TrafficCounter::new(TTL);
        counter.observe(key(), 10, 10, 10, start);
        counter.observe(key(), 10, 9, 9, start);

        assert_eq!(counter.sweep(start + Duration::from_secs(3600)), 1);
        assert!(counter.snapshot().is_empty());

        // connection state went too, so the id counts in full again
        counter.observe(key(), 10, 9, 9, start + Duration::from_secs(3601));
        assert_eq!(totals(&counter).origin_bytes, 9);
    }

    #[test]
    fn sweep_keeps_recent_keys() {
        let start = Instant::now();
        let counter = TrafficCounter::new(TTL);
        counter.observe(key(), 1, 1, 1, start);

        assert_eq!(counter.sweep(start + TTL), 0);
        assert_eq!(counter.lock().len(), 1);
    }

    #[test]
    fn ids_sharing_low_bits_stay_apart() {
        let start = Instant::now();
        let counter = TrafficCounter::new(TTL);
        let a = 1_127_313_933u64;
        let b = a | (1 << 40);

        // constant raw counters, nothing moved after the first scrape
        for scrape in 0..5 {
            let now = start + Duration::from_secs(scrape);
            counter.observe(key(), a, 1000, 1000, now);
            counter.observe(key(), b, 10, 10, now);
        }

        let t = totals(&counter);
        assert_eq!((t.origin_bytes, t.reply_bytes), (1010, 1010));
    }

    #[test]
    fn concurrent_observe_and_sweep() {
        let start = Instant::now() + Duration::from_secs(3600);
        let counter = Arc::new(TrafficCounter::new(TTL));
        let live = |t: u64| TrafficKey {
            workload: Some(format!("w{t}")),
            destination: Destination::remote("10.1.1.1".parse().unwrap(), 8000),
            direction: Direction::Outgoing,
        };

        let writers: Vec<_> = (0..4u64)
            .map(|t| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for raw in 0..1000u64 {
                        counter.observe(live(t), t, raw, raw * 2, start);
                        // short lived entries which the sweeper may drop at any time
                        counter.observe(key(), 100 + t, raw, raw, start - TTL * 2);
                    }
                })
            })
            .collect();

        let sweeper = {
            let counter = counter.clone();
            std::thread::spawn(move || {
                let mut seen: HashMap<TrafficKey, TrafficTotals> = HashMap::new();
                for _ in 0..200 {
                    counter.sweep(start);
                    for (k, v) in counter.snapshot() {
                        if k == key() {
                            continue;
                        }
                        let last = seen.entry(k).or_default();
                        assert!(v.totals.origin_bytes >= last.origin_bytes);
                        assert!(v.totals.reply_bytes >= last.reply_bytes);
                        *last = v.totals;
                    }
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        sweeper.join().unwrap();

        counter.sweep(start);
        let snapshot = counter.snapshot();
        assert_eq!(snapshot.len(), 4);
        for (_, v) in snapshot {
            assert_eq!(v.totals.origin_bytes, 999);
            assert_eq!(v.totals.reply_bytes, 1998);
        }
    }
}
