use crate::collector::{Accumulator, CidrClassifier, Cycle};
use crate::conntrack::ConnectionSource;
use crate::metrics::global;
use crate::metrics::schema::LabelSchema;
use crate::provider::WorkloadProvider;
use crate::resolver::NameResolver;
use anyhow::Result;
use ctrack_common::types::{Destination, Workload};
use log::{debug, error, trace, warn};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{IntCounterVec, IntGaugeVec, Opts};
use std::sync::Arc;

/// The exported families, rebuilt from scratch on every scrape so
/// series that left retention disappear with them
struct Families {
    workload_connections: IntGaugeVec,
    node_connections: IntGaugeVec,
    workload_origin_bytes: IntCounterVec,
    workload_reply_bytes: IntCounterVec,
    node_origin_bytes: IntCounterVec,
    node_reply_bytes: IntCounterVec,
}

impl Families {
    fn new(schema: &LabelSchema) -> prometheus::Result<Self> {
        let connection_labels = schema.connection_label_names();
        let workload_connection_labels = as_strs(&connection_labels);
        let node_connection_labels = &workload_connection_labels[schema.workload_label_names().len()..];

        let bytes_labels = schema.bytes_label_names();
        let workload_bytes_labels = as_strs(&bytes_labels);
        let node_bytes_labels = &workload_bytes_labels[schema.workload_label_names().len()..];

        Ok(Self {
            workload_connections: IntGaugeVec::new(
                Opts::new(
                    "conntrack_workload_connections",
                    "Number of workload connections by destination, state and direction",
                ),
                &workload_connection_labels,
            )?,
            node_connections: IntGaugeVec::new(
                Opts::new(
                    "conntrack_node_connections",
                    "Number of node connections by destination, state and direction",
                ),
                node_connection_labels,
            )?,
            workload_origin_bytes: IntCounterVec::new(
                Opts::new("conntrack_workload_origin_bytes_total", "Number of origin bytes"),
                &workload_bytes_labels,
            )?,
            workload_reply_bytes: IntCounterVec::new(
                Opts::new("conntrack_workload_reply_bytes_total", "Number of reply bytes"),
                &workload_bytes_labels,
            )?,
            node_origin_bytes: IntCounterVec::new(
                Opts::new("conntrack_node_origin_bytes_total", "Number of origin bytes"),
                node_bytes_labels,
            )?,
            node_reply_bytes: IntCounterVec::new(
                Opts::new("conntrack_node_reply_bytes_total", "Number of reply bytes"),
                node_bytes_labels,
            )?,
        })
    }

    fn desc(&self) -> Vec<&Desc> {
        let mut descs = Vec::new();
        descs.extend(self.workload_connections.desc());
        descs.extend(self.node_connections.desc());
        descs.extend(self.workload_origin_bytes.desc());
        descs.extend(self.workload_reply_bytes.desc());
        descs.extend(self.node_origin_bytes.desc());
        descs.extend(self.node_reply_bytes.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let mut families = Vec::new();
        families.extend(self.workload_connections.collect());
        families.extend(self.node_connections.collect());
        families.extend(self.workload_origin_bytes.collect());
        families.extend(self.workload_reply_bytes.collect());
        families.extend(self.node_origin_bytes.collect());
        families.extend(self.node_reply_bytes.collect());
        families
    }
}

fn as_strs(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}

/// Rendered destination, its resolved name and its zone. Name and
/// zone stay empty when the remote address is not attributed
struct DestinationLabels {
    destination: String,
    name: String,
    zone: String,
}

/// Runs one scrape per collection: lists workloads and connections,
/// feeds them to the accumulator and renders what it retains.
pub struct ConntrackCollector {
    provider: Arc<dyn WorkloadProvider>,
    conntrack: Arc<dyn ConnectionSource>,
    accumulator: Arc<Accumulator>,
    classifier: Arc<CidrClassifier>,
    resolver: Arc<dyn NameResolver>,
    schema: LabelSchema,
    /// Never filled, only describes the families for registration
    template: Families,
}

impl ConntrackCollector {
    pub fn new(
        provider: Arc<dyn WorkloadProvider>,
        conntrack: Arc<dyn ConnectionSource>,
        accumulator: Arc<Accumulator>,
        classifier: Arc<CidrClassifier>,
        resolver: Arc<dyn NameResolver>,
        schema: LabelSchema,
    ) -> Result<Self> {
        let template = Families::new(&schema)?;

        Ok(Self {
            provider,
            conntrack,
            accumulator,
            classifier,
            resolver,
            schema,
            template,
        })
    }

    /// Performs a scrape. Source failures are logged and the scrape goes
    /// on with nothing from that source, retained series decay to zero
    pub fn scrape(&self) -> Vec<MetricFamily> {
        let workloads = match self.provider.get_workloads() {
            Ok(workloads) => {
                global::record_workload_fetch(true);
                workloads
            }
            Err(e) => {
                global::record_workload_fetch(false);
                warn!("Failed to fetch workloads: {:#}", e);
                Vec::new()
            }
        };

        let conns = match self.conntrack.list() {
            Ok(conns) => conns,
            Err(e) => {
                global::record_conntrack_failure();
                warn!("Failed to fetch connections: {:#}", e);
                Vec::new()
            }
        };

        let cycle = self.accumulator.accumulate(&workloads, &conns);
        debug!(
            "Scrape observed {} tuples, rendering {} tuples and {} traffic keys",
            cycle.counts.len(),
            cycle.tuples.len(),
            cycle.traffic.len()
        );

        let families = match Families::new(&self.schema) {
            Ok(families) => families,
            Err(e) => {
                error!("Failed to build metric families: {}", e);
                return Vec::new();
            }
        };

        self.render_connections(&cycle, &families);
        self.render_traffic(&cycle, &families);

        families.collect()
    }

    fn render_connections(&self, cycle: &Cycle, families: &Families) {
        for (key, count) in &cycle.tuples {
            let dest = self.destination_labels(&key.destination);
            let tail = [
                key.state.as_str(),
                key.protocol.as_str(),
                dest.destination.as_str(),
                dest.name.as_str(),
                dest.zone.as_str(),
                key.direction.as_str(),
            ];

            let gauge = match &key.workload {
                Some(name) => {
                    let Some(workload) = self.accumulator.workload(name) else {
                        trace!("Skipping tuple of unknown workload {}", name);
                        continue;
                    };
                    let values = self.workload_values(&workload, &tail);
                    families
                        .workload_connections
                        .get_metric_with_label_values(&as_strs(&values))
                }
                None => families.node_connections.get_metric_with_label_values(&tail),
            };

            match gauge {
                Ok(gauge) => gauge.set(i64::try_from(*count).unwrap_or(i64::MAX)),
                Err(e) => warn!("Dropping connection sample {:?}: {}", key, e),
            }
        }
    }

    fn render_traffic(&self, cycle: &Cycle, families: &Families) {
        for (key, value) in &cycle.traffic {
            let dest = self.destination_labels(&key.destination);
            let tail = [
                dest.destination.as_str(),
                dest.name.as_str(),
                dest.zone.as_str(),
                key.direction.as_str(),
            ];

            let counters = match &key.workload {
                Some(name) => {
                    let Some(workload) = self.accumulator.workload(name) else {
                        trace!("Skipping traffic of unknown workload {}", name);
                        continue;
                    };
                    let values = self.workload_values(&workload, &tail);
                    let values = as_strs(&values);
                    families
                        .workload_origin_bytes
                        .get_metric_with_label_values(&values)
                        .and_then(|origin| {
                            families
                                .workload_reply_bytes
                                .get_metric_with_label_values(&values)
                                .map(|reply| (origin, reply))
                        })
                }
                None => families
                    .node_origin_bytes
                    .get_metric_with_label_values(&tail)
                    .and_then(|origin| {
                        families
                            .node_reply_bytes
                            .get_metric_with_label_values(&tail)
                            .map(|reply| (origin, reply))
                    }),
            };

            match counters {
                Ok((origin, reply)) => {
                    origin.inc_by(value.totals.origin_bytes);
                    reply.inc_by(value.totals.reply_bytes);
                }
                Err(e) => warn!("Dropping traffic sample {:?}: {}", key, e),
            }
        }
    }

    fn workload_values(&self, workload: &Workload, tail: &[&str]) -> Vec<String> {
        let mut values = self.schema.workload_values(workload);
        values.extend(tail.iter().map(|v| v.to_string()));
        values
    }

    fn destination_labels(&self, destination: &Destination) -> DestinationLabels {
        let (name, zone) = match destination.ip {
            Some(ip) => (self.resolver.resolve(ip), self.classifier.classify_addr(ip)),
            None => (String::new(), String::new()),
        };

        DestinationLabels {
            destination: destination.to_string(),
            name,
            zone,
        }
    }
}

impl Collector for ConntrackCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.template.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.scrape()
    }
}
