use crate::net::Direction;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// A named, ip addressable unit whose traffic is attributed,
/// e.g. a pod or a container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Workload {
    pub name: String,
    pub ip: IpAddr,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Workload {
    pub fn new(name: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            name: name.into(),
            ip,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// One entry of the kernel connection tracking table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conn {
    /// Kernel supplied id, only unique while the entry is alive.
    /// Tables without ids get a 64 bit hash of the origin tuple
    pub id: u64,
    pub origin_ip: IpAddr,
    pub origin_port: u16,
    pub dest_ip: IpAddr,
    pub dest_port: u16,
    pub protocol: String,
    pub state: String,
    /// Bytes sent by the initiator since the entry was created
    pub origin_bytes: u64,
    /// Bytes sent by the responder since the entry was created
    pub reply_bytes: u64,
}

/// Remote end of a connection as seen by its owner. Incoming
/// connections only keep the listening port, peers are not attributed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Destination {
    pub ip: Option<IpAddr>,
    pub port: u16,
}

impl Destination {
    pub fn remote(ip: IpAddr, port: u16) -> Self {
        Self { ip: Some(ip), port }
    }

    pub fn local_port(port: u16) -> Self {
        Self { ip: None, port }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            Some(ip) => SocketAddr::new(ip, self.port).fmt(f),
            None => write!(f, ":{}", self.port),
        }
    }
}

/// Identity of one observable traffic tuple. A `None` workload
/// attributes the tuple to the node itself
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccumulatorKey {
    pub workload: Option<String>,
    pub state: String,
    pub protocol: String,
    pub destination: Destination,
    pub direction: Direction,
}

/// Identity for byte accounting, coarser than [`AccumulatorKey`]
/// since totals do not depend on tcp state transitions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrafficKey {
    pub workload: Option<String>,
    pub destination: Destination,
    pub direction: Direction,
}

impl From<&AccumulatorKey> for TrafficKey {
    fn from(key: &AccumulatorKey) -> Self {
        TrafficKey {
            workload: key.workload.clone(),
            destination: key.destination,
            direction: key.direction,
        }
    }
}

/// Cumulative byte totals of one [`TrafficKey`], never
/// decreasing while the key is retained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrafficTotals {
    pub origin_bytes: u64,
    pub reply_bytes: u64,
}
