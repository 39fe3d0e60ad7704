use std::time::Duration;

/// How long an unobserved tuple or byte counter stays visible
/// before it is dropped, also the sweep interval
pub const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60);

/// Upper bound of ip -> zone entries memoized by the classifier
pub const DEFAULT_CLASSIFIER_CACHE_SIZE: u64 = 65_536;

pub const DEFAULT_DNS_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_DNS_CACHE_SIZE: u64 = 65_536;

pub const DEFAULT_CONNTRACK_PATH: &str = "/proc/net/nf_conntrack";

/// Interfaces which never carry node-owned addresses (container veths,
/// bridges, loopback, node local dns). A trailing `*` matches by prefix
pub const SKIP_IFACES: &[&str] = &["cali*", "docker*", "lo", "nodelocaldns"];

/// Prefix prepended to every sanitized workload label key
pub const WORKLOAD_LABEL_PREFIX: &str = "label_";
