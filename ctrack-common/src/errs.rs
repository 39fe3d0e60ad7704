use thiserror::Error;

#[derive(Debug, Error)]
pub enum CtrackErr {
    /// A configured zone CIDR could not be parsed,
    /// fatal at classifier construction
    #[error("invalid CIDR '{cidr}': {source}")]
    InvalidCidr {
        cidr: String,
        #[source]
        source: ipnet::AddrParseError,
    },
    /// Two workload label keys collapse to the same
    /// metric label name once sanitized
    #[error("workload labels collide on sanitized name '{0}'")]
    DuplicateLabel(String),
    /// A conntrack table line missing a required field
    #[error("malformed conntrack entry, {0}")]
    MalformedConn(&'static str),
}
