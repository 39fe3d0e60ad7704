mod dns;

pub use dns::DnsCache;

use std::net::IpAddr;

/// Best effort reverse lookup used to label destinations,
/// an empty name means unknown
pub trait NameResolver: Send + Sync {
    fn resolve(&self, ip: IpAddr) -> String;
}

/// Resolver for when lookups are disabled
pub struct NoopResolver;

impl NameResolver for NoopResolver {
    fn resolve(&self, _ip: IpAddr) -> String {
        String::new()
    }
}
