use ctrack_common::CtrackErr;
use ipnet::IpNet;
use moka::sync::Cache;
use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Debug, Clone)]
struct ZoneRule {
    net: IpNet,
    label: String,
}

/// Maps addresses to coarse network zones by longest prefix match
/// over a fixed rule set. Answers, misses included, are memoized in
/// a bounded cache keyed by the literal input.
pub struct CidrClassifier {
    /// Most specific network first
    rules: Vec<ZoneRule>,
    cache: Cache<String, String>,
}

impl CidrClassifier {
    /// Builds the classifier from `cidr -> label` pairs, any malformed
    /// CIDR fails the whole construction
    pub fn new(cidrs: &HashMap<String, String>, cache_size: u64) -> Result<Self, CtrackErr> {
        let mut rules = cidrs
            .iter()
            .map(|(cidr, label)| {
                let net = cidr
                    .trim()
                    .parse::<IpNet>()
                    .map_err(|source| CtrackErr::InvalidCidr {
                        cidr: cidr.clone(),
                        source,
                    })?;

                Ok(ZoneRule {
                    net: net.trunc(),
                    label: label.clone(),
                })
            })
            .collect::<Result<Vec<_>, CtrackErr>>()?;

        // label breaks prefix ties so the order never depends on map iteration
        rules.sort_by(|a, b| {
            b.net
                .prefix_len()
                .cmp(&a.net.prefix_len())
                .then_with(|| a.label.cmp(&b.label))
        });

        Ok(Self {
            rules,
            cache: Cache::builder().max_capacity(cache_size).build(),
        })
    }

    /// Zone label of `ip`, empty when no rule matches or when
    /// `ip` is not an address at all
    pub fn classify(&self, ip: &str) -> String {
        if let Some(label) = self.cache.get(ip) {
            return label;
        }

        let label = match ip.parse::<IpAddr>() {
            // v4 mapped v6 input matches v4 rules
            Ok(addr) => self.lookup(addr.to_canonical()).to_string(),
            Err(_) => String::new(),
        };

        self.cache.insert(ip.to_string(), label.clone());
        label
    }

    pub fn classify_addr(&self, ip: IpAddr) -> String {
        self.classify(&ip.to_string())
    }

    pub fn is_cached(&self, ip: &str) -> bool {
        self.cache.contains_key(ip)
    }

    fn lookup(&self, addr: IpAddr) -> &str {
        self.rules
            .iter()
            .find(|rule| rule.net.contains(&addr))
            .map(|rule| rule.label.as_str())
            .unwrap_or_default()
    }
}
