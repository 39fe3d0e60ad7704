use anyhow::{Context, Result, bail};
use config::Config;
use ctrack_common::consts::{
    DEFAULT_CLASSIFIER_CACHE_SIZE, DEFAULT_CONNTRACK_PATH, DEFAULT_DNS_CACHE_SIZE,
    DEFAULT_DNS_CACHE_TTL, DEFAULT_TTL, SKIP_IFACES,
};
use ctrack_common::types::Workload;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSource {
    Static {
        #[serde(default)]
        workloads: Vec<Workload>,
    },
    Kubernetes {
        /// Node whose pods are watched, falls back
        /// to the NODE_NAME environment variable
        #[serde(default)]
        node_name: Option<String>,
        #[serde(default)]
        label_selector: Option<String>,
    },
    Docker {
        /// Socket path or url of the engine, local defaults when unset
        #[serde(default)]
        endpoint: Option<String>,
        #[serde(default = "default_docker_refresh_secs")]
        refresh_secs: u64,
    },
}

const fn default_docker_refresh_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConntrackConfig {
    #[serde(default = "default_conntrack_path")]
    pub path: PathBuf,
    /// Protocols to report, empty reports all
    #[serde(default = "default_protocols")]
    pub protocols: Vec<String>,
    /// Connection states to report, empty reports all
    #[serde(default = "default_states")]
    pub states: Vec<String>,
}

impl Default for ConntrackConfig {
    fn default() -> Self {
        Self {
            path: default_conntrack_path(),
            protocols: default_protocols(),
            states: default_states(),
        }
    }
}

fn default_conntrack_path() -> PathBuf {
    DEFAULT_CONNTRACK_PATH.into()
}
fn default_protocols() -> Vec<String> {
    vec!["tcp".into()]
}
fn default_states() -> Vec<String> {
    vec!["ESTABLISHED".into(), "SYN_SENT".into()]
}

/// Reverse dns lookups for the destination_name label
#[derive(Debug, Clone, Deserialize)]
pub struct DnsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dns_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_dns_cache_size")]
    pub cache_size: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl_secs: default_dns_cache_ttl_secs(),
            cache_size: default_dns_cache_size(),
        }
    }
}

const fn default_dns_cache_ttl_secs() -> u64 {
    DEFAULT_DNS_CACHE_TTL.as_secs()
}
const fn default_dns_cache_size() -> u64 {
    DEFAULT_DNS_CACHE_SIZE
}

/// Reporting of connections owned by the host itself
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interfaces whose addresses are not node addresses, matched by
    /// exact name or by prefix when the entry ends in `*`
    #[serde(default = "default_skip_interfaces")]
    pub skip_interfaces: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            skip_interfaces: default_skip_interfaces(),
        }
    }
}

fn default_skip_interfaces() -> Vec<String> {
    SKIP_IFACES.iter().map(|p| p.to_string()).collect()
}

const fn default_true() -> bool {
    true
}

/// The user facing application config
#[derive(Debug, Clone, Deserialize)]
pub struct CtrackConfig {
    /// Address of the metrics endpoint
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Where workloads come from
    pub provider: ProviderSource,
    /// Workload label keys exported as label_<key>,
    /// anything else on a workload is dropped
    #[serde(default)]
    pub workload_labels: Vec<String>,
    /// CIDR to zone name, most specific match wins
    #[serde(default)]
    pub cidrs: HashMap<String, String>,
    /// How long a tuple or byte counter which is no longer
    /// observed keeps being reported, also the sweep interval
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_classifier_cache_size")]
    pub classifier_cache_size: u64,
    #[serde(default)]
    pub conntrack: ConntrackConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub node: NodeConfig,
}

fn default_listen() -> String {
    "0.0.0.0:9100".into()
}
const fn default_ttl_secs() -> u64 {
    DEFAULT_TTL.as_secs()
}
const fn default_classifier_cache_size() -> u64 {
    DEFAULT_CLASSIFIER_CACHE_SIZE
}

impl CtrackConfig {
    pub fn load(path: PathBuf) -> Result<CtrackConfig> {
        let config = Config::builder()
            .add_source(config::File::from(path.to_path_buf()))
            .build()
            .with_context(|| format!("Failed to read config {}", path.display()))?
            .try_deserialize::<CtrackConfig>()
            .with_context(|| format!("Invalid config {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.ttl_secs == 0 {
            bail!("ttl_secs must be greater than zero");
        }
        if let ProviderSource::Docker { refresh_secs: 0, .. } = self.provider {
            bail!("provider.docker.refresh_secs must be greater than zero");
        }
        if self.classifier_cache_size == 0 {
            bail!("classifier_cache_size must be greater than zero");
        }
        self.listen_addr()?;

        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .with_context(|| format!("Invalid listen address {}", self.listen))
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}
