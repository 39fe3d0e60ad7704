mod collector;
mod config;
mod conntrack;
mod r#loop;
mod metrics;
mod provider;
mod resolver;
mod system;

use crate::collector::{Accumulator, CidrClassifier, SystemClock};
use crate::config::{CtrackConfig, ProviderSource};
use crate::conntrack::ProcConntrack;
use crate::metrics::{ConntrackCollector, LabelSchema};
use crate::provider::{DockerProvider, FixedProvider, KubernetesProvider, WorkloadProvider};
use crate::resolver::{DnsCache, NameResolver, NoopResolver};
use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

/// Exports per workload connection counts and byte counters
/// from the kernel conntrack table
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Path to the yaml config file
    #[arg(short, long, default_value = "ctrack.yaml")]
    config: PathBuf,
}

fn build_provider(source: &ProviderSource) -> anyhow::Result<Arc<dyn WorkloadProvider>> {
    let provider: Arc<dyn WorkloadProvider> = match source {
        ProviderSource::Static { workloads } => Arc::new(FixedProvider::new(workloads.clone())),
        ProviderSource::Kubernetes {
            node_name,
            label_selector,
        } => {
            let node_name = match node_name {
                Some(name) => name.clone(),
                None => std::env::var("NODE_NAME")
                    .context("Kubernetes provider requires node_name or the NODE_NAME env var")?,
            };
            Arc::new(KubernetesProvider::new(node_name, label_selector.clone()))
        }
        ProviderSource::Docker {
            endpoint,
            refresh_secs,
        } => Arc::new(DockerProvider::new(
            endpoint.clone(),
            Duration::from_secs(*refresh_secs),
        )),
    };

    Ok(provider)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = CtrackConfig::load(args.config.clone())
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;

    info!("Config {:?}", config);

    if let Err(e) = system::check_conntrack_accounting() {
        warn!("Could not check conntrack accounting: {:#}", e);
    }

    let provider = build_provider(&config.provider)?;
    provider
        .start()
        .await
        .context("Failed to start workload provider")?;

    let schema = LabelSchema::new(provider.kind(), &config.workload_labels)
        .context("Invalid workload_labels")?;
    let classifier = CidrClassifier::new(&config.cidrs, config.classifier_cache_size)
        .context("Invalid cidrs")?;

    let node_ips = if config.node.enabled {
        system::node_ips(&config.node.skip_interfaces)
    } else {
        HashSet::new()
    };

    let resolver: Arc<dyn NameResolver> = if config.dns.enabled {
        Arc::new(DnsCache::new(
            Duration::from_secs(config.dns.cache_ttl_secs),
            config.dns.cache_size,
        ))
    } else {
        Arc::new(NoopResolver)
    };

    let conntrack = ProcConntrack::new(
        config.conntrack.path.clone(),
        &config.conntrack.protocols,
        &config.conntrack.states,
    );

    let accumulator = Arc::new(Accumulator::new(
        Arc::new(SystemClock),
        config.ttl(),
        node_ips,
    ));
    let sweepers = r#loop::spawn_sweepers(&accumulator, config.ttl());

    let registry = prometheus::Registry::new();
    metrics::global::init(&registry).context("Failed to register process metrics")?;

    let collector = ConntrackCollector::new(
        provider.clone(),
        Arc::new(conntrack),
        accumulator,
        Arc::new(classifier),
        resolver,
        schema,
    )
    .context("Failed to build conntrack collector")?;
    registry
        .register(Box::new(collector))
        .context("Failed to register conntrack collector")?;

    let listen = config.listen_addr()?;
    let mut server = tokio::spawn(metrics::serve(registry, listen));

    info!(
        "Started ctrack ({} provider, ttl {:?}) on {}",
        provider.kind(),
        config.ttl(),
        listen
    );

    let ctrl_c = signal::ctrl_c();
    info!("Waiting for Ctrl-C...");

    tokio::select! {
        res = ctrl_c => res?,
        res = &mut server => {
            res.context("Metrics server panicked")??;
        }
    }
    info!("Beginning graceful shutdown...");

    server.abort();

    for sweeper in &sweepers {
        sweeper.stop();
    }
    info!("Sweep loops stopped");

    provider
        .shutdown()
        .await
        .context("Failed to shutdown workload provider")?;
    info!("Workload provider shutdown");

    info!("Graceful shutdown complete");

    Ok(())
}
