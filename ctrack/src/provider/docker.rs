use crate::provider::WorkloadProvider;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::ContainerInspectResponse;
use ctrack_common::types::Workload;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Containers as of the last refresh
#[derive(Debug, Default)]
struct ContainerStore {
    workloads: Vec<Workload>,
    listed: bool,
    /// Why the last refresh failed, cleared by the next good one
    error: Option<String>,
}

/// Lists the running containers of a docker engine
pub struct DockerProvider {
    endpoint: Option<String>,
    refresh: Duration,
    store: Arc<RwLock<ContainerStore>>,
    /// Handle to the refresh task
    refresh_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DockerProvider {
    pub fn new(endpoint: Option<String>, refresh: Duration) -> Self {
        Self {
            endpoint,
            refresh,
            store: Arc::new(RwLock::new(ContainerStore::default())),
            refresh_handle: Mutex::new(None),
        }
    }

    fn connect(&self) -> Result<Docker> {
        let docker = match self.endpoint.as_deref() {
            None => Docker::connect_with_local_defaults(),
            Some(url) if url.starts_with("tcp://") || url.starts_with("http://") => {
                Docker::connect_with_http(url, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
            }
            Some(path) => Docker::connect_with_socket(
                path.trim_start_matches("unix://"),
                CONNECT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            ),
        };

        docker.with_context(|| {
            format!(
                "Failed to connect to docker at {}",
                self.endpoint.as_deref().unwrap_or("local defaults")
            )
        })
    }

    /// Workload of an inspected container, none when it has no
    /// address of its own (host network, no network)
    fn extract_container_workload(container: &ContainerInspectResponse) -> Option<Workload> {
        let name = container.name.as_deref()?.trim_start_matches('/');
        if name.is_empty() {
            return None;
        }

        let settings = container.network_settings.as_ref()?;
        let primary = settings.ip_address.as_deref().filter(|ip| !ip.is_empty());
        let ip = match primary {
            Some(ip) => ip.to_string(),
            None => {
                let mut networks: Vec<_> = settings.networks.iter().flatten().collect();
                networks.sort_by(|a, b| a.0.cmp(b.0));
                networks
                    .into_iter()
                    .filter_map(|(_, endpoint)| endpoint.ip_address.clone())
                    .find(|ip| !ip.is_empty())?
            }
        };
        let ip = ip.parse::<IpAddr>().ok()?;

        let labels = container
            .config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default()
            .into_iter()
            .collect();

        Some(Workload {
            name: name.to_string(),
            ip,
            labels,
        })
    }

    async fn list_containers(docker: &Docker) -> Result<Vec<Workload>> {
        let options = ListContainersOptions::<String> {
            filters: HashMap::from([("status".to_string(), vec!["running".to_string()])]),
            ..Default::default()
        };
        let summaries = docker
            .list_containers(Some(options))
            .await
            .context("Failed to list containers")?;

        let mut workloads = Vec::with_capacity(summaries.len());
        for id in summaries.into_iter().filter_map(|s| s.id) {
            let container = docker
                .inspect_container(&id, None::<InspectContainerOptions>)
                .await
                .with_context(|| format!("Failed to inspect container {}", id))?;

            match Self::extract_container_workload(&container) {
                Some(workload) => workloads.push(workload),
                None => debug!("Skipping container {} without an address", id),
            }
        }

        Ok(workloads)
    }

    async fn refresh_store(docker: &Docker, store: &RwLock<ContainerStore>) {
        let listed = Self::list_containers(docker).await;

        let mut store = store.write();
        match listed {
            Ok(workloads) => {
                if !store.listed || store.workloads.len() != workloads.len() {
                    debug!("Listed {} containers", workloads.len());
                }
                store.workloads = workloads;
                store.listed = true;
                store.error = None;
            }
            Err(e) => {
                warn!("Container refresh failed: {:#}", e);
                store.error = Some(format!("{:#}", e));
            }
        }
    }
}

#[async_trait]
impl WorkloadProvider for DockerProvider {
    fn kind(&self) -> &'static str {
        "container"
    }

    async fn start(&self) -> Result<()> {
        let docker = self.connect()?;
        docker
            .ping()
            .await
            .context("Docker engine did not answer ping")?;

        Self::refresh_store(&docker, &self.store).await;

        let store = self.store.clone();
        let mut ticker = interval(self.refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let handle = tokio::spawn(async move {
            // first tick completes immediately, the store was just filled
            ticker.tick().await;
            loop {
                ticker.tick().await;
                Self::refresh_store(&docker, &store).await;
            }
        });

        *self.refresh_handle.lock() = Some(handle);
        info!(
            "Started docker provider refreshing every {:?}",
            self.refresh
        );
        Ok(())
    }

    fn get_workloads(&self) -> Result<Vec<Workload>> {
        let store = self.store.read();
        if let Some(e) = &store.error {
            return Err(anyhow!("Last container refresh failed: {}", e));
        }
        if !store.listed {
            bail!("Containers not listed yet");
        }

        Ok(store.workloads.clone())
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.refresh_handle.lock().take() {
            handle.abort();
            info!("Stopped docker provider refresh");
        }
        Ok(())
    }
}
