use crate::provider::WorkloadProvider;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use ctrack_common::types::Workload;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Label added to every pod carrying its namespace
pub const NAMESPACE_LABEL: &str = "pod_namespace";

/// Pods known to the watcher, keyed by namespace/name
#[derive(Debug, Default)]
struct PodStore {
    live: HashMap<String, Workload>,
    /// Pods seen since the watcher started a (re)list,
    /// swapped into `live` once the list completes
    relisting: Option<HashMap<String, Workload>>,
    synced: bool,
}

impl PodStore {
    fn apply(&mut self, event: Event<Pod>) {
        match event {
            Event::Init => {
                self.relisting = Some(HashMap::new());
            }
            Event::InitApply(pod) => {
                let relisting = self.relisting.get_or_insert_with(HashMap::new);
                if let Some((key, workload)) = KubernetesProvider::extract_pod_workload(&pod) {
                    relisting.insert(key, workload);
                }
            }
            Event::InitDone => {
                if let Some(relisted) = self.relisting.take() {
                    self.live = relisted;
                }
                self.synced = true;
            }
            Event::Apply(pod) => match KubernetesProvider::extract_pod_workload(&pod) {
                Some((key, workload)) => {
                    if self.live.insert(key, workload.clone()).is_none() {
                        debug!("Added workload {} ({})", workload.name, workload.ip);
                    }
                }
                None => {
                    if let Some(removed) = self.live.remove(&pod_key(&pod)) {
                        debug!("Removed workload {} ({})", removed.name, removed.ip);
                    }
                }
            },
            Event::Delete(pod) => {
                if let Some(removed) = self.live.remove(&pod_key(&pod)) {
                    debug!("Removed workload {} ({})", removed.name, removed.ip);
                }
            }
        }
    }
}

fn pod_key(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default()
    )
}

/// Watches the pods scheduled on this node
pub struct KubernetesProvider {
    node_name: String,
    label_selector: Option<String>,
    /// Current pods, updated by the watcher
    pods: Arc<RwLock<PodStore>>,
    /// Handle to the watch task
    watch_handle: Mutex<Option<JoinHandle<()>>>,
}

impl KubernetesProvider {
    pub fn new(node_name: String, label_selector: Option<String>) -> Self {
        Self {
            node_name,
            label_selector,
            pods: Arc::new(RwLock::new(PodStore::default())),
            watch_handle: Mutex::new(None),
        }
    }

    fn is_pod_terminated(pod: &Pod) -> bool {
        pod.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .is_some_and(|phase| phase == "Succeeded" || phase == "Failed")
    }

    /// Host network pods share the node address and would
    /// steal the node's connections, they are left to the node
    fn is_host_network(pod: &Pod) -> bool {
        pod.spec
            .as_ref()
            .and_then(|s| s.host_network)
            .unwrap_or(false)
    }

    fn extract_pod_workload(pod: &Pod) -> Option<(String, Workload)> {
        if Self::is_host_network(pod) || Self::is_pod_terminated(pod) {
            return None;
        }

        let name = pod.metadata.name.clone()?;
        let pod_ip = pod.status.as_ref()?.pod_ip.as_ref()?;
        let ip = pod_ip.parse::<IpAddr>().ok()?;

        let mut labels = pod.metadata.labels.clone().unwrap_or_default();
        labels.insert(
            NAMESPACE_LABEL.to_string(),
            pod.metadata.namespace.clone().unwrap_or_default(),
        );

        Some((pod_key(pod), Workload { name, ip, labels }))
    }
}

#[async_trait]
impl WorkloadProvider for KubernetesProvider {
    fn kind(&self) -> &'static str {
        "pod"
    }

    async fn start(&self) -> Result<()> {
        let client = Client::try_default().await.context(
            "Failed to create Kubernetes client - ensure running in cluster or kubeconfig is set",
        )?;

        if self.node_name.is_empty() {
            bail!("Kubernetes provider requires a node name, set provider.kubernetes.node_name or NODE_NAME");
        }

        let field_selector = format!("spec.nodeName={}", self.node_name);
        let mut config = watcher::Config::default().fields(&field_selector);
        if let Some(selector) = &self.label_selector {
            config = config.labels(selector);
        }

        info!(
            "Watching pods on node {} (label selector: {:?})",
            self.node_name, self.label_selector
        );

        let pods_api: Api<Pod> = Api::all(client);
        let pods = self.pods.clone();
        let node_name = self.node_name.clone();

        let handle = tokio::spawn(async move {
            let watch = watcher::watcher(pods_api, config);
            futures::pin_mut!(watch);

            while let Some(event) = watch.next().await {
                match event {
                    Ok(event) => {
                        let mut store = pods.write();
                        let was_synced = store.synced;
                        store.apply(event);

                        if store.synced && !was_synced {
                            info!(
                                "Initial pod sync complete for node {} ({} workloads)",
                                node_name,
                                store.live.len()
                            );
                        }
                    }
                    Err(e) => {
                        warn!("Pod watch error for node {}: {}", node_name, e);
                    }
                }
            }
        });

        *self.watch_handle.lock() = Some(handle);
        info!(
            "Started Kubernetes provider watching pods for node {}",
            self.node_name
        );
        Ok(())
    }

    fn get_workloads(&self) -> Result<Vec<Workload>> {
        let store = self.pods.read();
        if !store.synced {
            bail!("Pod list for node {} not synced yet", self.node_name);
        }

        Ok(store.live.values().cloned().collect())
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.watch_handle.lock().take() {
            handle.abort();
            info!(
                "Stopped Kubernetes provider watch for node {}",
                self.node_name
            );
        }
        Ok(())
    }
}
