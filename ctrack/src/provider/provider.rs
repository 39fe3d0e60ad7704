use anyhow::Result;
use async_trait::async_trait;
use ctrack_common::types::Workload;

/// Responsible for maintaining a live list of the
/// workloads whose connections should be attributed.
#[async_trait]
pub trait WorkloadProvider: Send + Sync {
    /// Label name carrying the workload name on exported
    /// series, e.g. "pod"
    fn kind(&self) -> &'static str;

    /// Start the provider monitoring for changes
    async fn start(&self) -> Result<()>;

    /// Get the current list of workloads. Called from the
    /// scrape path so must not block on the network
    fn get_workloads(&self) -> Result<Vec<Workload>>;

    /// Shutdown the provider
    async fn shutdown(&self) -> Result<()>;
}
