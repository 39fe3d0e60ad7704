use crate::provider::WorkloadProvider;
use anyhow::Result;
use async_trait::async_trait;
use ctrack_common::types::Workload;
use log::warn;

/// Workloads listed up front in the config file
pub struct FixedProvider {
    workloads: Vec<Workload>,
}

impl FixedProvider {
    pub fn new(workloads: Vec<Workload>) -> Self {
        Self { workloads }
    }
}

#[async_trait]
impl WorkloadProvider for FixedProvider {
    fn kind(&self) -> &'static str {
        "workload"
    }

    async fn start(&self) -> Result<()> {
        if self.workloads.is_empty() {
            warn!("No static workloads configured, only node connections will be reported");
        }

        Ok(())
    }

    fn get_workloads(&self) -> Result<Vec<Workload>> {
        Ok(self.workloads.clone())
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
