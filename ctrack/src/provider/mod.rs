mod docker;
mod fixed;
mod kubernetes;
mod provider;

pub use docker::DockerProvider;
pub use fixed::FixedProvider;
pub use kubernetes::KubernetesProvider;
pub use provider::WorkloadProvider;
