//! Cluster and cloud provider interfaces
//!
//! The decision function only consumes plain snapshot models, so both sides
//! of the world are reached through these traits and can be replaced by
//! in-memory fakes in tests.

mod aws;
mod kube;

pub use aws::AwsAutoscalingApi;
pub use kube::{KubeClusterApi, DEFAULT_ASG_LABEL};

use crate::models::{AsgInfo, Node, Pod};
use anyhow::Result;

pub use async_trait::async_trait;

/// Read access to the container orchestrator.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List all worker nodes that could host workloads.
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    /// List pods across all namespaces.
    async fn list_pods(&self) -> Result<Vec<Pod>>;
}

/// Access to the cloud provider's Auto Scaling Groups.
#[async_trait]
pub trait AutoscalingApi: Send + Sync {
    /// Describe the named groups.
    async fn describe_asgs(&self, names: &[String]) -> Result<Vec<AsgInfo>>;

    /// Set the desired capacity of one group.
    async fn set_desired_capacity(&self, name: &str, capacity: u32) -> Result<()>;
}
