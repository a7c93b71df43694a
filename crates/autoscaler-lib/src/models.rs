//! Snapshot data models
//!
//! Plain owned types produced from the Kubernetes and AWS snapshots at the
//! start of an iteration and dropped at its end. The decision core only ever
//! sees these, never the client-library objects.

use crate::resources::ResourceVector;
use serde::{Deserialize, Serialize};

/// A worker node as seen in the cluster snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// Auto Scaling Group this node belongs to, from the provider label.
    pub asg: String,
    /// Availability zone, from the topology label.
    pub zone: String,
    pub allocatable: ResourceVector,
    pub ready: bool,
    pub unschedulable: bool,
    pub master: bool,
    pub instance_type: String,
}

impl Node {
    /// A node counts toward capacity iff it is ready, schedulable and not an
    /// excluded master.
    pub fn is_usable(&self, include_masters: bool) -> bool {
        self.ready && !self.unschedulable && (include_masters || !self.master)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Terminal pods no longer consume capacity.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

/// A pod with its summed container requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    pub phase: PodPhase,
    /// Node the scheduler assigned this pod to, if any.
    pub node_name: Option<String>,
    /// Requested resources; the pods component is always 1.
    pub requests: ResourceVector,
}

/// Auto Scaling Group metadata from the cloud snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsgInfo {
    pub name: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
    pub zones: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(ready: bool, unschedulable: bool, master: bool) -> Node {
        Node {
            name: "n1".to_string(),
            asg: "asg-a".to_string(),
            zone: "eu-west-1a".to_string(),
            allocatable: ResourceVector::new(4000, 8 << 30, 110),
            ready,
            unschedulable,
            master,
            instance_type: "m5.large".to_string(),
        }
    }

    #[test]
    fn test_node_usability() {
        assert!(node(true, false, false).is_usable(false));
        assert!(!node(false, false, false).is_usable(false));
        assert!(!node(true, true, false).is_usable(false));
        assert!(!node(true, false, true).is_usable(false));
        assert!(node(true, false, true).is_usable(true));
    }

    #[test]
    fn test_terminal_phases() {
        assert!(PodPhase::Succeeded.is_terminal());
        assert!(PodPhase::Failed.is_terminal());
        assert!(!PodPhase::Pending.is_terminal());
        assert!(!PodPhase::Running.is_terminal());
        assert!(!PodPhase::Unknown.is_terminal());
    }
}
