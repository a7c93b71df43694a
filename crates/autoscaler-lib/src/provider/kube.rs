//! Kubernetes snapshot provider
//!
//! Lists nodes and pods through the cluster API and classifies them into the
//! snapshot models: ASG and zone from well-known labels, readiness from the
//! `Ready` condition, requests summed per pod with the conventional
//! defaults for containers that declare none. Nodes missing a required
//! label are logged and dropped from the snapshot.

use super::ClusterApi;
use crate::models::{Node, Pod, PodPhase};
use crate::resources::{parse_quantity, Resource, ResourceVector};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node as ApiNode, Pod as ApiPod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ListParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Default label carrying the ASG name (EKS managed node groups).
pub const DEFAULT_ASG_LABEL: &str = "eks.amazonaws.com/nodegroup";

const ZONE_LABELS: [&str; 2] = [
    "topology.kubernetes.io/zone",
    "failure-domain.beta.kubernetes.io/zone",
];
const INSTANCE_TYPE_LABELS: [&str; 2] = [
    "node.kubernetes.io/instance-type",
    "beta.kubernetes.io/instance-type",
];
const MASTER_LABELS: [&str; 2] = [
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// Containers without an explicit request are charged these amounts.
const DEFAULT_CONTAINER_CPU: &str = "10m";
const DEFAULT_CONTAINER_MEMORY: &str = "50Mi";

/// Snapshot reader backed by the Kubernetes API server.
pub struct KubeClusterApi {
    nodes: Api<ApiNode>,
    pods: Api<ApiPod>,
    asg_label: String,
}

impl KubeClusterApi {
    /// Connects with in-cluster configuration, falling back to the local
    /// kubeconfig.
    pub async fn connect(asg_label: impl Into<String>) -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to build Kubernetes client")?;
        Ok(Self {
            nodes: Api::all(client.clone()),
            pods: Api::all(client),
            asg_label: asg_label.into(),
        })
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let list = self
            .nodes
            .list(&ListParams::default())
            .await
            .context("Failed to list nodes")?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|item| node_from_api(item, &self.asg_label))
            .collect())
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        let list = self
            .pods
            .list(&ListParams::default())
            .await
            .context("Failed to list pods")?;
        Ok(list.items.into_iter().map(pod_from_api).collect())
    }
}

fn label<'a>(labels: &'a BTreeMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| labels.get(*k).map(String::as_str))
}

fn parse_allocatable(
    quantities: &BTreeMap<String, Quantity>,
    key: &str,
    resource: Resource,
) -> Option<u64> {
    let raw = quantities.get(key)?;
    parse_quantity(&raw.0, resource).ok()
}

/// Classifies one API node, or drops it when a required attribute is
/// missing.
fn node_from_api(node: ApiNode, asg_label: &str) -> Option<Node> {
    let name = node.metadata.name.unwrap_or_default();
    let labels = node.metadata.labels.unwrap_or_default();

    let Some(asg) = labels.get(asg_label) else {
        debug!(node = %name, label = %asg_label, "Node carries no ASG label, ignoring");
        return None;
    };
    let Some(zone) = label(&labels, &ZONE_LABELS) else {
        warn!(node = %name, "Node carries no zone label, ignoring");
        return None;
    };

    let status = node.status.unwrap_or_default();
    let quantities = status
        .allocatable
        .or(status.capacity)
        .unwrap_or_default();
    let allocatable = parse_allocatable(&quantities, "cpu", Resource::Cpu)
        .zip(parse_allocatable(&quantities, "memory", Resource::Memory))
        .zip(parse_allocatable(&quantities, "pods", Resource::Pods))
        .map(|((cpu_m, memory), pods)| ResourceVector::new(cpu_m, memory, pods));
    let Some(allocatable) = allocatable else {
        warn!(node = %name, "Node allocatable is missing or unparseable, ignoring");
        return None;
    };

    let ready = status
        .conditions
        .unwrap_or_default()
        .iter()
        .any(|c| c.type_ == "Ready" && c.status == "True");
    let spec = node.spec.unwrap_or_default();

    Some(Node {
        name,
        asg: asg.clone(),
        zone: zone.to_string(),
        allocatable,
        ready,
        unschedulable: spec.unschedulable.unwrap_or(false),
        master: label(&labels, &MASTER_LABELS).is_some(),
        instance_type: label(&labels, &INSTANCE_TYPE_LABELS)
            .unwrap_or_default()
            .to_string(),
    })
}

fn container_request(
    requests: Option<&BTreeMap<String, Quantity>>,
    key: &str,
    resource: Resource,
    default: &str,
) -> u64 {
    let explicit = requests
        .and_then(|r| r.get(key))
        .and_then(|q| match parse_quantity(&q.0, resource) {
            Ok(v) => Some(v),
            Err(err) => {
                warn!(%err, "Unparseable container request, charging the default");
                None
            }
        });
    explicit.unwrap_or_else(|| {
        parse_quantity(default, resource).expect("default request is well-formed")
    })
}

fn pod_from_api(pod: ApiPod) -> Pod {
    let name = pod.metadata.name.unwrap_or_default();
    let namespace = pod.metadata.namespace.unwrap_or_default();
    let spec = pod.spec.unwrap_or_default();
    let status = pod.status.unwrap_or_default();

    let phase = match status.phase.as_deref() {
        Some("Pending") => PodPhase::Pending,
        Some("Running") => PodPhase::Running,
        Some("Succeeded") => PodPhase::Succeeded,
        Some("Failed") => PodPhase::Failed,
        _ => PodPhase::Unknown,
    };

    let mut requests = ResourceVector::new(0, 0, 1);
    for container in &spec.containers {
        let declared = container.resources.as_ref().and_then(|r| r.requests.as_ref());
        if declared.is_none() {
            debug!(
                namespace = %namespace,
                pod = %name,
                container = %container.name,
                "Container declares no requests, charging defaults"
            );
        }
        requests.cpu_m += container_request(declared, "cpu", Resource::Cpu, DEFAULT_CONTAINER_CPU);
        requests.memory +=
            container_request(declared, "memory", Resource::Memory, DEFAULT_CONTAINER_MEMORY);
    }

    Pod {
        namespace,
        name,
        phase,
        node_name: spec.node_name,
        requests,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, NodeCondition, NodeSpec, NodeStatus, PodSpec, PodStatus, ResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    const MI: u64 = 1 << 20;
    const GI: u64 = 1 << 30;

    fn quantities(cpu: &str, memory: &str, pods: &str) -> BTreeMap<String, Quantity> {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
            ("pods".to_string(), Quantity(pods.to_string())),
        ])
    }

    fn api_node(labels: &[(&str, &str)]) -> ApiNode {
        ApiNode {
            metadata: ObjectMeta {
                name: Some("n1".to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..ObjectMeta::default()
            },
            spec: Some(NodeSpec::default()),
            status: Some(NodeStatus {
                allocatable: Some(quantities("4", "16Gi", "110")),
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..NodeCondition::default()
                }]),
                ..NodeStatus::default()
            }),
        }
    }

    #[test]
    fn test_node_classification() {
        let node = api_node(&[
            (DEFAULT_ASG_LABEL, "workers"),
            ("topology.kubernetes.io/zone", "eu-west-1a"),
            ("node.kubernetes.io/instance-type", "m5.xlarge"),
        ]);
        let node = node_from_api(node, DEFAULT_ASG_LABEL).unwrap();

        assert_eq!(node.asg, "workers");
        assert_eq!(node.zone, "eu-west-1a");
        assert_eq!(node.instance_type, "m5.xlarge");
        assert_eq!(node.allocatable, ResourceVector::new(4000, 16 * GI, 110));
        assert!(node.ready);
        assert!(!node.unschedulable);
        assert!(!node.master);
    }

    #[test]
    fn test_node_without_asg_label_is_dropped() {
        let node = api_node(&[("topology.kubernetes.io/zone", "eu-west-1a")]);
        assert!(node_from_api(node, DEFAULT_ASG_LABEL).is_none());
    }

    #[test]
    fn test_node_without_zone_label_is_dropped() {
        let node = api_node(&[(DEFAULT_ASG_LABEL, "workers")]);
        assert!(node_from_api(node, DEFAULT_ASG_LABEL).is_none());
    }

    #[test]
    fn test_legacy_zone_label_and_master_role() {
        let node = api_node(&[
            (DEFAULT_ASG_LABEL, "masters"),
            ("failure-domain.beta.kubernetes.io/zone", "eu-west-1b"),
            ("node-role.kubernetes.io/control-plane", ""),
        ]);
        let node = node_from_api(node, DEFAULT_ASG_LABEL).unwrap();

        assert_eq!(node.zone, "eu-west-1b");
        assert!(node.master);
    }

    #[test]
    fn test_unready_condition_and_cordon() {
        let mut node = api_node(&[
            (DEFAULT_ASG_LABEL, "workers"),
            ("topology.kubernetes.io/zone", "eu-west-1a"),
        ]);
        node.status.as_mut().unwrap().conditions = Some(vec![NodeCondition {
            type_: "Ready".to_string(),
            status: "Unknown".to_string(),
            ..NodeCondition::default()
        }]);
        node.spec = Some(NodeSpec {
            unschedulable: Some(true),
            ..NodeSpec::default()
        });
        let node = node_from_api(node, DEFAULT_ASG_LABEL).unwrap();

        assert!(!node.ready);
        assert!(node.unschedulable);
    }

    fn api_pod(containers: Vec<Container>, node_name: Option<&str>, phase: &str) -> ApiPod {
        ApiPod {
            metadata: ObjectMeta {
                name: Some("p1".to_string()),
                namespace: Some("default".to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(PodSpec {
                containers,
                node_name: node_name.map(str::to_string),
                ..PodSpec::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..PodStatus::default()
            }),
        }
    }

    fn container(cpu: Option<&str>, memory: Option<&str>) -> Container {
        let mut requests = BTreeMap::new();
        if let Some(cpu) = cpu {
            requests.insert("cpu".to_string(), Quantity(cpu.to_string()));
        }
        if let Some(memory) = memory {
            requests.insert("memory".to_string(), Quantity(memory.to_string()));
        }
        Container {
            name: "app".to_string(),
            resources: Some(ResourceRequirements {
                requests: Some(requests),
                ..ResourceRequirements::default()
            }),
            ..Container::default()
        }
    }

    #[test]
    fn test_pod_requests_are_summed() {
        let pod = api_pod(
            vec![
                container(Some("250m"), Some("512Mi")),
                container(Some("1"), Some("1Gi")),
            ],
            Some("n1"),
            "Running",
        );
        let pod = pod_from_api(pod);

        assert_eq!(pod.phase, PodPhase::Running);
        assert_eq!(pod.node_name.as_deref(), Some("n1"));
        assert_eq!(pod.requests, ResourceVector::new(1250, 512 * MI + GI, 1));
    }

    #[test]
    fn test_missing_requests_charge_defaults() {
        let pod = api_pod(vec![container(None, None)], None, "Pending");
        let pod = pod_from_api(pod);

        assert_eq!(pod.phase, PodPhase::Pending);
        assert!(pod.node_name.is_none());
        assert_eq!(pod.requests, ResourceVector::new(10, 50 * MI, 1));
    }

    #[test]
    fn test_unknown_phase_is_preserved_as_unknown() {
        let pod = api_pod(vec![], None, "Mystery");
        assert_eq!(pod_from_api(pod).phase, PodPhase::Unknown);
    }
}
