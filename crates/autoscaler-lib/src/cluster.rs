//! Cluster partitioning and demand aggregation
//!
//! Groups the node snapshot into (ASG, zone) partitions and charges every
//! non-terminal pod either to the partition of its node or to a global
//! pending bucket that is later spread across partitions.

use crate::models::{Node, Pod};
use crate::resources::ResourceVector;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// (ASG name, availability zone).
pub type PartitionKey = (String, String);

/// One (ASG, zone) cell of the capacity grid.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub nodes: Vec<Node>,
    /// Summed requests of non-terminal pods assigned to usable nodes here.
    pub usage: ResourceVector,
}

impl Partition {
    /// Nodes that count toward capacity. Excluded masters never reach the
    /// view, so any node still present only has to be ready and schedulable.
    pub fn usable_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_usable(true))
    }

    pub fn has_usable_node(&self) -> bool {
        self.usable_nodes().next().is_some()
    }
}

/// The partitioned snapshot an iteration decides on.
#[derive(Debug, Clone, Default)]
pub struct ClusterView {
    pub partitions: BTreeMap<PartitionKey, Partition>,
    /// Requests of pods with no usable home: unassigned, assigned to an
    /// unknown node, or assigned to a node that is not usable.
    pub pending: ResourceVector,
}

impl ClusterView {
    /// Partition keys belonging to one ASG, in zone order.
    pub fn zones_of(&self, asg: &str) -> Vec<&PartitionKey> {
        self.partitions.keys().filter(|(a, _)| a == asg).collect()
    }
}

/// Builds the partitioned view from raw snapshots.
///
/// Master nodes are dropped entirely when `include_masters` is false, and
/// pods assigned to them are charged to neither a partition nor the pending
/// bucket.
pub fn build_view(nodes: Vec<Node>, pods: &[Pod], include_masters: bool) -> ClusterView {
    let mut partitions: BTreeMap<PartitionKey, Partition> = BTreeMap::new();
    let mut excluded: BTreeSet<String> = BTreeSet::new();
    let mut usable: BTreeMap<String, PartitionKey> = BTreeMap::new();

    for node in nodes {
        if node.master && !include_masters {
            excluded.insert(node.name.clone());
            continue;
        }
        let key = (node.asg.clone(), node.zone.clone());
        if node.is_usable(include_masters) {
            usable.insert(node.name.clone(), key.clone());
        }
        partitions.entry(key).or_default().nodes.push(node);
    }

    let mut view = ClusterView {
        partitions,
        pending: ResourceVector::ZERO,
    };

    for pod in pods {
        if pod.phase.is_terminal() {
            continue;
        }
        match pod.node_name.as_deref() {
            Some(name) if excluded.contains(name) => {}
            Some(name) => match usable.get(name) {
                Some(key) => {
                    let partition = view.partitions.get_mut(key).expect("key from usable index");
                    partition.usage = partition.usage + pod.requests;
                }
                None => {
                    if !view.partitions.values().any(|p| p.nodes.iter().any(|n| n.name == name)) {
                        warn!(
                            namespace = %pod.namespace,
                            pod = %pod.name,
                            node = %name,
                            "Pod references an unknown node, counting it as pending"
                        );
                    } else {
                        debug!(
                            namespace = %pod.namespace,
                            pod = %pod.name,
                            node = %name,
                            "Pod is assigned to an unusable node, counting it as pending"
                        );
                    }
                    view.pending = view.pending + pod.requests;
                }
            },
            None => {
                view.pending = view.pending + pod.requests;
            }
        }
    }

    view
}

/// Spreads the pending bucket evenly over the partitions that can host it.
///
/// Each share is rounded up per dimension so the distributed total never
/// falls short of the bucket. Partitions without a usable node only receive
/// a share when no partition has one; with no partitions at all the demand
/// is unsatisfiable and an empty map is returned.
pub fn pending_shares(view: &ClusterView) -> BTreeMap<PartitionKey, ResourceVector> {
    if view.pending.is_zero() {
        return BTreeMap::new();
    }

    let mut targets: Vec<&PartitionKey> = view
        .partitions
        .iter()
        .filter(|(_, p)| p.has_usable_node())
        .map(|(k, _)| k)
        .collect();
    if targets.is_empty() {
        targets = view.partitions.keys().collect();
    }
    if targets.is_empty() {
        warn!(
            pending = %view.pending,
            "Pending pods exist but there are no partitions to host them"
        );
        return BTreeMap::new();
    }

    let share = view.pending.div_ceil(targets.len() as u64);
    targets.into_iter().map(|k| (k.clone(), share)).collect()
}
