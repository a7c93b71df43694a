//! The autoscale decision function
//!
//! A pure function from one snapshot (nodes, pods, ASG metadata) and the
//! scaling configuration to one desired-capacity target per ASG. Each
//! (ASG, zone) partition is sized by counting how many copies of its
//! weakest usable node cover the buffered demand, partition counts are
//! summed per ASG, and decreases are damped to a bounded step.

use crate::cluster::{self, ClusterView, PartitionKey};
use crate::models::{AsgInfo, Node, Pod};
use crate::resources::{percent_add_ceil, Resource, ResourceVector};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Scaling knobs, fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct ScalingConfig {
    /// Multiplicative headroom per dimension, in percent.
    pub buffer_cpu_percent: u32,
    pub buffer_memory_percent: u32,
    pub buffer_pods_percent: u32,
    /// Additive headroom per dimension.
    pub buffer_fixed: ResourceVector,
    /// Minimum weakest-node units every partition provisions.
    pub spare_nodes: u32,
    pub include_master_nodes: bool,
    /// Maximum decrease per ASG per iteration, in nodes.
    pub scale_down_step: u32,
    /// Alternative decrease cap as a percentage of the current capacity;
    /// the larger permitted decrease wins.
    pub scale_down_step_percent: u32,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            buffer_cpu_percent: 10,
            buffer_memory_percent: 10,
            buffer_pods_percent: 10,
            buffer_fixed: ResourceVector::new(200, 200 << 20, 10),
            spare_nodes: 1,
            include_master_nodes: false,
            scale_down_step: 1,
            scale_down_step_percent: 0,
        }
    }
}

/// Why an ASG ended up with its final target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Unchanged,
    ScaleUp,
    ScaleDown,
    /// A decrease was held back by the damping step or the ASG minimum.
    ScaleDownClamped,
    SkippedNoNodes,
    Error,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::Unchanged => "unchanged",
            DecisionReason::ScaleUp => "scale_up",
            DecisionReason::ScaleDown => "scale_down",
            DecisionReason::ScaleDownClamped => "scale_down_clamped",
            DecisionReason::SkippedNoNodes => "skipped_no_nodes",
            DecisionReason::Error => "error",
        }
    }
}

/// Sizing detail for one (ASG, zone) partition.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionPlan {
    pub zone: String,
    pub usage: ResourceVector,
    pub pending_share: ResourceVector,
    pub buffered_demand: ResourceVector,
    pub weakest: ResourceVector,
    pub required_nodes: u32,
}

/// The per-ASG outcome of one decision run.
#[derive(Debug, Clone, Serialize)]
pub struct AsgDecision {
    pub asg: String,
    pub current: u32,
    /// Summed partition requirement before damping and clamping; absent when
    /// the ASG was skipped or failed an invariant.
    pub required: Option<u32>,
    pub target: u32,
    pub reason: DecisionReason,
    pub partitions: Vec<PartitionPlan>,
}

impl AsgDecision {
    pub fn needs_update(&self) -> bool {
        self.target != self.current
    }
}

/// Buffered demand: `(usage + pending) * (1 + pct) + fixed`, per dimension,
/// with exact integer arithmetic rounding up.
pub fn apply_buffer(demand: ResourceVector, config: &ScalingConfig) -> ResourceVector {
    ResourceVector::new(
        percent_add_ceil(demand.cpu_m, config.buffer_cpu_percent)
            .saturating_add(config.buffer_fixed.cpu_m),
        percent_add_ceil(demand.memory, config.buffer_memory_percent)
            .saturating_add(config.buffer_fixed.memory),
        percent_add_ceil(demand.pods, config.buffer_pods_percent)
            .saturating_add(config.buffer_fixed.pods),
    )
}

fn weakest_of<'a>(nodes: impl Iterator<Item = &'a Node>) -> Option<ResourceVector> {
    nodes
        .map(|n| n.allocatable)
        .min_by_key(ResourceVector::lexicographic_key)
}

/// Smallest `n` with `n * weakest >= demand` on every dimension.
///
/// Equivalent to accumulating weakest-node capacity until it covers the
/// demand; a zero allocatable component makes the demand uncoverable and is
/// rejected as the offending dimension.
pub fn nodes_required(demand: &ResourceVector, weakest: &ResourceVector) -> Result<u32, Resource> {
    let mut required = 0u64;
    for resource in Resource::ALL {
        let unit = weakest.get(resource);
        if unit == 0 {
            return Err(resource);
        }
        required = required.max(demand.get(resource).div_ceil(unit));
    }
    Ok(u32::try_from(required).unwrap_or(u32::MAX))
}

/// Runs the decision for every ASG in the snapshot, in name order.
pub fn decide(
    nodes: Vec<Node>,
    pods: &[Pod],
    asgs: &[AsgInfo],
    config: &ScalingConfig,
) -> Vec<AsgDecision> {
    let view = cluster::build_view(nodes, pods, config.include_master_nodes);
    let shares = cluster::pending_shares(&view);

    let ordered: BTreeMap<&str, &AsgInfo> = asgs.iter().map(|a| (a.name.as_str(), a)).collect();
    ordered
        .into_values()
        .map(|asg| decide_asg(asg, &view, &shares, config))
        .collect()
}

fn decide_asg(
    asg: &AsgInfo,
    view: &ClusterView,
    shares: &BTreeMap<PartitionKey, ResourceVector>,
    config: &ScalingConfig,
) -> AsgDecision {
    let keys = view.zones_of(&asg.name);

    // Weakest usable node anywhere in the ASG, the fallback model for zones
    // whose own nodes are all unusable.
    let asg_weakest = weakest_of(
        keys.iter()
            .flat_map(|k| view.partitions[*k].usable_nodes()),
    );
    let Some(asg_weakest) = asg_weakest else {
        info!(asg = %asg.name, current = asg.desired_capacity, "No usable nodes, leaving capacity untouched");
        return AsgDecision {
            asg: asg.name.clone(),
            current: asg.desired_capacity,
            required: None,
            target: asg.desired_capacity,
            reason: DecisionReason::SkippedNoNodes,
            partitions: Vec::new(),
        };
    };

    let mut partitions = Vec::new();
    let mut required_total: u32 = 0;
    for key in keys {
        let partition = &view.partitions[key];
        let weakest = weakest_of(partition.usable_nodes()).unwrap_or(asg_weakest);
        let pending_share = shares.get(key).copied().unwrap_or(ResourceVector::ZERO);
        let buffered = apply_buffer(partition.usage + pending_share, config);

        let required = match nodes_required(&buffered, &weakest) {
            Ok(n) => n.max(config.spare_nodes),
            Err(resource) => {
                warn!(
                    asg = %asg.name,
                    zone = %key.1,
                    %resource,
                    "Weakest node reports zero allocatable, leaving capacity untouched"
                );
                return AsgDecision {
                    asg: asg.name.clone(),
                    current: asg.desired_capacity,
                    required: None,
                    target: asg.desired_capacity,
                    reason: DecisionReason::Error,
                    partitions,
                };
            }
        };

        debug!(
            asg = %asg.name,
            zone = %key.1,
            usage = %partition.usage,
            pending_share = %pending_share,
            buffered = %buffered,
            weakest = %weakest,
            required,
            "Sized partition"
        );
        partitions.push(PartitionPlan {
            zone: key.1.clone(),
            usage: partition.usage,
            pending_share,
            buffered_demand: buffered,
            weakest,
            required_nodes: required,
        });
        required_total = required_total.saturating_add(required);
    }

    finalize(asg, required_total, partitions, config)
}

fn finalize(
    asg: &AsgInfo,
    required: u32,
    partitions: Vec<PartitionPlan>,
    config: &ScalingConfig,
) -> AsgDecision {
    let current = asg.desired_capacity;

    let mut target = if required < current {
        let percent_step =
            (u64::from(current) * u64::from(config.scale_down_step_percent)).div_ceil(100);
        let allowed_step = u32::try_from(percent_step.max(u64::from(config.scale_down_step)))
            .unwrap_or(u32::MAX);
        let floor = current.saturating_sub(allowed_step);
        if floor > required {
            info!(
                asg = %asg.name,
                required,
                floor,
                "Slowing down scale-down"
            );
        }
        required.max(floor)
    } else {
        required
    };

    if target > asg.max_size {
        warn!(asg = %asg.name, target, max = asg.max_size, "Required capacity exceeds ASG maximum");
        target = asg.max_size;
    }
    if target < asg.min_size {
        warn!(asg = %asg.name, target, min = asg.min_size, "Required capacity is below ASG minimum");
        target = asg.min_size;
    }

    let reason = if target == current {
        DecisionReason::Unchanged
    } else if target > current {
        DecisionReason::ScaleUp
    } else if target > required {
        DecisionReason::ScaleDownClamped
    } else {
        DecisionReason::ScaleDown
    };

    AsgDecision {
        asg: asg.name.clone(),
        current,
        required: Some(required),
        target,
        reason,
        partitions,
    }
}
