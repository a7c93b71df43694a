//! The autoscale loop
//!
//! Wakes on a fixed interval, snapshots the cluster and the cloud, runs the
//! decision function and applies targets that differ from the current
//! capacity. Snapshot failures skip the iteration; effector failures are
//! isolated per ASG. Every provider call carries a deadline of a third of
//! the interval so a hung API cannot stall the loop.

use crate::decision::{self, AsgDecision, ScalingConfig};
use crate::health::{components, HealthRegistry};
use crate::models::Node;
use crate::observability::{ScalerMetrics, StructuredLogger};
use crate::provider::{AutoscalingApi, ClusterApi};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval, timeout, Instant};
use tracing::{info, warn};

/// Loop-level options, separate from the scaling knobs.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub interval: Duration,
    /// Log intended changes without calling the cloud API.
    pub dry_run: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            dry_run: false,
        }
    }
}

/// What one iteration did, for logs, tests and the `--once` exit code.
#[derive(Debug, Default)]
pub struct IterationOutcome {
    pub decisions: Vec<AsgDecision>,
    /// Capacity changes accepted by the cloud provider.
    pub applied: usize,
    /// Capacity changes the cloud provider rejected.
    pub failed: usize,
}

/// Snapshot of the last completed iteration, as served on the status route.
#[derive(Debug, Clone, Serialize)]
pub struct IterationStatus {
    pub completed_at: i64,
    pub applied: usize,
    pub failed: usize,
    pub decisions: Vec<AsgDecision>,
}

/// Shared handle the loop publishes each iteration's result through.
///
/// Cheap to clone; the HTTP surface holds one end and reads the latest
/// report without touching the loop.
#[derive(Clone, Default)]
pub struct StatusFeed {
    latest: Arc<RwLock<Option<IterationStatus>>>,
}

impl StatusFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, status: IterationStatus) {
        *self.latest.write().await = Some(status);
    }

    /// The most recent iteration, or `None` before the first one completes.
    pub async fn latest(&self) -> Option<IterationStatus> {
        self.latest.read().await.clone()
    }
}

pub struct AutoscaleLoop {
    cluster: Arc<dyn ClusterApi>,
    cloud: Arc<dyn AutoscalingApi>,
    scaling: ScalingConfig,
    config: LoopConfig,
    metrics: ScalerMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
    status: StatusFeed,
}

async fn bounded<T>(
    deadline: Duration,
    what: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout(deadline, call).await {
        Ok(result) => result.with_context(|| format!("{what} failed")),
        Err(_) => Err(anyhow!("{what} timed out after {deadline:?}")),
    }
}

impl AutoscaleLoop {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        cloud: Arc<dyn AutoscalingApi>,
        scaling: ScalingConfig,
        config: LoopConfig,
        health: HealthRegistry,
    ) -> Self {
        Self {
            cluster,
            cloud,
            scaling,
            config,
            metrics: ScalerMetrics::new(),
            logger: StructuredLogger::new(),
            health,
            status: StatusFeed::new(),
        }
    }

    /// A handle for reading the last iteration's result.
    pub fn status(&self) -> StatusFeed {
        self.status.clone()
    }

    fn call_deadline(&self) -> Duration {
        (self.config.interval / 3).max(Duration::from_secs(1))
    }

    /// Run until the shutdown channel fires. An in-flight iteration always
    /// completes before the loop exits.
    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            dry_run = self.config.dry_run,
            "Starting autoscale loop"
        );
        let mut ticker = interval(self.config.interval.max(Duration::from_secs(1)));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(outcome) => {
                            self.health.set_healthy(components::DECISION_LOOP).await;
                            self.logger.log_iteration(
                                outcome.decisions.len(),
                                outcome.applied,
                                outcome.failed,
                            );
                        }
                        Err(err) => {
                            self.metrics.inc_iteration_errors();
                            self.health
                                .set_degraded(components::DECISION_LOOP, err.to_string())
                                .await;
                            warn!(error = %err, "Iteration skipped");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down autoscale loop");
                    break;
                }
            }
        }
    }

    /// One full iteration: snapshot, decide, apply.
    pub async fn run_once(&self) -> Result<IterationOutcome> {
        self.metrics.inc_iterations();
        let deadline = self.call_deadline();

        let snapshot_start = Instant::now();
        let nodes = match bounded(deadline, "Node snapshot", self.cluster.list_nodes()).await {
            Ok(nodes) => nodes,
            Err(err) => {
                self.health
                    .set_unhealthy(components::ORCHESTRATOR, err.to_string())
                    .await;
                return Err(err);
            }
        };
        let pods = match bounded(deadline, "Pod snapshot", self.cluster.list_pods()).await {
            Ok(pods) => pods,
            Err(err) => {
                self.health
                    .set_unhealthy(components::ORCHESTRATOR, err.to_string())
                    .await;
                return Err(err);
            }
        };
        self.health.set_healthy(components::ORCHESTRATOR).await;

        let asg_names = discovered_asgs(&nodes);
        if asg_names.is_empty() {
            warn!("No nodes carry an ASG label, nothing to scale");
            return Ok(IterationOutcome::default());
        }
        let asgs = match bounded(
            deadline,
            "ASG snapshot",
            self.cloud.describe_asgs(&asg_names),
        )
        .await
        {
            Ok(asgs) => asgs,
            Err(err) => {
                self.health
                    .set_unhealthy(components::CLOUD, err.to_string())
                    .await;
                return Err(err);
            }
        };
        self.metrics
            .observe_snapshot_latency(snapshot_start.elapsed().as_secs_f64());

        let decision_start = Instant::now();
        let decisions = decision::decide(nodes, &pods, &asgs, &self.scaling);
        self.metrics
            .observe_decision_latency(decision_start.elapsed().as_secs_f64());

        let mut outcome = IterationOutcome::default();
        for decision in &decisions {
            self.logger.log_decision(decision);
            self.metrics.record_decision(decision);
            if !decision.needs_update() {
                continue;
            }
            self.logger.log_capacity_change(
                &decision.asg,
                decision.current,
                decision.target,
                self.config.dry_run,
            );
            if self.config.dry_run {
                continue;
            }
            match bounded(
                deadline,
                "SetDesiredCapacity",
                self.cloud.set_desired_capacity(&decision.asg, decision.target),
            )
            .await
            {
                Ok(()) => outcome.applied += 1,
                Err(err) => {
                    self.metrics.inc_effector_errors();
                    self.logger
                        .log_effector_failure(&decision.asg, decision.target, &err.to_string());
                    outcome.failed += 1;
                }
            }
        }
        if outcome.failed == 0 {
            self.health.set_healthy(components::CLOUD).await;
        } else {
            self.health
                .set_degraded(
                    components::CLOUD,
                    format!("{} capacity changes rejected", outcome.failed),
                )
                .await;
        }

        self.status
            .publish(IterationStatus {
                completed_at: chrono::Utc::now().timestamp(),
                applied: outcome.applied,
                failed: outcome.failed,
                decisions: decisions.clone(),
            })
            .await;

        outcome.decisions = decisions;
        Ok(outcome)
    }
}

/// ASG names referenced by node labels, deduplicated and sorted.
fn discovered_asgs(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .map(|n| n.asg.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
