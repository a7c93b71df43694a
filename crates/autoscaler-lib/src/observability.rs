//! Observability for the autoscaler
//!
//! Prometheus metrics (iteration counts, snapshot and decision latency,
//! per-ASG capacity gauges) and structured log events for the decisions the
//! loop takes.

use crate::decision::AsgDecision;
use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter, register_int_counter_vec,
    GaugeVec, Histogram, IntCounter, IntCounterVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for snapshot and decision latencies (in seconds).
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static GLOBAL_METRICS: OnceLock<ScalerMetricsInner> = OnceLock::new();

struct ScalerMetricsInner {
    iterations: IntCounter,
    iteration_errors: IntCounter,
    snapshot_latency_seconds: Histogram,
    decision_latency_seconds: Histogram,
    asg_desired_capacity: GaugeVec,
    asg_required_nodes: GaugeVec,
    scaling_operations: IntCounterVec,
    effector_errors: IntCounter,
}

impl ScalerMetricsInner {
    fn new() -> Self {
        Self {
            iterations: register_int_counter!(
                "autoscaler_iterations_total",
                "Autoscale iterations started"
            )
            .expect("Failed to register iterations_total"),

            iteration_errors: register_int_counter!(
                "autoscaler_iteration_errors_total",
                "Iterations aborted before any capacity change"
            )
            .expect("Failed to register iteration_errors_total"),

            snapshot_latency_seconds: register_histogram!(
                "autoscaler_snapshot_latency_seconds",
                "Time spent fetching the cluster and cloud snapshots",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register snapshot_latency_seconds"),

            decision_latency_seconds: register_histogram!(
                "autoscaler_decision_latency_seconds",
                "Time spent in the decision function",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register decision_latency_seconds"),

            asg_desired_capacity: register_gauge_vec!(
                "autoscaler_asg_desired_capacity",
                "Desired capacity after the last decision",
                &["asg"]
            )
            .expect("Failed to register asg_desired_capacity"),

            asg_required_nodes: register_gauge_vec!(
                "autoscaler_asg_required_nodes",
                "Node requirement computed by the last decision",
                &["asg"]
            )
            .expect("Failed to register asg_required_nodes"),

            scaling_operations: register_int_counter_vec!(
                "autoscaler_scaling_operations_total",
                "Decision outcomes by reason",
                &["reason"]
            )
            .expect("Failed to register scaling_operations_total"),

            effector_errors: register_int_counter!(
                "autoscaler_effector_errors_total",
                "Rejected SetDesiredCapacity calls"
            )
            .expect("Failed to register effector_errors_total"),
        }
    }
}

/// Lightweight handle to the process-wide metrics.
#[derive(Clone)]
pub struct ScalerMetrics {
    _private: (),
}

impl Default for ScalerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScalerMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_iterations(&self) {
        self.inner().iterations.inc();
    }

    pub fn inc_iteration_errors(&self) {
        self.inner().iteration_errors.inc();
    }

    pub fn observe_snapshot_latency(&self, duration_secs: f64) {
        self.inner().snapshot_latency_seconds.observe(duration_secs);
    }

    pub fn observe_decision_latency(&self, duration_secs: f64) {
        self.inner().decision_latency_seconds.observe(duration_secs);
    }

    pub fn inc_effector_errors(&self) {
        self.inner().effector_errors.inc();
    }

    /// Record the outcome of one ASG decision.
    pub fn record_decision(&self, decision: &AsgDecision) {
        let inner = self.inner();
        inner
            .asg_desired_capacity
            .with_label_values(&[&decision.asg])
            .set(f64::from(decision.target));
        if let Some(required) = decision.required {
            inner
                .asg_required_nodes
                .with_label_values(&[&decision.asg])
                .set(f64::from(required));
        }
        inner
            .scaling_operations
            .with_label_values(&[decision.reason.as_str()])
            .inc();
    }
}

/// Structured log events for the autoscale loop.
#[derive(Clone, Default)]
pub struct StructuredLogger {
    _private: (),
}

impl StructuredLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_startup(&self, version: &str, interval_secs: u64, dry_run: bool) {
        info!(
            event = "autoscaler_started",
            version = %version,
            interval_secs,
            dry_run,
            "Autoscaler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "autoscaler_shutdown",
            reason = %reason,
            "Autoscaler shutting down"
        );
    }

    /// One line per ASG per iteration: current → required → target.
    pub fn log_decision(&self, decision: &AsgDecision) {
        info!(
            event = "scaling_decision",
            asg = %decision.asg,
            current = decision.current,
            required = decision.required,
            target = decision.target,
            reason = decision.reason.as_str(),
            "Scaling decision"
        );
    }

    pub fn log_capacity_change(&self, asg: &str, current: u32, target: u32, dry_run: bool) {
        info!(
            event = "capacity_change",
            asg = %asg,
            current,
            target,
            dry_run,
            "Changing desired capacity"
        );
    }

    pub fn log_effector_failure(&self, asg: &str, target: u32, error: &str) {
        warn!(
            event = "capacity_change_failed",
            asg = %asg,
            target,
            error = %error,
            "Failed to set desired capacity"
        );
    }

    pub fn log_iteration(&self, decisions: usize, changes: usize, failures: usize) {
        info!(
            event = "iteration_complete",
            decisions,
            changes,
            failures,
            "Iteration complete"
        );
    }
}
