//! Autoscaler library
//!
//! This crate provides the core functionality for:
//! - Resource quantity parsing and vector arithmetic
//! - Cluster partitioning and demand aggregation
//! - The per-ASG autoscale decision function
//! - Kubernetes and AWS provider adapters
//! - The periodic autoscale loop
//! - Health checks and observability

pub mod cluster;
pub mod decision;
pub mod driver;
pub mod health;
pub mod models;
pub mod observability;
pub mod provider;
pub mod resources;

pub use decision::{decide, AsgDecision, DecisionReason, ScalingConfig};
pub use driver::{AutoscaleLoop, IterationOutcome, IterationStatus, LoopConfig, StatusFeed};
pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse};
pub use models::*;
pub use observability::{ScalerMetrics, StructuredLogger};
pub use resources::{Resource, ResourceVector};
