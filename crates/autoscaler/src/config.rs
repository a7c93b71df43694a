//! Command line configuration
//!
//! Every scaling knob is a flag; quantity-valued flags are parsed at
//! startup and reject the process on malformed input.

use anyhow::{Context, Result};
use autoscaler_lib::driver::LoopConfig;
use autoscaler_lib::provider::DEFAULT_ASG_LABEL;
use autoscaler_lib::resources::{parse_quantity, Resource, ResourceVector};
use autoscaler_lib::ScalingConfig;
use clap::Parser;
use std::time::Duration;

/// Kubernetes autoscaler for AWS Auto Scaling Groups
#[derive(Parser, Debug)]
#[command(name = "asg-autoscaler")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Loop interval in seconds
    #[arg(long, env = "AUTOSCALER_INTERVAL", default_value_t = 60)]
    pub interval: u64,

    /// Run a single iteration and exit
    #[arg(long)]
    pub once: bool,

    /// Log intended changes without performing any
    #[arg(long)]
    pub dry_run: bool,

    /// CPU buffer percentage
    #[arg(long, default_value_t = 10)]
    pub buffer_cpu_percentage: u32,

    /// Memory buffer percentage
    #[arg(long, default_value_t = 10)]
    pub buffer_memory_percentage: u32,

    /// Pod-count buffer percentage
    #[arg(long, default_value_t = 10)]
    pub buffer_pods_percentage: u32,

    /// CPU buffer (fixed amount)
    #[arg(long, default_value = "200m")]
    pub buffer_cpu_fixed: String,

    /// Memory buffer (fixed amount)
    #[arg(long, default_value = "200Mi")]
    pub buffer_memory_fixed: String,

    /// Pod-count buffer (fixed amount)
    #[arg(long, default_value = "10")]
    pub buffer_pods_fixed: String,

    /// Minimum weakest-node units per ASG/zone partition
    #[arg(long, default_value_t = 1)]
    pub buffer_spare_nodes: u32,

    /// Count master nodes as schedulable capacity
    #[arg(long)]
    pub include_master_nodes: bool,

    /// Maximum decrease per ASG per iteration, in nodes
    #[arg(long, default_value_t = 1)]
    pub scale_down_step: u32,

    /// Alternative decrease cap as a percentage of the current capacity;
    /// the larger permitted decrease wins
    #[arg(long, default_value_t = 0)]
    pub scale_down_step_percentage: u32,

    /// Node label carrying the ASG name
    #[arg(long, env = "AUTOSCALER_ASG_LABEL", default_value = DEFAULT_ASG_LABEL)]
    pub asg_label: String,

    /// Port serving /healthz, /readyz and /metrics
    #[arg(long, env = "AUTOSCALER_API_PORT", default_value_t = 8080)]
    pub api_port: u16,

    /// Enable debug logging
    #[arg(long, short = 'd')]
    pub debug: bool,
}

impl Cli {
    pub fn scaling_config(&self) -> Result<ScalingConfig> {
        let buffer_fixed = ResourceVector::new(
            parse_quantity(&self.buffer_cpu_fixed, Resource::Cpu)
                .context("Invalid --buffer-cpu-fixed")?,
            parse_quantity(&self.buffer_memory_fixed, Resource::Memory)
                .context("Invalid --buffer-memory-fixed")?,
            parse_quantity(&self.buffer_pods_fixed, Resource::Pods)
                .context("Invalid --buffer-pods-fixed")?,
        );
        Ok(ScalingConfig {
            buffer_cpu_percent: self.buffer_cpu_percentage,
            buffer_memory_percent: self.buffer_memory_percentage,
            buffer_pods_percent: self.buffer_pods_percentage,
            buffer_fixed,
            spare_nodes: self.buffer_spare_nodes,
            include_master_nodes: self.include_master_nodes,
            scale_down_step: self.scale_down_step,
            scale_down_step_percent: self.scale_down_step_percentage,
        })
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            interval: Duration::from_secs(self.interval),
            dry_run: self.dry_run,
        }
    }
}
