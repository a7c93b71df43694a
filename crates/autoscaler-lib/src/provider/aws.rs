//! AWS Auto Scaling provider
//!
//! Thin adapter over `DescribeAutoScalingGroups` and `SetDesiredCapacity`.
//! Region and credentials come from the SDK's default provider chain
//! (environment, profile, IMDS).

use super::AutoscalingApi;
use crate::models::AsgInfo;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_autoscaling::Client;
use tracing::debug;

pub struct AwsAutoscalingApi {
    client: Client,
}

impl AwsAutoscalingApi {
    pub async fn connect() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self {
            client: Client::new(&config),
        }
    }
}

fn size(value: Option<i32>) -> u32 {
    value.unwrap_or(0).max(0) as u32
}

#[async_trait]
impl AutoscalingApi for AwsAutoscalingApi {
    async fn describe_asgs(&self, names: &[String]) -> Result<Vec<AsgInfo>> {
        let mut groups = Vec::new();
        let mut pages = self
            .client
            .describe_auto_scaling_groups()
            .set_auto_scaling_group_names(Some(names.to_vec()))
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.context("DescribeAutoScalingGroups failed")?;
            for group in page.auto_scaling_groups() {
                let name = group
                    .auto_scaling_group_name()
                    .context("ASG response is missing the group name")?
                    .to_string();
                groups.push(AsgInfo {
                    name,
                    min_size: size(group.min_size()),
                    max_size: size(group.max_size()),
                    desired_capacity: size(group.desired_capacity()),
                    zones: group.availability_zones().to_vec(),
                });
            }
        }
        debug!(requested = names.len(), found = groups.len(), "Described ASGs");
        Ok(groups)
    }

    async fn set_desired_capacity(&self, name: &str, capacity: u32) -> Result<()> {
        self.client
            .set_desired_capacity()
            .auto_scaling_group_name(name)
            .desired_capacity(i32::try_from(capacity).unwrap_or(i32::MAX))
            .send()
            .await
            .with_context(|| format!("SetDesiredCapacity({name}, {capacity}) failed"))?;
        Ok(())
    }
}
