//! AWS Auto Scaling SDK function wrappers for cluster capacity

use crate::aws::{
    Error, ASG_HEALTH_CHECK_GRACE, CAPACITY_DESIRED, CAPACITY_MAX, CAPACITY_MIN,
    MAX_POLL_ATTEMPTS, RETRY_INTERVAL,
};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_autoscaling::{
    config::retry::ReconnectMode, types::LaunchTemplateSpecification, Client as AutoScalingClient,
};
use std::time::Duration;
use tracing::debug;

/// Creates an Auto Scaling client for the specified AWS region
pub async fn create_client(region: Region) -> AutoScalingClient {
    let retry = aws_config::retry::RetryConfig::adaptive()
        .with_max_attempts(u32::MAX)
        .with_initial_backoff(Duration::from_millis(500))
        .with_max_backoff(Duration::from_secs(30))
        .with_reconnect_mode(ReconnectMode::ReconnectOnTransientError);
    let config = aws_config::defaults(BehaviorVersion::latest())
        .region(region)
        .retry_config(retry)
        .load()
        .await;
    AutoScalingClient::new(&config)
}

/// Creates a fixed-size auto scaling group from a launch template, spanning
/// the provided subnets, and returns its ARN
pub async fn create_auto_scaling_group(
    client: &AutoScalingClient,
    name: &str,
    launch_template_id: &str,
    subnets: &[String],
) -> Result<String, Error> {
    client
        .create_auto_scaling_group()
        .auto_scaling_group_name(name)
        .launch_template(
            LaunchTemplateSpecification::builder()
                .launch_template_id(launch_template_id)
                .version("$Latest")
                .build(),
        )
        .min_size(CAPACITY_MIN)
        .max_size(CAPACITY_MAX)
        .desired_capacity(CAPACITY_DESIRED)
        .health_check_grace_period(ASG_HEALTH_CHECK_GRACE)
        .vpc_zone_identifier(subnets.join(","))
        .termination_policies("Default")
        .send()
        .await
        .map_err(aws_sdk_autoscaling::Error::from)?;
    get_auto_scaling_group_arn(client, name)
        .await?
        .ok_or(Error::UnexpectedResponse("auto scaling group arn"))
}

/// Returns the ARN of an auto scaling group, or None if it does not exist
pub async fn get_auto_scaling_group_arn(
    client: &AutoScalingClient,
    name: &str,
) -> Result<Option<String>, Error> {
    let resp = client
        .describe_auto_scaling_groups()
        .auto_scaling_group_names(name)
        .send()
        .await
        .map_err(aws_sdk_autoscaling::Error::from)?;
    Ok(resp
        .auto_scaling_groups()
        .first()
        .and_then(|g| g.auto_scaling_group_arn())
        .map(String::from))
}

/// Deletes an auto scaling group, terminating its instances
pub async fn delete_auto_scaling_group(
    client: &AutoScalingClient,
    name: &str,
) -> Result<(), Error> {
    client
        .delete_auto_scaling_group()
        .auto_scaling_group_name(name)
        .force_delete(true)
        .send()
        .await
        .map_err(aws_sdk_autoscaling::Error::from)?;
    Ok(())
}

/// Waits until an auto scaling group is fully deleted
pub async fn wait_for_deleted(client: &AutoScalingClient, name: &str) -> Result<(), Error> {
    for _ in 0..MAX_POLL_ATTEMPTS {
        if get_auto_scaling_group_arn(client, name).await?.is_none() {
            return Ok(());
        }
        debug!(asg = name, "waiting for auto scaling group deletion");
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
    Err(Error::AsgNotDeleted(name.to_string()))
}
