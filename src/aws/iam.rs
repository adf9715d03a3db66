//! AWS IAM SDK function wrappers for the instance execution identity

use crate::aws::{Error, MAX_POLL_ATTEMPTS, RETRY_INTERVAL};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_iam::{config::retry::ReconnectMode, Client as IamClient};
use std::time::Duration;
use tracing::{debug, info};

/// Trust policy allowing EC2 instances to assume the role
const ASSUME_ROLE_POLICY: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Effect": "Allow",
      "Principal": {"Service": "ec2.amazonaws.com"},
      "Action": "sts:AssumeRole"
    }
  ]
}"#;

/// Inline policy granting log-group creation and retention control
const LOG_RETENTION_POLICY: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Effect": "Allow",
      "Action": ["logs:CreateLogGroup", "logs:PutRetentionPolicy"],
      "Resource": "*"
    }
  ]
}"#;

/// Name of the inline log-retention policy
const LOG_RETENTION_POLICY_NAME: &str = "log-retention";

/// Managed policies attached to the instance role: systems management,
/// monitoring, and container-registry access
pub const MANAGED_POLICY_ARNS: [&str; 3] = [
    "arn:aws:iam::aws:policy/AmazonSSMManagedInstanceCore",
    "arn:aws:iam::aws:policy/CloudWatchAgentServerPolicy",
    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly",
];

/// Creates an IAM client for the specified AWS region
pub async fn create_client(region: Region) -> IamClient {
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
    IamClient::new(&config)
}

/// Creates the instance role with its inline and managed policies, wraps it
/// in an instance profile, and waits for the profile to carry the role
pub async fn create_instance_role(
    client: &IamClient,
    role_name: &str,
    profile_name: &str,
) -> Result<(), Error> {
    client
        .create_role()
        .role_name(role_name)
        .assume_role_policy_document(ASSUME_ROLE_POLICY)
        .send()
        .await
        .map_err(aws_sdk_iam::Error::from)?;
    client
        .put_role_policy()
        .role_name(role_name)
        .policy_name(LOG_RETENTION_POLICY_NAME)
        .policy_document(LOG_RETENTION_POLICY)
        .send()
        .await
        .map_err(aws_sdk_iam::Error::from)?;
    for arn in MANAGED_POLICY_ARNS {
        client
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(arn)
            .send()
            .await
            .map_err(aws_sdk_iam::Error::from)?;
    }
    client
        .create_instance_profile()
        .instance_profile_name(profile_name)
        .send()
        .await
        .map_err(aws_sdk_iam::Error::from)?;
    client
        .add_role_to_instance_profile()
        .instance_profile_name(profile_name)
        .role_name(role_name)
        .send()
        .await
        .map_err(aws_sdk_iam::Error::from)?;

    // Instance profiles propagate asynchronously; launching before the role
    // is visible fails instance startup.
    for _ in 0..MAX_POLL_ATTEMPTS {
        let resp = client
            .get_instance_profile()
            .instance_profile_name(profile_name)
            .send()
            .await
            .map_err(aws_sdk_iam::Error::from)?;
        if resp
            .instance_profile()
            .is_some_and(|p| !p.roles().is_empty())
        {
            info!(profile = profile_name, role = role_name, "instance profile ready");
            return Ok(());
        }
        debug!(profile = profile_name, "waiting for instance profile");
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
    Err(Error::InstanceProfileNotReady(profile_name.to_string()))
}

/// Returns whether the error indicates the entity no longer exists
fn is_no_such_entity(err: &aws_sdk_iam::Error) -> bool {
    matches!(err, aws_sdk_iam::Error::NoSuchEntityException(_))
}

/// Tears down the instance profile and role, tolerating partially created
/// state from a failed deployment
pub async fn delete_instance_role(
    client: &IamClient,
    role_name: &str,
    profile_name: &str,
) -> Result<(), Error> {
    if let Err(e) = client
        .remove_role_from_instance_profile()
        .instance_profile_name(profile_name)
        .role_name(role_name)
        .send()
        .await
        .map_err(aws_sdk_iam::Error::from)
    {
        if !is_no_such_entity(&e) {
            return Err(e.into());
        }
    }
    if let Err(e) = client
        .delete_instance_profile()
        .instance_profile_name(profile_name)
        .send()
        .await
        .map_err(aws_sdk_iam::Error::from)
    {
        if !is_no_such_entity(&e) {
            return Err(e.into());
        }
    }
    for arn in MANAGED_POLICY_ARNS {
        if let Err(e) = client
            .detach_role_policy()
            .role_name(role_name)
            .policy_arn(arn)
            .send()
            .await
            .map_err(aws_sdk_iam::Error::from)
        {
            if !is_no_such_entity(&e) {
                return Err(e.into());
            }
        }
    }
    if let Err(e) = client
        .delete_role_policy()
        .role_name(role_name)
        .policy_name(LOG_RETENTION_POLICY_NAME)
        .send()
        .await
        .map_err(aws_sdk_iam::Error::from)
    {
        if !is_no_such_entity(&e) {
            return Err(e.into());
        }
    }
    if let Err(e) = client
        .delete_role()
        .role_name(role_name)
        .send()
        .await
        .map_err(aws_sdk_iam::Error::from)
    {
        if !is_no_such_entity(&e) {
            return Err(e.into());
        }
    }
    Ok(())
}
