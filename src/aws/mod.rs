//! AWS deployment of containerized service stacks.
//!
//! Each stack is provisioned in strict construction order: network lookup,
//! security group, key pair, instance role, cluster, capacity (launch
//! template + auto scaling group registered as a capacity provider), and
//! finally the task definition and long-running service. Stacks have no
//! interdependency and are provisioned concurrently.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod autoscaling;
mod create;
pub use create::create;
mod destroy;
pub use destroy::destroy;
pub mod ec2;
pub mod ecs;
pub mod iam;
mod list;
pub use list::list;
pub mod services;
mod status;
pub use status::status;

pub const CMD: &str = "aws";
pub const CREATE_CMD: &str = "create";
pub const DESTROY_CMD: &str = "destroy";
pub const LIST_CMD: &str = "list";
pub const STATUS_CMD: &str = "status";

/// File created in the deployment directory once creation completes
pub const CREATED_FILE_NAME: &str = "created";

/// File created in the deployment directory once destruction completes
pub const DESTROYED_FILE_NAME: &str = "destroyed";

/// Name of the metadata file persisted in the deployment directory
pub const METADATA_FILE_NAME: &str = "metadata.yaml";

/// Name of the resolved configuration persisted in the deployment directory
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Fixed capacity bounds for each stack's auto scaling group
pub const CAPACITY_MIN: i32 = 1;
pub const CAPACITY_MAX: i32 = 1;
pub const CAPACITY_DESIRED: i32 = 1;

/// Grace period before the auto scaling group starts health checking (seconds)
pub const ASG_HEALTH_CHECK_GRACE: i32 = 300;

/// Container health check timing
pub const HEALTH_CHECK_INTERVAL: i32 = 30;
pub const HEALTH_CHECK_TIMEOUT: i32 = 5;
pub const HEALTH_CHECK_RETRIES: i32 = 2;
pub const HEALTH_CHECK_START_PERIOD: i32 = 60;

/// Desired number of running tasks per service
pub const SERVICE_DESIRED_COUNT: i32 = 1;

/// Deployment percentages: with a single container instance and a fixed host
/// port, the old task must stop before a replacement can bind.
pub const SERVICE_MIN_HEALTHY_PERCENT: i32 = 0;
pub const SERVICE_MAX_PERCENT: i32 = 100;

/// Maximum number of polling attempts while waiting on a state transition
pub const MAX_POLL_ATTEMPTS: usize = 60;

/// Interval between polling attempts
pub const RETRY_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// Environment variable supplying the target account
pub const ACCOUNT_ENV: &str = "AWS_ACCOUNT_ID";

/// Environment variables supplying the target region (first match wins)
pub const REGION_ENVS: [&str; 2] = ["AWS_REGION", "AWS_DEFAULT_REGION"];

/// Configuration for a single application stack
#[derive(Serialize, Deserialize, Clone)]
pub struct StackConfig {
    /// Stack identifier used to derive resource names
    pub name: String,
    /// ECS cluster name
    pub cluster: String,
    /// ECR repository holding the container image
    pub repository: String,
    /// Image tag within the repository
    #[serde(default = "default_image_tag")]
    pub image_tag: String,
    /// Port the container listens on (also used as the host port)
    pub container_port: u16,
    /// EC2 instance type backing the cluster
    pub instance_type: String,
    /// CPU units reserved for the container
    pub cpu: i32,
    /// Memory reservation for the container (MiB)
    pub memory: i32,
    /// Container health check command; a curl against the container port is
    /// used when unset
    #[serde(default)]
    pub health_check: Option<String>,
    /// Source CIDR for inbound administrative, HTTP, HTTPS, and
    /// application-port traffic
    #[serde(default = "default_ingress_cidr")]
    pub ingress_cidr: String,
}

fn default_image_tag() -> String {
    "latest".to_string()
}

fn default_ingress_cidr() -> String {
    "0.0.0.0/0".to_string()
}

/// Deployment configuration
#[derive(Serialize, Deserialize, Clone)]
pub struct Config {
    /// Deployment tag (names the deployment directory and all resources)
    pub tag: String,
    /// Identifier of the pre-existing VPC to deploy into
    pub vpc_id: String,
    /// Stacks to provision
    pub stacks: Vec<StackConfig>,
}

/// Metadata about a deployment, persisted at creation time
#[derive(Serialize, Deserialize, Clone)]
pub struct Metadata {
    pub tag: String,
    pub created_at: u64,
    pub region: String,
    pub stacks: Vec<String>,
}

/// Errors that can occur when deploying stacks
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid request: {0}")]
    Build(#[from] aws_smithy_types::error::operation::BuildError),
    #[error("aws ec2: {0}")]
    AwsEc2(#[from] aws_sdk_ec2::Error),
    #[error("aws ecs: {0}")]
    AwsEcs(#[from] aws_sdk_ecs::Error),
    #[error("aws iam: {0}")]
    AwsIam(#[from] aws_sdk_iam::Error),
    #[error("aws auto scaling: {0}")]
    AwsAutoScaling(#[from] aws_sdk_autoscaling::Error),
    #[error("deployment already exists")]
    CreationAttempted,
    #[error("deployment does not exist: {0}")]
    DeploymentDoesNotExist(String),
    #[error("deployment is not complete: {0}")]
    DeploymentNotComplete(String),
    #[error("deployment already destroyed: {0}")]
    DeploymentAlreadyDestroyed(String),
    #[error("no stacks defined")]
    NoStacks,
    #[error("duplicate stack name: {0}")]
    DuplicateStackName(String),
    #[error("missing environment variable: {0}")]
    MissingEnvironment(&'static str),
    #[error("vpc not found: {0}")]
    VpcNotFound(String),
    #[error("vpc has no subnets: {0}")]
    NoSubnets(String),
    #[error("no ecs-optimized ami available")]
    AmiNotFound,
    #[error("key pair material not returned: {0}")]
    KeyMaterialMissing(String),
    #[error("unexpected response: missing {0}")]
    UnexpectedResponse(&'static str),
    #[error("instance profile not ready: {0}")]
    InstanceProfileNotReady(String),
    #[error("service did not stabilize: {0}")]
    ServiceNotStable(String),
    #[error("service did not drain: {0}")]
    ServiceNotDrained(String),
    #[error("auto scaling group was not deleted: {0}")]
    AsgNotDeleted(String),
    #[error("security group was not deleted: {0}")]
    SecurityGroupNotDeleted(String),
}

/// Returns the directory used to persist deployment state. If a tag is
/// provided, the tag-specific subdirectory is returned.
pub fn deployer_directory(tag: Option<&str>) -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_else(|| ".".into());
    let base = PathBuf::from(home).join(".ecs_deployer");
    match tag {
        Some(tag) => base.join(tag),
        None => base,
    }
}

/// Derives a resource identifier from the deployment tag, the stack name, and
/// a title-cased resource kind (e.g. `demo-cms-SecurityGroup`).
pub fn resource_name(tag: &str, stack: &str, kind: &str) -> String {
    let mut title = String::with_capacity(kind.len());
    for word in kind.split([' ', '-', '_']).filter(|w| !w.is_empty()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            title.extend(first.to_uppercase());
            title.push_str(chars.as_str());
        }
    }
    format!("{tag}-{stack}-{title}")
}

/// Reads the target account from the environment
pub fn target_account() -> Result<String, Error> {
    std::env::var(ACCOUNT_ENV).map_err(|_| Error::MissingEnvironment(ACCOUNT_ENV))
}

/// Reads the target region from the environment
pub fn target_region() -> Result<String, Error> {
    for env in REGION_ENVS {
        if let Ok(region) = std::env::var(env) {
            if !region.is_empty() {
                return Ok(region);
            }
        }
    }
    Err(Error::MissingEnvironment(REGION_ENVS[0]))
}

/// Ensures stack names are unique and at least one stack is defined
pub fn validate_stacks(config: &Config) -> Result<(), Error> {
    if config.stacks.is_empty() {
        return Err(Error::NoStacks);
    }
    let mut names = std::collections::HashSet::new();
    for stack in &config.stacks {
        if !names.insert(stack.name.as_str()) {
            return Err(Error::DuplicateStackName(stack.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_name_title_cases_kind() {
        assert_eq!(
            resource_name("demo", "cms", "security group"),
            "demo-cms-SecurityGroup"
        );
        assert_eq!(
            resource_name("demo", "web", "auto scaling group"),
            "demo-web-AutoScalingGroup"
        );
        assert_eq!(resource_name("demo", "cms", "role"), "demo-cms-Role");
        assert_eq!(
            resource_name("demo", "cms", "launch-template"),
            "demo-cms-LaunchTemplate"
        );
    }

    #[test]
    fn test_resource_name_is_deterministic() {
        let a = resource_name("t", "s", "key pair");
        let b = resource_name("t", "s", "key pair");
        assert_eq!(a, b);
    }

    #[test]
    fn test_config_defaults() {
        let yaml = r#"
tag: demo
vpc_id: vpc-0123456789abcdef0
stacks:
  - name: cms
    cluster: cms-cluster
    repository: cms
    container_port: 8080
    instance_type: t3.small
    cpu: 512
    memory: 768
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let stack = &config.stacks[0];
        assert_eq!(stack.image_tag, "latest");
        assert_eq!(stack.ingress_cidr, "0.0.0.0/0");
        assert!(stack.health_check.is_none());
    }

    #[test]
    fn test_validate_stacks_rejects_duplicates() {
        let yaml = r#"
tag: demo
vpc_id: vpc-0123456789abcdef0
stacks:
  - name: cms
    cluster: a
    repository: a
    container_port: 8080
    instance_type: t3.small
    cpu: 512
    memory: 768
  - name: cms
    cluster: b
    repository: b
    container_port: 8081
    instance_type: t3.small
    cpu: 512
    memory: 768
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            validate_stacks(&config),
            Err(Error::DuplicateStackName(name)) if name == "cms"
        ));
    }

    #[test]
    fn test_validate_stacks_rejects_empty() {
        let config = Config {
            tag: "demo".to_string(),
            vpc_id: "vpc-0".to_string(),
            stacks: Vec::new(),
        };
        assert!(matches!(validate_stacks(&config), Err(Error::NoStacks)));
    }

    #[test]
    fn test_capacity_bounds_are_fixed_at_one() {
        assert_eq!(CAPACITY_MIN, 1);
        assert_eq!(CAPACITY_MAX, 1);
        assert_eq!(CAPACITY_DESIRED, 1);
        assert_eq!(SERVICE_DESIRED_COUNT, 1);
    }

    #[test]
    fn test_metadata_roundtrip() {
        let metadata = Metadata {
            tag: "demo".to_string(),
            created_at: 1700000000,
            region: "us-east-1".to_string(),
            stacks: vec!["cms".to_string(), "web".to_string()],
        };
        let yaml = serde_yaml::to_string(&metadata).unwrap();
        let parsed: Metadata = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.tag, metadata.tag);
        assert_eq!(parsed.created_at, metadata.created_at);
        assert_eq!(parsed.stacks, metadata.stacks);
    }
}
