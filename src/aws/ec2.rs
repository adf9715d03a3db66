//! AWS EC2 SDK function wrappers for network, credential, and capacity
//! resources

use crate::aws::{services::IngressRule, Error, MAX_POLL_ATTEMPTS, RETRY_INTERVAL};
use aws_config::BehaviorVersion;
pub use aws_config::Region;
use aws_sdk_ec2::{
    config::retry::ReconnectMode,
    types::{
        Filter, IpPermission, IpRange, LaunchTemplateIamInstanceProfileSpecificationRequest,
        LaunchTemplateTagSpecificationRequest, RequestLaunchTemplateData, ResourceType, Tag,
        TagSpecification,
    },
    Client as Ec2Client,
};
pub use aws_sdk_ec2::types::InstanceType;
use std::time::Duration;
use tracing::debug;

/// Name filter for the ECS-optimized machine image
const ECS_AMI_NAME_PATTERN: &str = "al2023-ami-ecs-hvm-*-x86_64";

/// Creates an EC2 client for the specified AWS region
pub async fn create_client(region: Region) -> Ec2Client {
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
    Ec2Client::new(&config)
}

/// Resolves a pre-existing VPC by identifier
pub async fn lookup_vpc(client: &Ec2Client, vpc_id: &str) -> Result<String, Error> {
    let resp = client
        .describe_vpcs()
        .vpc_ids(vpc_id)
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    let vpc = resp
        .vpcs()
        .first()
        .ok_or_else(|| Error::VpcNotFound(vpc_id.to_string()))?;
    vpc.vpc_id()
        .map(String::from)
        .ok_or(Error::UnexpectedResponse("vpc id"))
}

/// Lists the subnets of a VPC, ordered by availability zone
pub async fn lookup_subnets(client: &Ec2Client, vpc_id: &str) -> Result<Vec<String>, Error> {
    let resp = client
        .describe_subnets()
        .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    let mut subnets: Vec<(String, String)> = resp
        .subnets()
        .iter()
        .filter_map(|s| {
            Some((
                s.availability_zone()?.to_string(),
                s.subnet_id()?.to_string(),
            ))
        })
        .collect();
    if subnets.is_empty() {
        return Err(Error::NoSubnets(vpc_id.to_string()));
    }
    subnets.sort();
    Ok(subnets.into_iter().map(|(_, id)| id).collect())
}

/// Creates a security group with the provided ingress rules. Egress is left
/// at the EC2 default (all outbound allowed).
pub async fn create_security_group(
    client: &Ec2Client,
    vpc_id: &str,
    name: &str,
    tag: &str,
    rules: &[IngressRule],
) -> Result<String, Error> {
    let resp = client
        .create_security_group()
        .group_name(name)
        .description(format!("deployer-managed security group for {tag}"))
        .vpc_id(vpc_id)
        .tag_specifications(
            TagSpecification::builder()
                .resource_type(ResourceType::SecurityGroup)
                .tags(Tag::builder().key("Name").value(name).build())
                .tags(Tag::builder().key("deployer").value(tag).build())
                .build(),
        )
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    let sg_id = resp
        .group_id()
        .map(String::from)
        .ok_or(Error::UnexpectedResponse("security group id"))?;

    let mut request = client.authorize_security_group_ingress().group_id(&sg_id);
    for rule in rules {
        request = request.ip_permissions(
            IpPermission::builder()
                .ip_protocol(rule.protocol)
                .from_port(rule.port as i32)
                .to_port(rule.port as i32)
                .ip_ranges(IpRange::builder().cidr_ip(&rule.cidr).build())
                .build(),
        );
    }
    request.send().await.map_err(aws_sdk_ec2::Error::from)?;
    Ok(sg_id)
}

/// Finds a security group by name within a VPC
pub async fn find_security_group(
    client: &Ec2Client,
    vpc_id: &str,
    name: &str,
) -> Result<Option<String>, Error> {
    let resp = client
        .describe_security_groups()
        .filters(Filter::builder().name("vpc-id").values(vpc_id).build())
        .filters(Filter::builder().name("group-name").values(name).build())
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    Ok(resp
        .security_groups()
        .first()
        .and_then(|sg| sg.group_id())
        .map(String::from))
}

/// Deletes a security group, retrying while network interfaces from
/// terminating instances still reference it
pub async fn delete_security_group(client: &Ec2Client, sg_id: &str) -> Result<(), Error> {
    for _ in 0..MAX_POLL_ATTEMPTS {
        match client.delete_security_group().group_id(sg_id).send().await {
            Ok(_) => return Ok(()),
            Err(e) => {
                debug!(sg = sg_id, error = ?e, "security group still in use");
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
        }
    }
    Err(Error::SecurityGroupNotDeleted(sg_id.to_string()))
}

/// Creates a key pair and returns the platform-generated private key material
pub async fn create_key_pair(client: &Ec2Client, name: &str) -> Result<String, Error> {
    let resp = client
        .create_key_pair()
        .key_name(name)
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    resp.key_material()
        .map(String::from)
        .ok_or_else(|| Error::KeyMaterialMissing(name.to_string()))
}

/// Deletes a key pair (a no-op if it does not exist)
pub async fn delete_key_pair(client: &Ec2Client, name: &str) -> Result<(), Error> {
    client
        .delete_key_pair()
        .key_name(name)
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    Ok(())
}

/// Finds the newest Amazon-owned ECS-optimized machine image
pub async fn find_latest_ecs_ami(client: &Ec2Client) -> Result<String, Error> {
    let resp = client
        .describe_images()
        .owners("amazon")
        .filters(
            Filter::builder()
                .name("name")
                .values(ECS_AMI_NAME_PATTERN)
                .build(),
        )
        .filters(Filter::builder().name("state").values("available").build())
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    let mut images: Vec<_> = resp
        .images()
        .iter()
        .filter_map(|img| Some((img.creation_date()?.to_string(), img.image_id()?.to_string())))
        .collect();
    images.sort();
    images.pop().map(|(_, id)| id).ok_or(Error::AmiNotFound)
}

/// Creates a launch template carrying the full instance configuration: image,
/// instance type, key pair, security group, instance profile, and the
/// bootstrap script (base64-encoded)
#[allow(clippy::too_many_arguments)]
pub async fn create_launch_template(
    client: &Ec2Client,
    name: &str,
    ami_id: &str,
    instance_type: InstanceType,
    key_name: &str,
    sg_id: &str,
    instance_profile: &str,
    user_data: &str,
    tag: &str,
) -> Result<String, Error> {
    let resp = client
        .create_launch_template()
        .launch_template_name(name)
        .launch_template_data(
            RequestLaunchTemplateData::builder()
                .image_id(ami_id)
                .instance_type(instance_type)
                .key_name(key_name)
                .security_group_ids(sg_id)
                .iam_instance_profile(
                    LaunchTemplateIamInstanceProfileSpecificationRequest::builder()
                        .name(instance_profile)
                        .build(),
                )
                .user_data(aws_smithy_types::base64::encode(user_data))
                .tag_specifications(
                    LaunchTemplateTagSpecificationRequest::builder()
                        .resource_type(ResourceType::Instance)
                        .tags(Tag::builder().key("Name").value(name).build())
                        .tags(Tag::builder().key("deployer").value(tag).build())
                        .build(),
                )
                .build(),
        )
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    resp.launch_template()
        .and_then(|lt| lt.launch_template_id())
        .map(String::from)
        .ok_or(Error::UnexpectedResponse("launch template id"))
}

/// Finds a launch template by name
pub async fn find_launch_template(
    client: &Ec2Client,
    name: &str,
) -> Result<Option<String>, Error> {
    let resp = client
        .describe_launch_templates()
        .filters(
            Filter::builder()
                .name("launch-template-name")
                .values(name)
                .build(),
        )
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    Ok(resp
        .launch_templates()
        .first()
        .and_then(|lt| lt.launch_template_id())
        .map(String::from))
}

/// Deletes a launch template by name
pub async fn delete_launch_template(client: &Ec2Client, name: &str) -> Result<(), Error> {
    client
        .delete_launch_template()
        .launch_template_name(name)
        .send()
        .await
        .map_err(aws_sdk_ec2::Error::from)?;
    Ok(())
}
