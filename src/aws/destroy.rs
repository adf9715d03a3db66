//! `destroy` subcommand for `aws`

use crate::aws::{
    autoscaling, deployer_directory, ec2, ecs, iam, resource_name, target_region, Config, Error,
    StackConfig, CONFIG_FILE_NAME, DESTROYED_FILE_NAME,
};
use aws_config::Region;
use futures::future::try_join_all;
use std::{fs::File, path::PathBuf};
use tracing::info;

/// Destroys all resources associated with a deployment, in reverse
/// construction order per stack. Partially created deployments are torn down
/// best-effort: absent resources are skipped.
pub async fn destroy(config_path: Option<&PathBuf>, tag: Option<&str>) -> Result<(), Error> {
    // Resolve configuration from an explicit file or persisted deployment state
    let config: Config = match (config_path, tag) {
        (Some(path), _) => {
            let config_file = File::open(path)?;
            serde_yaml::from_reader(config_file)?
        }
        (None, Some(tag)) => {
            let path = deployer_directory(Some(tag)).join(CONFIG_FILE_NAME);
            if !path.exists() {
                return Err(Error::DeploymentDoesNotExist(tag.to_string()));
            }
            let config_file = File::open(path)?;
            serde_yaml::from_reader(config_file)?
        }
        (None, None) => {
            return Err(Error::DeploymentDoesNotExist(
                "no --config or --tag provided".to_string(),
            ))
        }
    };
    let tag = &config.tag;
    info!(tag = tag.as_str(), "loaded configuration");

    // Refuse to destroy twice
    let tag_directory = deployer_directory(Some(tag));
    let destroyed_file = tag_directory.join(DESTROYED_FILE_NAME);
    if destroyed_file.exists() {
        return Err(Error::DeploymentAlreadyDestroyed(tag.clone()));
    }

    // Create service clients
    let region = target_region()?;
    let ec2_client = ec2::create_client(Region::new(region.clone())).await;
    let ecs_client = ecs::create_client(Region::new(region.clone())).await;
    let iam_client = iam::create_client(Region::new(region.clone())).await;
    let asg_client = autoscaling::create_client(Region::new(region)).await;

    // Tear down stacks concurrently
    let stack_futures: Vec<_> = config
        .stacks
        .iter()
        .map(|stack| {
            let ec2_client = ec2_client.clone();
            let ecs_client = ecs_client.clone();
            let iam_client = iam_client.clone();
            let asg_client = asg_client.clone();
            let tag = tag.clone();
            let vpc_id = config.vpc_id.clone();
            let stack = stack.clone();
            async move {
                destroy_stack(
                    &ec2_client,
                    &ecs_client,
                    &iam_client,
                    &asg_client,
                    &tag,
                    &vpc_id,
                    &stack,
                )
                .await
            }
        })
        .collect();
    try_join_all(stack_futures).await?;

    // Mark deployment as destroyed
    std::fs::create_dir_all(&tag_directory)?;
    File::create(destroyed_file)?;
    info!(tag = tag.as_str(), "destroyed deployment");
    Ok(())
}

/// Tears down a single stack in reverse construction order
async fn destroy_stack(
    ec2_client: &aws_sdk_ec2::Client,
    ecs_client: &aws_sdk_ecs::Client,
    iam_client: &aws_sdk_iam::Client,
    asg_client: &aws_sdk_autoscaling::Client,
    tag: &str,
    vpc_id: &str,
    stack: &StackConfig,
) -> Result<(), Error> {
    let cluster_exists = ecs::find_cluster(ecs_client, &stack.cluster).await?.is_some();

    // Workload: drain and delete the service
    let service_name = resource_name(tag, &stack.name, "service");
    if cluster_exists {
        if let Some(service) =
            ecs::describe_service(ecs_client, &stack.cluster, &service_name).await?
        {
            if service.status() == Some("ACTIVE") {
                ecs::scale_service(ecs_client, &stack.cluster, &service_name, 0).await?;
                ecs::wait_for_service_drained(ecs_client, &stack.cluster, &service_name).await?;
                ecs::delete_service(ecs_client, &stack.cluster, &service_name).await?;
                info!(
                    stack = stack.name.as_str(),
                    service = service_name.as_str(),
                    "deleted service"
                );
            }
        }
    }

    // Task definitions
    let family = resource_name(tag, &stack.name, "task");
    ecs::deregister_task_definitions(ecs_client, &family).await?;

    // Capacity: auto scaling group first (terminates instances), then the
    // capacity provider and cluster
    let asg_name = resource_name(tag, &stack.name, "auto scaling group");
    if autoscaling::get_auto_scaling_group_arn(asg_client, &asg_name)
        .await?
        .is_some()
    {
        autoscaling::delete_auto_scaling_group(asg_client, &asg_name).await?;
        autoscaling::wait_for_deleted(asg_client, &asg_name).await?;
        info!(
            stack = stack.name.as_str(),
            asg = asg_name.as_str(),
            "deleted auto scaling group"
        );
    }
    let provider_name = resource_name(tag, &stack.name, "capacity provider");
    if cluster_exists {
        ecs::detach_capacity_providers(ecs_client, &stack.cluster).await?;
    }
    if ecs::find_capacity_provider(ecs_client, &provider_name)
        .await?
        .is_some()
    {
        ecs::delete_capacity_provider(ecs_client, &provider_name).await?;
    }
    if cluster_exists {
        ecs::delete_cluster(ecs_client, &stack.cluster).await?;
        info!(
            stack = stack.name.as_str(),
            cluster = stack.cluster.as_str(),
            "deleted cluster"
        );
    }

    // Launch template
    let lt_name = resource_name(tag, &stack.name, "launch template");
    if ec2::find_launch_template(ec2_client, &lt_name).await?.is_some() {
        ec2::delete_launch_template(ec2_client, &lt_name).await?;
    }

    // Credential material (deleting a missing key pair is a no-op)
    let key_name = resource_name(tag, &stack.name, "key pair");
    ec2::delete_key_pair(ec2_client, &key_name).await?;

    // Security boundary: instances release their network interfaces
    // asynchronously after the group is deleted
    let sg_name = resource_name(tag, &stack.name, "security group");
    if let Some(sg_id) = ec2::find_security_group(ec2_client, vpc_id, &sg_name).await? {
        ec2::delete_security_group(ec2_client, &sg_id).await?;
        info!(
            stack = stack.name.as_str(),
            sg = sg_id.as_str(),
            "deleted security group"
        );
    }

    // Execution identity
    let role_name = resource_name(tag, &stack.name, "role");
    let profile_name = resource_name(tag, &stack.name, "instance profile");
    iam::delete_instance_role(iam_client, &role_name, &profile_name).await?;

    info!(stack = stack.name.as_str(), "destroyed stack");
    Ok(())
}
