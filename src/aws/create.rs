//! `create` subcommand for `aws`

use crate::aws::{
    autoscaling, deployer_directory, ec2, ecs, iam, resource_name, services, target_account,
    target_region, validate_stacks, Config, Error, Metadata, StackConfig, CONFIG_FILE_NAME,
    CREATED_FILE_NAME, METADATA_FILE_NAME,
};
use aws_config::Region;
use aws_sdk_ec2::types::InstanceType;
use futures::future::try_join_all;
use std::{fs::File, path::PathBuf};
use tracing::info;

/// Provisions every stack in the configuration: network lookup, security
/// boundary, credential material, execution identity, cluster, capacity, and
/// workload, in strict construction order per stack
pub async fn create(config: &PathBuf) -> Result<(), Error> {
    // Load configuration from YAML file
    let config: Config = {
        let config_file = File::open(config)?;
        serde_yaml::from_reader(config_file)?
    };
    let tag = &config.tag;
    info!(tag = tag.as_str(), "loaded configuration");

    // Ensure stack names are unique before touching any resource
    validate_stacks(&config)?;

    // Resolve the target account and region from the environment
    let account = target_account()?;
    let region = target_region()?;
    info!(
        account = account.as_str(),
        region = region.as_str(),
        "resolved deployment target"
    );

    // Create a directory for deployment state
    let tag_directory = deployer_directory(Some(tag));
    if tag_directory.exists() {
        return Err(Error::CreationAttempted);
    }
    std::fs::create_dir_all(&tag_directory)?;
    info!(path = ?tag_directory, "created deployment directory");

    // Persist metadata and the resolved configuration early to enable
    // `destroy --tag` on failure
    let metadata = Metadata {
        tag: tag.clone(),
        created_at: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs(),
        region: region.clone(),
        stacks: config.stacks.iter().map(|s| s.name.clone()).collect(),
    };
    let metadata_file = File::create(tag_directory.join(METADATA_FILE_NAME))?;
    serde_yaml::to_writer(metadata_file, &metadata)?;
    let config_file = File::create(tag_directory.join(CONFIG_FILE_NAME))?;
    serde_yaml::to_writer(config_file, &config)?;
    info!("persisted deployment metadata");

    // Create service clients
    let ec2_client = ec2::create_client(Region::new(region.clone())).await;
    let ecs_client = ecs::create_client(Region::new(region.clone())).await;
    let iam_client = iam::create_client(Region::new(region.clone())).await;
    let asg_client = autoscaling::create_client(Region::new(region.clone())).await;

    // Resolve the pre-existing network
    let vpc_id = ec2::lookup_vpc(&ec2_client, &config.vpc_id).await?;
    let subnets = ec2::lookup_subnets(&ec2_client, &vpc_id).await?;
    info!(
        vpc = vpc_id.as_str(),
        subnet_count = subnets.len(),
        "resolved network"
    );

    // Select the machine image once for all stacks
    let ami_id = ec2::find_latest_ecs_ami(&ec2_client).await?;
    info!(ami = ami_id.as_str(), "selected machine image");

    // Provision stacks concurrently (steps within a stack are sequential)
    let stack_futures: Vec<_> = config
        .stacks
        .iter()
        .map(|stack| {
            let ec2_client = ec2_client.clone();
            let ecs_client = ecs_client.clone();
            let iam_client = iam_client.clone();
            let asg_client = asg_client.clone();
            let account = account.clone();
            let region = region.clone();
            let tag = tag.clone();
            let vpc_id = vpc_id.clone();
            let subnets = subnets.clone();
            let ami_id = ami_id.clone();
            let tag_directory = tag_directory.clone();
            let stack = stack.clone();
            async move {
                let service = create_stack(
                    &ec2_client,
                    &ecs_client,
                    &iam_client,
                    &asg_client,
                    &account,
                    &region,
                    &tag,
                    &vpc_id,
                    &subnets,
                    &ami_id,
                    &tag_directory,
                    &stack,
                )
                .await?;
                Ok::<_, Error>((stack.name.clone(), service))
            }
        })
        .collect();
    let deployed = try_join_all(stack_futures).await?;

    // Mark deployment as complete
    File::create(tag_directory.join(CREATED_FILE_NAME))?;
    for (stack, service) in &deployed {
        info!(
            stack = stack.as_str(),
            service = service.as_str(),
            "deployed service"
        );
    }
    info!(tag = tag.as_str(), "deployment complete");
    Ok(())
}

/// Provisions a single stack and returns the deployed service's ARN
#[allow(clippy::too_many_arguments)]
async fn create_stack(
    ec2_client: &aws_sdk_ec2::Client,
    ecs_client: &aws_sdk_ecs::Client,
    iam_client: &aws_sdk_iam::Client,
    asg_client: &aws_sdk_autoscaling::Client,
    account: &str,
    region: &str,
    tag: &str,
    vpc_id: &str,
    subnets: &[String],
    ami_id: &str,
    tag_directory: &std::path::Path,
    stack: &StackConfig,
) -> Result<String, Error> {
    // Security boundary
    let sg_name = resource_name(tag, &stack.name, "security group");
    let rules = services::ingress_rules(stack.container_port, &stack.ingress_cidr);
    let sg_id = ec2::create_security_group(ec2_client, vpc_id, &sg_name, tag, &rules).await?;
    info!(
        stack = stack.name.as_str(),
        sg = sg_id.as_str(),
        "created security group"
    );

    // Credential material (persist the platform-generated private key)
    let key_name = resource_name(tag, &stack.name, "key pair");
    let key_material = ec2::create_key_pair(ec2_client, &key_name).await?;
    let key_path = tag_directory.join(format!("id_rsa_{}", stack.name));
    std::fs::write(&key_path, key_material)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }
    info!(
        stack = stack.name.as_str(),
        key = key_name.as_str(),
        "created key pair"
    );

    // Execution identity
    let role_name = resource_name(tag, &stack.name, "role");
    let profile_name = resource_name(tag, &stack.name, "instance profile");
    iam::create_instance_role(iam_client, &role_name, &profile_name).await?;
    info!(
        stack = stack.name.as_str(),
        role = role_name.as_str(),
        "created instance role"
    );

    // Cluster
    let cluster_arn = ecs::create_cluster(ecs_client, &stack.cluster).await?;
    info!(
        stack = stack.name.as_str(),
        cluster = cluster_arn.as_str(),
        "created cluster"
    );

    // Capacity: launch template driving a fixed-size auto scaling group
    let lt_name = resource_name(tag, &stack.name, "launch template");
    let instance_type =
        InstanceType::try_parse(&stack.instance_type).expect("Invalid instance type");
    let user_data = services::user_data(&stack.cluster);
    let lt_id = ec2::create_launch_template(
        ec2_client,
        &lt_name,
        ami_id,
        instance_type,
        &key_name,
        &sg_id,
        &profile_name,
        &user_data,
        tag,
    )
    .await?;
    info!(
        stack = stack.name.as_str(),
        launch_template = lt_id.as_str(),
        "created launch template"
    );

    let asg_name = resource_name(tag, &stack.name, "auto scaling group");
    let asg_arn = autoscaling::create_auto_scaling_group(asg_client, &asg_name, &lt_id, subnets)
        .await?;
    info!(
        stack = stack.name.as_str(),
        asg = asg_name.as_str(),
        "created auto scaling group"
    );

    let provider_name = resource_name(tag, &stack.name, "capacity provider");
    ecs::create_capacity_provider(ecs_client, &provider_name, &asg_arn).await?;
    ecs::attach_capacity_provider(ecs_client, &stack.cluster, &provider_name).await?;
    info!(
        stack = stack.name.as_str(),
        provider = provider_name.as_str(),
        "registered capacity provider"
    );

    // Workload
    let family = resource_name(tag, &stack.name, "task");
    let image = services::image_uri(account, region, &stack.repository, &stack.image_tag);
    let health_check = stack
        .health_check
        .clone()
        .unwrap_or_else(|| services::default_health_check(stack.container_port));
    let log_options = services::log_options(tag, &stack.name, region);
    let task_definition = ecs::register_task_definition(
        ecs_client,
        &family,
        &stack.name,
        &image,
        stack.cpu,
        stack.memory,
        stack.container_port,
        &health_check,
        &log_options,
    )
    .await?;
    info!(
        stack = stack.name.as_str(),
        task_definition = task_definition.as_str(),
        image = image.as_str(),
        "registered task definition"
    );

    let service_name = resource_name(tag, &stack.name, "service");
    let service_arn = ecs::create_service(
        ecs_client,
        &stack.cluster,
        &service_name,
        &task_definition,
        &provider_name,
    )
    .await?;
    ecs::wait_for_service_stable(ecs_client, &stack.cluster, &service_name).await?;
    info!(
        stack = stack.name.as_str(),
        service = service_name.as_str(),
        "service is stable"
    );
    Ok(service_arn)
}
