//! AWS ECS SDK function wrappers for the cluster, capacity provider, task
//! definition, and service

use crate::aws::{
    Error, HEALTH_CHECK_INTERVAL, HEALTH_CHECK_RETRIES, HEALTH_CHECK_START_PERIOD,
    HEALTH_CHECK_TIMEOUT, MAX_POLL_ATTEMPTS, RETRY_INTERVAL, SERVICE_DESIRED_COUNT,
    SERVICE_MAX_PERCENT, SERVICE_MIN_HEALTHY_PERCENT,
};
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ecs::{
    config::retry::ReconnectMode,
    types::{
        AutoScalingGroupProvider, CapacityProviderStrategyItem, ContainerDefinition,
        DeploymentConfiguration, HealthCheck, LogConfiguration, LogDriver, ManagedScaling,
        ManagedScalingStatus, ManagedTerminationProtection, NetworkMode, PortMapping, Service,
        TransportProtocol,
    },
    Client as EcsClient,
};
use std::time::Duration;
use tracing::debug;

/// Creates an ECS client for the specified AWS region
pub async fn create_client(region: Region) -> EcsClient {
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
    EcsClient::new(&config)
}

/// Creates a cluster and returns its ARN
pub async fn create_cluster(client: &EcsClient, name: &str) -> Result<String, Error> {
    let resp = client
        .create_cluster()
        .cluster_name(name)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    resp.cluster()
        .and_then(|c| c.cluster_arn())
        .map(String::from)
        .ok_or(Error::UnexpectedResponse("cluster arn"))
}

/// Returns the ARN of an active cluster, or None if it does not exist
pub async fn find_cluster(client: &EcsClient, name: &str) -> Result<Option<String>, Error> {
    let resp = client
        .describe_clusters()
        .clusters(name)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(resp
        .clusters()
        .iter()
        .find(|c| c.status() == Some("ACTIVE"))
        .and_then(|c| c.cluster_arn())
        .map(String::from))
}

/// Registers the auto scaling group as a capacity provider. Managed scaling
/// and termination protection are disabled: the group is fixed-size.
pub async fn create_capacity_provider(
    client: &EcsClient,
    name: &str,
    asg_arn: &str,
) -> Result<(), Error> {
    client
        .create_capacity_provider()
        .name(name)
        .auto_scaling_group_provider(
            AutoScalingGroupProvider::builder()
                .auto_scaling_group_arn(asg_arn)
                .managed_scaling(
                    ManagedScaling::builder()
                        .status(ManagedScalingStatus::Disabled)
                        .build(),
                )
                .managed_termination_protection(ManagedTerminationProtection::Disabled)
                .build()?,
        )
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(())
}

/// Binds a capacity provider to a cluster as its default strategy
pub async fn attach_capacity_provider(
    client: &EcsClient,
    cluster: &str,
    provider: &str,
) -> Result<(), Error> {
    client
        .put_cluster_capacity_providers()
        .cluster(cluster)
        .capacity_providers(provider)
        .default_capacity_provider_strategy(
            CapacityProviderStrategyItem::builder()
                .capacity_provider(provider)
                .weight(1)
                .build()?,
        )
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(())
}

/// Removes all capacity providers from a cluster
pub async fn detach_capacity_providers(client: &EcsClient, cluster: &str) -> Result<(), Error> {
    client
        .put_cluster_capacity_providers()
        .cluster(cluster)
        .set_capacity_providers(Some(Vec::new()))
        .set_default_capacity_provider_strategy(Some(Vec::new()))
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(())
}

/// Returns the ARN of a capacity provider, or None if it does not exist
pub async fn find_capacity_provider(
    client: &EcsClient,
    name: &str,
) -> Result<Option<String>, Error> {
    let resp = client
        .describe_capacity_providers()
        .capacity_providers(name)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(resp
        .capacity_providers()
        .first()
        .and_then(|p| p.capacity_provider_arn())
        .map(String::from))
}

/// Deletes a capacity provider
pub async fn delete_capacity_provider(client: &EcsClient, name: &str) -> Result<(), Error> {
    client
        .delete_capacity_provider()
        .capacity_provider(name)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(())
}

/// Registers a task definition with a single container: image, resource
/// reservations, port mapping (host port = container port), container-level
/// health check, and `awslogs` log routing. Returns the revision ARN.
#[allow(clippy::too_many_arguments)]
pub async fn register_task_definition(
    client: &EcsClient,
    family: &str,
    container_name: &str,
    image: &str,
    cpu: i32,
    memory: i32,
    container_port: u16,
    health_check: &str,
    log_options: &[(&'static str, String)],
) -> Result<String, Error> {
    let mut log_configuration = LogConfiguration::builder().log_driver(LogDriver::Awslogs);
    for (key, value) in log_options {
        log_configuration = log_configuration.options(*key, value);
    }
    let container = ContainerDefinition::builder()
        .name(container_name)
        .image(image)
        .cpu(cpu)
        .memory_reservation(memory)
        .essential(true)
        .port_mappings(
            PortMapping::builder()
                .container_port(container_port as i32)
                .host_port(container_port as i32)
                .protocol(TransportProtocol::Tcp)
                .build(),
        )
        .health_check(
            HealthCheck::builder()
                .command("CMD-SHELL")
                .command(health_check)
                .interval(HEALTH_CHECK_INTERVAL)
                .timeout(HEALTH_CHECK_TIMEOUT)
                .retries(HEALTH_CHECK_RETRIES)
                .start_period(HEALTH_CHECK_START_PERIOD)
                .build()?,
        )
        .log_configuration(log_configuration.build()?)
        .build();
    let resp = client
        .register_task_definition()
        .family(family)
        .network_mode(NetworkMode::Bridge)
        .container_definitions(container)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    resp.task_definition()
        .and_then(|t| t.task_definition_arn())
        .map(String::from)
        .ok_or(Error::UnexpectedResponse("task definition arn"))
}

/// Deregisters every revision of a task definition family
pub async fn deregister_task_definitions(client: &EcsClient, family: &str) -> Result<(), Error> {
    let resp = client
        .list_task_definitions()
        .family_prefix(family)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    for arn in resp.task_definition_arns() {
        client
            .deregister_task_definition()
            .task_definition(arn)
            .send()
            .await
            .map_err(aws_sdk_ecs::Error::from)?;
        debug!(task_definition = arn, "deregistered task definition");
    }
    Ok(())
}

/// Creates a long-running service on the cluster's capacity provider and
/// returns its ARN
pub async fn create_service(
    client: &EcsClient,
    cluster: &str,
    name: &str,
    task_definition: &str,
    provider: &str,
) -> Result<String, Error> {
    let resp = client
        .create_service()
        .cluster(cluster)
        .service_name(name)
        .task_definition(task_definition)
        .desired_count(SERVICE_DESIRED_COUNT)
        .capacity_provider_strategy(
            CapacityProviderStrategyItem::builder()
                .capacity_provider(provider)
                .weight(1)
                .build()?,
        )
        .deployment_configuration(
            DeploymentConfiguration::builder()
                .minimum_healthy_percent(SERVICE_MIN_HEALTHY_PERCENT)
                .maximum_percent(SERVICE_MAX_PERCENT)
                .build(),
        )
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    resp.service()
        .and_then(|s| s.service_arn())
        .map(String::from)
        .ok_or(Error::UnexpectedResponse("service arn"))
}

/// Describes a service, returning None if it does not exist
pub async fn describe_service(
    client: &EcsClient,
    cluster: &str,
    name: &str,
) -> Result<Option<Service>, Error> {
    let resp = client
        .describe_services()
        .cluster(cluster)
        .services(name)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(resp.services().first().cloned())
}

/// Waits until a service has all desired tasks running under a single
/// deployment
pub async fn wait_for_service_stable(
    client: &EcsClient,
    cluster: &str,
    name: &str,
) -> Result<(), Error> {
    for _ in 0..MAX_POLL_ATTEMPTS {
        if let Some(service) = describe_service(client, cluster, name).await? {
            if service.status() == Some("ACTIVE")
                && service.running_count() == service.desired_count()
                && service.running_count() > 0
                && service.deployments().len() == 1
            {
                return Ok(());
            }
            debug!(
                service = name,
                desired = service.desired_count(),
                running = service.running_count(),
                "waiting for service to stabilize"
            );
        }
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
    Err(Error::ServiceNotStable(name.to_string()))
}

/// Scales a service to the given desired count
pub async fn scale_service(
    client: &EcsClient,
    cluster: &str,
    name: &str,
    desired: i32,
) -> Result<(), Error> {
    client
        .update_service()
        .cluster(cluster)
        .service(name)
        .desired_count(desired)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(())
}

/// Waits until a service has no running tasks
pub async fn wait_for_service_drained(
    client: &EcsClient,
    cluster: &str,
    name: &str,
) -> Result<(), Error> {
    for _ in 0..MAX_POLL_ATTEMPTS {
        match describe_service(client, cluster, name).await? {
            Some(service) if service.running_count() > 0 => {
                debug!(
                    service = name,
                    running = service.running_count(),
                    "waiting for service to drain"
                );
                tokio::time::sleep(RETRY_INTERVAL).await;
            }
            _ => return Ok(()),
        }
    }
    Err(Error::ServiceNotDrained(name.to_string()))
}

/// Deletes a service
pub async fn delete_service(client: &EcsClient, cluster: &str, name: &str) -> Result<(), Error> {
    client
        .delete_service()
        .cluster(cluster)
        .service(name)
        .force(true)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(())
}

/// Deletes a cluster
pub async fn delete_cluster(client: &EcsClient, name: &str) -> Result<(), Error> {
    client
        .delete_cluster()
        .cluster(name)
        .send()
        .await
        .map_err(aws_sdk_ecs::Error::from)?;
    Ok(())
}
