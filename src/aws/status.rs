//! `status` subcommand for `aws`

use crate::aws::{
    deployer_directory, ecs, resource_name, target_region, Config, Error, CREATED_FILE_NAME,
    DESTROYED_FILE_NAME,
};
use aws_config::Region;
use std::{fs::File, path::PathBuf};
use tracing::{error, info};

/// Shows the deployed service identifier and task counts for each stack
pub async fn status(config_path: &PathBuf) -> Result<(), Error> {
    // Load configuration
    let config: Config = {
        let config_file = File::open(config_path)?;
        serde_yaml::from_reader(config_file)?
    };
    let tag = &config.tag;

    // Check deployment status
    let tag_directory = deployer_directory(Some(tag));
    let created_file = tag_directory.join(CREATED_FILE_NAME);
    if !created_file.exists() {
        return Err(Error::DeploymentNotComplete(tag.clone()));
    }
    let destroyed_file = tag_directory.join(DESTROYED_FILE_NAME);
    if destroyed_file.exists() {
        return Err(Error::DeploymentAlreadyDestroyed(tag.clone()));
    }

    // Describe each stack's service
    let region = target_region()?;
    let ecs_client = ecs::create_client(Region::new(region)).await;
    for stack in &config.stacks {
        let service_name = resource_name(tag, &stack.name, "service");
        match ecs::describe_service(&ecs_client, &stack.cluster, &service_name).await? {
            Some(service) => {
                info!(
                    stack = stack.name.as_str(),
                    service = service_name.as_str(),
                    arn = service.service_arn().unwrap_or("unknown"),
                    status = service.status().unwrap_or("unknown"),
                    desired = service.desired_count(),
                    running = service.running_count(),
                );
            }
            None => {
                error!(
                    stack = stack.name.as_str(),
                    service = service_name.as_str(),
                    "service not found"
                );
            }
        }
    }
    Ok(())
}
