//! Derived stack configuration: bootstrap script, ingress rules, container
//! health check, image URI, and log routing options

use std::collections::BTreeSet;

/// Port for inbound administrative (SSH) traffic
pub const ADMIN_PORT: u16 = 22;

/// Port for inbound HTTP traffic
pub const HTTP_PORT: u16 = 80;

/// Port for inbound HTTPS traffic
pub const HTTPS_PORT: u16 = 443;

/// Protocol for all ingress rules
pub const INGRESS_PROTOCOL: &str = "tcp";

/// Stream prefix for the `awslogs` driver
pub const LOG_STREAM_PREFIX: &str = "ecs";

/// A single security group ingress rule
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressRule {
    pub protocol: &'static str,
    pub port: u16,
    pub cidr: String,
}

/// Returns the ingress rules for a stack: administrative, HTTP, HTTPS, and
/// application-port traffic from the configured CIDR. Ports are deduplicated
/// (the application port may collide with HTTP or HTTPS).
pub fn ingress_rules(container_port: u16, cidr: &str) -> Vec<IngressRule> {
    let ports: BTreeSet<u16> = [ADMIN_PORT, HTTP_PORT, HTTPS_PORT, container_port]
        .into_iter()
        .collect();
    ports
        .into_iter()
        .map(|port| IngressRule {
            protocol: INGRESS_PROTOCOL,
            port,
            cidr: cidr.to_string(),
        })
        .collect()
}

/// Bootstrap script joining an instance to its ECS cluster
pub fn user_data(cluster: &str) -> String {
    format!("#!/bin/bash\necho \"ECS_CLUSTER={cluster}\" >> /etc/ecs/ecs.config\n")
}

/// Default container health check: curl the container port on localhost
pub fn default_health_check(container_port: u16) -> String {
    format!("curl -f http://localhost:{container_port}/ || exit 1")
}

/// Image URI for a repository in the target account's registry
pub fn image_uri(account: &str, region: &str, repository: &str, image_tag: &str) -> String {
    format!("{account}.dkr.ecr.{region}.amazonaws.com/{repository}:{image_tag}")
}

/// Log group for a stack's container output
pub fn log_group(tag: &str, stack: &str) -> String {
    format!("/ecs/{tag}/{stack}")
}

/// Options for the `awslogs` driver. The log group is created on first use;
/// the instance role carries the retention permission.
pub fn log_options(tag: &str, stack: &str, region: &str) -> Vec<(&'static str, String)> {
    vec![
        ("awslogs-group", log_group(tag, stack)),
        ("awslogs-region", region.to_string()),
        ("awslogs-stream-prefix", LOG_STREAM_PREFIX.to_string()),
        ("awslogs-create-group", "true".to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingress_rules_cover_expected_ports() {
        let rules = ingress_rules(8080, "0.0.0.0/0");
        let ports: Vec<u16> = rules.iter().map(|r| r.port).collect();
        assert_eq!(ports, vec![22, 80, 443, 8080]);
        assert!(rules.iter().all(|r| r.protocol == "tcp"));
        assert!(rules.iter().all(|r| r.cidr == "0.0.0.0/0"));
    }

    #[test]
    fn test_ingress_rules_deduplicate_application_port() {
        let rules = ingress_rules(80, "10.0.0.0/8");
        let ports: Vec<u16> = rules.iter().map(|r| r.port).collect();
        assert_eq!(ports, vec![22, 80, 443]);
    }

    #[test]
    fn test_user_data_joins_cluster() {
        let script = user_data("cms-cluster");
        assert!(script.starts_with("#!/bin/bash"));
        assert!(script.contains("ECS_CLUSTER=cms-cluster"));
        assert!(script.contains("/etc/ecs/ecs.config"));
    }

    #[test]
    fn test_default_health_check_targets_container_port() {
        let cmd = default_health_check(3000);
        assert!(cmd.contains("http://localhost:3000/"));
        assert!(cmd.ends_with("|| exit 1"));
    }

    #[test]
    fn test_image_uri_shape() {
        assert_eq!(
            image_uri("123456789012", "us-east-1", "cms", "latest"),
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/cms:latest"
        );
    }

    #[test]
    fn test_log_options() {
        let options = log_options("demo", "web", "eu-west-1");
        assert!(options.contains(&("awslogs-group", "/ecs/demo/web".to_string())));
        assert!(options.contains(&("awslogs-region", "eu-west-1".to_string())));
        assert!(options.contains(&("awslogs-create-group", "true".to_string())));
    }
}
