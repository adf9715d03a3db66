//! Configuration-level checks for a two-stack deployment (a CMS and a web
//! front-end), exercising everything derivable without touching AWS.

use ecs_deployer::aws::{
    resource_name, services, validate_stacks, Config, ASG_HEALTH_CHECK_GRACE, CAPACITY_DESIRED,
    CAPACITY_MAX, CAPACITY_MIN, HEALTH_CHECK_INTERVAL, HEALTH_CHECK_RETRIES,
    HEALTH_CHECK_START_PERIOD, HEALTH_CHECK_TIMEOUT, SERVICE_DESIRED_COUNT,
};

const TWO_STACKS: &str = r#"
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
    health_check: "curl -f http://localhost:8080/admin/ping || exit 1"
  - name: web
    cluster: web-cluster
    repository: web
    container_port: 3000
    instance_type: t3.small
    cpu: 512
    memory: 768
"#;

fn two_stacks() -> Config {
    serde_yaml::from_str(TWO_STACKS).unwrap()
}

#[test]
fn test_two_stack_config_parses() {
    let config = two_stacks();
    assert_eq!(config.tag, "demo");
    assert_eq!(config.stacks.len(), 2);
    assert!(validate_stacks(&config).is_ok());
}

#[test]
fn test_resource_names_are_namespaced_per_stack() {
    let config = two_stacks();
    let kinds = [
        "security group",
        "key pair",
        "role",
        "instance profile",
        "launch template",
        "auto scaling group",
        "capacity provider",
        "task",
        "service",
    ];
    let mut names = std::collections::HashSet::new();
    for stack in &config.stacks {
        for kind in kinds {
            let name = resource_name(&config.tag, &stack.name, kind);
            assert!(name.starts_with("demo-"), "unexpected prefix: {name}");
            assert!(names.insert(name), "resource name collision");
        }
    }
    assert_eq!(names.len(), kinds.len() * config.stacks.len());
}

#[test]
fn test_ingress_covers_each_stack_port() {
    let config = two_stacks();
    for stack in &config.stacks {
        let rules = services::ingress_rules(stack.container_port, &stack.ingress_cidr);
        assert_eq!(rules.len(), 4);
        let ports: Vec<u16> = rules.iter().map(|r| r.port).collect();
        assert!(ports.contains(&22));
        assert!(ports.contains(&80));
        assert!(ports.contains(&443));
        assert!(ports.contains(&stack.container_port));
    }
}

#[test]
fn test_health_check_override_and_default() {
    let config = two_stacks();
    let cms = &config.stacks[0];
    let web = &config.stacks[1];
    assert_eq!(
        cms.health_check.as_deref(),
        Some("curl -f http://localhost:8080/admin/ping || exit 1")
    );
    assert!(web.health_check.is_none());
    let fallback = services::default_health_check(web.container_port);
    assert!(fallback.contains("http://localhost:3000/"));
}

#[test]
fn test_fixed_sizing_and_timing() {
    assert_eq!(
        (CAPACITY_MIN, CAPACITY_MAX, CAPACITY_DESIRED),
        (1, 1, 1),
        "capacity bounds"
    );
    assert_eq!(SERVICE_DESIRED_COUNT, 1);
    assert_eq!(ASG_HEALTH_CHECK_GRACE, 300);
    assert_eq!(
        (
            HEALTH_CHECK_INTERVAL,
            HEALTH_CHECK_TIMEOUT,
            HEALTH_CHECK_RETRIES,
            HEALTH_CHECK_START_PERIOD
        ),
        (30, 5, 2, 60)
    );
}

#[test]
fn test_user_data_targets_each_cluster() {
    let config = two_stacks();
    for stack in &config.stacks {
        let script = services::user_data(&stack.cluster);
        assert!(script.contains(&format!("ECS_CLUSTER={}", stack.cluster)));
    }
}

#[test]
fn test_image_uri_uses_stack_repository() {
    let config = two_stacks();
    for stack in &config.stacks {
        let uri = services::image_uri("123456789012", "us-east-1", &stack.repository, &stack.image_tag);
        assert!(uri.ends_with(&format!("/{}:latest", stack.repository)));
    }
}

#[test]
fn test_config_roundtrip_through_disk() {
    let dir = std::env::temp_dir().join("ecs_deployer_test_roundtrip");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.yaml");
    std::fs::write(&path, TWO_STACKS).unwrap();
    let config: Config = serde_yaml::from_reader(std::fs::File::open(&path).unwrap()).unwrap();
    let serialized = serde_yaml::to_string(&config).unwrap();
    let reparsed: Config = serde_yaml::from_str(&serialized).unwrap();
    assert_eq!(reparsed.stacks.len(), config.stacks.len());
    assert_eq!(reparsed.vpc_id, config.vpc_id);
    std::fs::remove_dir_all(&dir).ok();
}
