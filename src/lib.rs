//! Deploy containerized service stacks on EC2-backed ECS capacity.
//!
//! Each stack described in a YAML configuration is provisioned against a
//! pre-existing VPC: a security group, a key pair, an instance role, an ECS
//! cluster, EC2 capacity (launch template + auto scaling group registered as
//! a capacity provider), and a single-container service with a container
//! health check and `awslogs` log routing.

cfg_if::cfg_if! {
    if #[cfg(feature = "aws")] {
        pub mod aws;
    }
}
