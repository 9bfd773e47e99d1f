//! Expands a `StackConfig` into the explicit resource descriptors of the
//! multi-tier topology.
//!
//! ```text
//! network ─┬─ db_credentials, app_admin_credentials, user_pool
//!          ├─ security groups ─┬─ database ◄── db_credentials
//!          │                   ├─ file_system ── access_point
//!          │                   └─ load_balancer
//!          ├─ cluster
//!          └─ target_group
//! task_definition ◄── database, access_point, secrets
//! service ◄── cluster, task_definition, target_group
//! user_pool ─ user_pool_domain
//! user_pool_client ◄── load_balancer.dns_name
//! admin_user ◄── user_pool, app_admin_credentials
//! listener ◄── load_balancer, target_group, client, domain, admin_user, service
//! ```
//!
//! The OAuth callback needs the load balancer's generated DNS name. The load
//! balancer and its listener are separate resources so the client can be
//! created after the address exists and before the listener attaches
//! authentication. No placeholder is ever patched in later.

use crate::config::StackConfig;
use crate::resource::{ResourceKind, ResourceSpec};

pub const NETWORK: &str = "network";
pub const DB_CREDENTIALS: &str = "db_credentials";
pub const APP_ADMIN_CREDENTIALS: &str = "app_admin_credentials";
pub const LB_SECURITY_GROUP: &str = "lb_security_group";
pub const SERVICE_SECURITY_GROUP: &str = "service_security_group";
pub const DATABASE_SECURITY_GROUP: &str = "database_security_group";
pub const FILE_SYSTEM_SECURITY_GROUP: &str = "file_system_security_group";
pub const DATABASE: &str = "database";
pub const FILE_SYSTEM: &str = "file_system";
pub const ACCESS_POINT: &str = "access_point";
pub const CLUSTER: &str = "cluster";
pub const TASK_DEFINITION: &str = "task_definition";
pub const TARGET_GROUP: &str = "target_group";
pub const SERVICE: &str = "service";
pub const LOAD_BALANCER: &str = "load_balancer";
pub const USER_POOL: &str = "user_pool";
pub const USER_POOL_DOMAIN: &str = "user_pool_domain";
pub const USER_POOL_CLIENT: &str = "user_pool_client";
pub const ADMIN_USER: &str = "admin_user";
pub const LISTENER: &str = "listener";

/// Path on the entry point the identity provider redirects back to.
pub const CALLBACK_PATH: &str = "/oauth2/idpresponse";

fn reference(resource: &str, attribute: &str) -> String {
    format!("${{{resource}.{attribute}}}")
}

impl StackConfig {
    /// The full set of resource descriptors for this stack.
    pub fn resources(&self) -> Vec<ResourceSpec> {
        let vpc = reference(NETWORK, "vpc_id");
        let private_subnets = reference(NETWORK, "private_subnet_ids");
        let db = &self.database;
        let fs = &self.file_system;
        let compute = &self.compute;
        let identity = &self.identity;
        let health = &self.entry_point.health_check;

        let mut resources = vec![
            ResourceSpec::new(NETWORK, ResourceKind::Network)
                .property("cidr", &self.network.cidr)
                .property("availability_zones", self.network.availability_zones)
                .property("nat_gateways", self.network.nat_gateways),
            ResourceSpec::new(DB_CREDENTIALS, ResourceKind::Secret)
                .depends_on(NETWORK)
                .property("username", &db.admin_username)
                .property("length", 30)
                .property("exclude_punctuation", true)
                .property("description", "database admin credentials"),
            ResourceSpec::new(APP_ADMIN_CREDENTIALS, ResourceKind::Secret)
                .depends_on(NETWORK)
                .property("username", &identity.admin_username)
                .property("length", 16)
                .property("exclude_punctuation", false)
                .property("description", "application admin credentials"),
            ResourceSpec::new(LB_SECURITY_GROUP, ResourceKind::SecurityGroup)
                .property("vpc_id", &vpc)
                .property("ingress.cidr", "0.0.0.0/0")
                .property("ingress.port", self.entry_point.port),
            ResourceSpec::new(SERVICE_SECURITY_GROUP, ResourceKind::SecurityGroup)
                .property("vpc_id", &vpc)
                .property("ingress.source", reference(LB_SECURITY_GROUP, "group_id"))
                .property("ingress.port", compute.container_port),
            ResourceSpec::new(DATABASE_SECURITY_GROUP, ResourceKind::SecurityGroup)
                .property("vpc_id", &vpc)
                .property("ingress.source", reference(SERVICE_SECURITY_GROUP, "group_id"))
                .property("ingress.port", db.port),
            ResourceSpec::new(FILE_SYSTEM_SECURITY_GROUP, ResourceKind::SecurityGroup)
                .property("vpc_id", &vpc)
                .property("ingress.source", reference(SERVICE_SECURITY_GROUP, "group_id"))
                .property("ingress.port", 2049),
            ResourceSpec::new(DATABASE, ResourceKind::Database)
                .property("engine", &db.engine)
                .property("engine_version", &db.engine_version)
                .property("instance_class", &db.instance_class)
                .property("database_name", &db.database_name)
                .property("port", db.port)
                .property("allocated_storage_gb", db.allocated_storage_gb)
                .property("subnet_ids", &private_subnets)
                .property("security_group", reference(DATABASE_SECURITY_GROUP, "group_id"))
                .property("credentials_secret", reference(DB_CREDENTIALS, "secret_id"))
                .property("removal_policy", "destroy"),
            ResourceSpec::new(FILE_SYSTEM, ResourceKind::FileSystem)
                .property("subnet_ids", &private_subnets)
                .property("security_group", reference(FILE_SYSTEM_SECURITY_GROUP, "group_id"))
                .property("encrypted", true)
                .property("removal_policy", "destroy"),
            ResourceSpec::new(ACCESS_POINT, ResourceKind::AccessPoint)
                .property("file_system_id", reference(FILE_SYSTEM, "file_system_id"))
                .property("root_directory", &fs.root_directory)
                .property("owner_uid", fs.owner_uid)
                .property("owner_gid", fs.owner_gid)
                .property("permissions", &fs.permissions),
            ResourceSpec::new(CLUSTER, ResourceKind::Cluster).property("vpc_id", &vpc),
        ];

        let mut task = ResourceSpec::new(TASK_DEFINITION, ResourceKind::TaskDefinition)
            .property("image", &compute.image)
            .property("cpu", compute.cpu)
            .property("memory", compute.memory)
            .property("container_port", compute.container_port)
            .property("env.DB_HOST", reference(DATABASE, "endpoint"))
            .property("env.DB_PORT", reference(DATABASE, "port"))
            .property("env.DB_NAME", reference(DATABASE, "database_name"))
            .property("env.DB_USER", reference(DB_CREDENTIALS, "username"))
            .property("env.ADMIN_USER", reference(APP_ADMIN_CREDENTIALS, "username"))
            .property("secret.DB_PASSWORD", reference(DB_CREDENTIALS, "secret_id"))
            .property("secret.ADMIN_PASSWORD", reference(APP_ADMIN_CREDENTIALS, "secret_id"))
            .property("volume.file_system_id", reference(FILE_SYSTEM, "file_system_id"))
            .property("volume.access_point_id", reference(ACCESS_POINT, "access_point_id"))
            .property("volume.container_path", &fs.mount_path)
            .property("volume.read_only", false);
        for (key, value) in &compute.environment {
            task = task.property(format!("env.{key}"), value);
        }
        resources.push(task);

        resources.extend([
            ResourceSpec::new(TARGET_GROUP, ResourceKind::TargetGroup)
                .property("vpc_id", &vpc)
                .property("port", compute.container_port)
                .property("protocol", "HTTP")
                .property("health_check.path", &health.path)
                .property("health_check.interval", &health.interval)
                .property("health_check.timeout", &health.timeout)
                .property("health_check.healthy_threshold", health.healthy_threshold)
                .property("health_check.unhealthy_threshold", health.unhealthy_threshold),
            ResourceSpec::new(SERVICE, ResourceKind::Service)
                .property("cluster", reference(CLUSTER, "cluster_arn"))
                .property("task_definition", reference(TASK_DEFINITION, "task_definition_arn"))
                .property("desired_count", compute.desired_count)
                .property("subnet_ids", &private_subnets)
                .property("security_group", reference(SERVICE_SECURITY_GROUP, "group_id"))
                .property("target_group", reference(TARGET_GROUP, "target_group_arn"))
                .property("container_port", compute.container_port),
            ResourceSpec::new(LOAD_BALANCER, ResourceKind::LoadBalancer)
                .property("subnet_ids", reference(NETWORK, "public_subnet_ids"))
                .property("security_group", reference(LB_SECURITY_GROUP, "group_id"))
                .property("scheme", "internet-facing"),
            ResourceSpec::new(USER_POOL, ResourceKind::UserPool)
                .depends_on(NETWORK)
                .property("name", format!("{}-users", self.stack.name))
                .property("self_sign_up", false)
                .property("sign_in_alias", "email")
                .property("removal_policy", "destroy"),
            ResourceSpec::new(USER_POOL_DOMAIN, ResourceKind::UserPoolDomain)
                .property("user_pool_id", reference(USER_POOL, "user_pool_id"))
                .property("domain_prefix", &identity.domain_prefix)
                .property("region", &self.stack.region),
            ResourceSpec::new(USER_POOL_CLIENT, ResourceKind::UserPoolClient)
                .property("user_pool_id", reference(USER_POOL, "user_pool_id"))
                .property("generate_secret", true)
                .property("oauth_flow", "code")
                .property("scopes", identity.oauth_scopes.join(" "))
                .property(
                    "callback_url",
                    format!("https://{}{CALLBACK_PATH}", reference(LOAD_BALANCER, "dns_name")),
                ),
            ResourceSpec::new(ADMIN_USER, ResourceKind::ReconciledUser)
                .property("user_pool_id", reference(USER_POOL, "user_pool_id"))
                .property("username", &identity.admin_username)
                .property("attr.email", &identity.admin_email)
                .property("attr.email_verified", true)
                .property("temporary_password_secret", reference(APP_ADMIN_CREDENTIALS, "secret_id"))
                .property("permanent_password", identity.permanent_password),
            // The reconciled user and the compute service are not referenced by
            // any listener property, so they are ordered explicitly.
            ResourceSpec::new(LISTENER, ResourceKind::Listener)
                .depends_on(ADMIN_USER)
                .depends_on(SERVICE)
                .property("load_balancer", reference(LOAD_BALANCER, "load_balancer_arn"))
                .property("port", self.entry_point.port)
                .property("protocol", "HTTPS")
                .property("certificate", &self.stack.certificate)
                .property("target_group", reference(TARGET_GROUP, "target_group_arn"))
                .property("auth.user_pool_arn", reference(USER_POOL, "user_pool_arn"))
                .property("auth.client_id", reference(USER_POOL_CLIENT, "client_id"))
                .property("auth.domain", reference(USER_POOL_DOMAIN, "domain"))
                .property("auth.scope", identity.oauth_scopes.join(" "))
                .property("auth.session_timeout", &self.entry_point.session_timeout),
        ]);

        resources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::references;
    use std::collections::BTreeSet;

    fn names(config: &StackConfig) -> BTreeSet<String> {
        config.resources().into_iter().map(|r| r.name).collect()
    }

    #[test]
    fn resource_names_are_unique() {
        let config = StackConfig::scaffold("demo");
        let resources = config.resources();
        assert_eq!(resources.len(), names(&config).len());
    }

    #[test]
    fn every_reference_targets_a_declared_attribute() {
        let config = StackConfig::scaffold("demo");
        let resources = config.resources();
        for resource in &resources {
            for value in resource.properties.values() {
                for r in references(value) {
                    let target = resources
                        .iter()
                        .find(|t| t.name == r.resource)
                        .unwrap_or_else(|| panic!("{} references unknown {}", resource.name, r));
                    assert!(
                        target.kind.output_attributes().contains(&r.attribute.as_str()),
                        "{} references undeclared attribute {}",
                        resource.name,
                        r
                    );
                }
            }
        }
    }

    #[test]
    fn callback_url_targets_load_balancer_address() {
        let config = StackConfig::scaffold("demo");
        let client = config
            .resources()
            .into_iter()
            .find(|r| r.name == USER_POOL_CLIENT)
            .unwrap();
        assert_eq!(
            client.properties["callback_url"],
            "https://${load_balancer.dns_name}/oauth2/idpresponse"
        );
    }

    #[test]
    fn custom_environment_is_carried_into_task() {
        let mut config = StackConfig::scaffold("demo");
        config
            .compute
            .environment
            .insert("LOG_LEVEL".to_string(), "debug".to_string());
        let task = config
            .resources()
            .into_iter()
            .find(|r| r.name == TASK_DEFINITION)
            .unwrap();
        assert_eq!(task.properties["env.LOG_LEVEL"], "debug");
        assert_eq!(task.properties["env.DB_HOST"], "${database.endpoint}");
    }

    #[test]
    fn listener_orders_after_reconciled_user_and_service() {
        let config = StackConfig::scaffold("demo");
        let listener = config
            .resources()
            .into_iter()
            .find(|r| r.name == LISTENER)
            .unwrap();
        assert!(listener.depends_on.contains(&ADMIN_USER.to_string()));
        assert!(listener.depends_on.contains(&SERVICE.to_string()));
    }

    #[test]
    fn network_is_the_only_root() {
        let config = StackConfig::scaffold("demo");
        let roots: Vec<String> = config
            .resources()
            .into_iter()
            .filter(|r| {
                r.depends_on.is_empty()
                    && r.properties.values().all(|v| references(v).is_empty())
            })
            .map(|r| r.name)
            .collect();
        assert_eq!(roots, vec![NETWORK.to_string()]);
    }
}
