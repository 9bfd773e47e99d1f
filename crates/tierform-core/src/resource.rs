//! Resource descriptors: the explicit data the orchestrator reads.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of managed resource a descriptor provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    SecurityGroup,
    Secret,
    Database,
    FileSystem,
    AccessPoint,
    Cluster,
    TaskDefinition,
    Service,
    TargetGroup,
    LoadBalancer,
    UserPool,
    UserPoolDomain,
    UserPoolClient,
    ReconciledUser,
    Listener,
}

impl ResourceKind {
    /// Attributes a resource of this kind exposes once it is ready.
    ///
    /// References to any other attribute are rejected before provisioning.
    pub fn output_attributes(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::Network => &["vpc_id", "private_subnet_ids", "public_subnet_ids"],
            ResourceKind::SecurityGroup => &["group_id"],
            ResourceKind::Secret => &["secret_id", "username"],
            ResourceKind::Database => &["endpoint", "port", "database_name"],
            ResourceKind::FileSystem => &["file_system_id"],
            ResourceKind::AccessPoint => &["access_point_id"],
            ResourceKind::Cluster => &["cluster_arn"],
            ResourceKind::TaskDefinition => &["task_definition_arn"],
            ResourceKind::Service => &["service_arn", "running_count"],
            ResourceKind::TargetGroup => &["target_group_arn"],
            ResourceKind::LoadBalancer => &["load_balancer_arn", "dns_name"],
            ResourceKind::UserPool => &["user_pool_id", "user_pool_arn"],
            ResourceKind::UserPoolDomain => &["domain"],
            ResourceKind::UserPoolClient => &["client_id"],
            ResourceKind::ReconciledUser => &["username"],
            ResourceKind::Listener => &["listener_arn"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::Secret => "secret",
            ResourceKind::Database => "database",
            ResourceKind::FileSystem => "file_system",
            ResourceKind::AccessPoint => "access_point",
            ResourceKind::Cluster => "cluster",
            ResourceKind::TaskDefinition => "task_definition",
            ResourceKind::Service => "service",
            ResourceKind::TargetGroup => "target_group",
            ResourceKind::LoadBalancer => "load_balancer",
            ResourceKind::UserPool => "user_pool",
            ResourceKind::UserPoolDomain => "user_pool_domain",
            ResourceKind::UserPoolClient => "user_pool_client",
            ResourceKind::ReconciledUser => "reconciled_user",
            ResourceKind::Listener => "listener",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of one resource: a node in the provisioning graph.
///
/// Edges come from `depends_on` (explicit) and from `${resource.attribute}`
/// references inside property values (implicit).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSpec {
    pub name: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            depends_on: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.properties.insert(key.into(), value.to_string());
        self
    }
}

/// A descriptor whose references have all been substituted with the ready
/// outputs of its dependencies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedResource {
    pub name: String,
    pub kind: ResourceKind,
    pub properties: BTreeMap<String, String>,
}

impl ResolvedResource {
    /// Stable content hash used to detect changes between applies.
    pub fn spec_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.as_str().as_bytes());
        for (key, value) in &self.properties {
            hasher.update([0u8]);
            hasher.update(key.as_bytes());
            hasher.update([1u8]);
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// All properties under a dotted prefix, with the prefix stripped.
    ///
    /// `prefixed("env")` on `{"env.DB_HOST": "h"}` yields `("DB_HOST", "h")`.
    pub fn prefixed<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.properties.iter().filter_map(move |(key, value)| {
            key.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.'))
                .map(|rest| (rest, value.as_str()))
        })
    }
}
