//! tierform.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required input: {0}")]
    MissingInput(&'static str),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    pub stack: StackSection,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub file_system: FileSystemConfig,
    pub compute: ComputeConfig,
    pub identity: IdentityConfig,
    #[serde(default)]
    pub entry_point: EntryPointConfig,
    #[serde(default)]
    pub provisioning: ProvisioningConfig,
}

/// Inputs consumed from the surrounding environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSection {
    pub name: String,
    pub account: String,
    pub region: String,
    /// Reference to a pre-issued certificate for the HTTPS listener.
    pub certificate: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub cidr: String,
    pub availability_zones: u32,
    pub nat_gateways: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            cidr: "10.0.0.0/16".to_string(),
            availability_zones: 2,
            nat_gateways: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub engine: String,
    pub engine_version: String,
    pub instance_class: String,
    pub database_name: String,
    pub port: u16,
    pub admin_username: String,
    pub allocated_storage_gb: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine: "postgres".to_string(),
            engine_version: "15".to_string(),
            instance_class: "db.t3.micro".to_string(),
            database_name: "workspace".to_string(),
            port: 5432,
            admin_username: "dbadmin".to_string(),
            allocated_storage_gb: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSystemConfig {
    /// Path the volume is mounted at inside the container.
    pub mount_path: String,
    /// Root directory the access point scopes the file system to.
    pub root_directory: String,
    pub owner_uid: u32,
    pub owner_gid: u32,
    pub permissions: String,
}

impl Default for FileSystemConfig {
    fn default() -> Self {
        Self {
            mount_path: "/workspace".to_string(),
            root_directory: "/data".to_string(),
            owner_uid: 1000,
            owner_gid: 1000,
            permissions: "750".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeConfig {
    pub image: String,
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    #[serde(default = "default_memory")]
    pub memory: u32,
    #[serde(default = "default_container_port")]
    pub container_port: u16,
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
    /// Extra plain environment variables. Values may contain `${resource.attribute}`.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

fn default_cpu() -> u32 {
    1024
}

fn default_memory() -> u32 {
    2048
}

fn default_container_port() -> u16 {
    8080
}

fn default_desired_count() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Hosted authentication domain prefix; must be globally unique.
    pub domain_prefix: String,
    /// Bootstrap administrative user created by the reconciler.
    pub admin_username: String,
    pub admin_email: String,
    /// Promote the generated temporary password to a permanent one.
    #[serde(default)]
    pub permanent_password: bool,
    #[serde(default = "default_scopes")]
    pub oauth_scopes: Vec<String>,
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string(), "email".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntryPointConfig {
    pub port: u16,
    pub session_timeout: String,
    pub health_check: HealthCheckConfig,
}

impl Default for EntryPointConfig {
    fn default() -> Self {
        Self {
            port: 443,
            session_timeout: "1h".to_string(),
            health_check: HealthCheckConfig::default(),
        }
    }
}

/// Target group health check parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// HTTP path to probe (e.g., "/healthz").
    pub path: String,
    pub interval: String,
    pub timeout: String,
    /// Consecutive successes before a target is routable.
    pub healthy_threshold: u32,
    /// Consecutive failures before a target stops receiving traffic.
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            interval: "30s".to_string(),
            timeout: "5s".to_string(),
            healthy_threshold: 2,
            unhealthy_threshold: 3,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or(Duration::from_secs(30))
    }

    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(5))
    }
}

/// Orchestrator tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Upper bound on concurrently in-flight resource operations.
    pub max_parallel: usize,
    /// Attempts for a call rejected with a transient dependency error.
    pub max_attempts: u32,
    pub initial_backoff: String,
    pub max_backoff: String,
    pub poll_interval: String,
    pub ready_timeout: String,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            max_attempts: 5,
            initial_backoff: "1s".to_string(),
            max_backoff: "30s".to_string(),
            poll_interval: "2s".to_string(),
            ready_timeout: "30m".to_string(),
        }
    }
}

impl ProvisioningConfig {
    pub fn initial_backoff(&self) -> Duration {
        parse_duration(&self.initial_backoff).unwrap_or(Duration::from_secs(1))
    }

    pub fn max_backoff(&self) -> Duration {
        parse_duration(&self.max_backoff).unwrap_or(Duration::from_secs(30))
    }

    pub fn poll_interval(&self) -> Duration {
        parse_duration(&self.poll_interval).unwrap_or(Duration::from_secs(2))
    }

    pub fn ready_timeout(&self) -> Duration {
        parse_duration(&self.ready_timeout).unwrap_or(Duration::from_secs(30 * 60))
    }
}

impl StackConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StackConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check the inputs that must be present before anything is provisioned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("stack.name", &self.stack.name),
            ("stack.account", &self.stack.account),
            ("stack.region", &self.stack.region),
            ("stack.certificate", &self.stack.certificate),
            ("compute.image", &self.compute.image),
            ("identity.domain_prefix", &self.identity.domain_prefix),
            ("identity.admin_username", &self.identity.admin_username),
            ("identity.admin_email", &self.identity.admin_email),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingInput(field));
            }
        }

        validate_domain_prefix(&self.identity.domain_prefix)?;

        if self.network.availability_zones == 0 {
            return Err(ConfigError::Invalid {
                field: "network.availability_zones",
                reason: "at least one availability zone is required".to_string(),
            });
        }
        let health = &self.entry_point.health_check;
        if health.healthy_threshold == 0 || health.unhealthy_threshold == 0 {
            return Err(ConfigError::Invalid {
                field: "entry_point.health_check",
                reason: "thresholds must be at least 1".to_string(),
            });
        }
        if self.provisioning.max_parallel == 0 {
            return Err(ConfigError::Invalid {
                field: "provisioning.max_parallel",
                reason: "must be at least 1".to_string(),
            });
        }

        let provisioning = &self.provisioning;
        let durations = [
            ("provisioning.initial_backoff", &provisioning.initial_backoff),
            ("provisioning.max_backoff", &provisioning.max_backoff),
            ("provisioning.poll_interval", &provisioning.poll_interval),
            ("provisioning.ready_timeout", &provisioning.ready_timeout),
            ("entry_point.session_timeout", &self.entry_point.session_timeout),
            ("entry_point.health_check.interval", &health.interval),
            ("entry_point.health_check.timeout", &health.timeout),
        ];
        for (field, value) in durations {
            if parse_duration(value).is_none() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{value:?} is not a duration like 500ms, 5s, 2m or 1h"),
                });
            }
        }
        Ok(())
    }

    /// Scaffold a minimal tierform.toml for the given stack name.
    pub fn scaffold(name: &str) -> Self {
        StackConfig {
            stack: StackSection {
                name: name.to_string(),
                account: "000000000000".to_string(),
                region: "eu-west-1".to_string(),
                certificate: format!("certificate/{name}"),
            },
            network: NetworkConfig::default(),
            database: DatabaseConfig::default(),
            file_system: FileSystemConfig::default(),
            compute: ComputeConfig {
                image: "registry.example.com/workspace:latest".to_string(),
                cpu: default_cpu(),
                memory: default_memory(),
                container_port: default_container_port(),
                desired_count: default_desired_count(),
                environment: BTreeMap::new(),
            },
            identity: IdentityConfig {
                domain_prefix: format!("{name}-login"),
                admin_username: "admin".to_string(),
                admin_email: "admin@example.com".to_string(),
                permanent_password: false,
                oauth_scopes: default_scopes(),
            },
            entry_point: EntryPointConfig::default(),
            provisioning: ProvisioningConfig::default(),
        }
    }
}

fn validate_domain_prefix(prefix: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::Invalid {
        field: "identity.domain_prefix",
        reason: reason.to_string(),
    };
    if prefix.len() > 63 {
        return Err(invalid("longer than 63 characters"));
    }
    if prefix.starts_with('-') || prefix.ends_with('-') {
        return Err(invalid("must not start or end with a hyphen"));
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid("only lowercase letters, digits and hyphens are allowed"));
    }
    Ok(())
}

/// Parse a duration string like "5s", "500ms", "2m", "1h".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok()?.checked_mul(60).map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok()?.checked_mul(3600).map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
