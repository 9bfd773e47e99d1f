//! SimulatedCloud: an in-process stand-in for the managed services.
//!
//! Implements the three seams the orchestrator talks through
//! (`ResourceHandler`, `SecretReader`, `IdentityDirectory`) with:
//!
//! - configurable readiness latency (`ready_after_polls`)
//! - one-shot or repeated fault injection per resource and operation
//! - a call log, so tests can count side effects and check ordering
//! - an audit of which consumer read which secret
//! - a JSON snapshot file so separate CLI invocations share one "cloud"
//!
//! Provider-side validation mirrors what the real services reject: a
//! domain prefix is globally unique, a listener needs a certificate and a
//! registered client, a callback URL must be fully resolved.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tierform_core::{
    HandlerError, HandlerResult, Readiness, ResolvedResource, ResourceHandler, ResourceKind,
    SecretConsumer, SecretReader, SecretValue,
};
use tierform_identity::{DirectoryError, DirectoryResult, IdentityDirectory, UserStatus};

use crate::credentials::generate_password;

/// An operation a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SimOp {
    Create,
    Poll,
    Update,
    Delete,
    CreateUser,
    DeleteUser,
    SetUserPassword,
    ConfirmSignUp,
    UpdateUserAttributes,
}

impl SimOp {
    /// Whether the operation changes provider state.
    pub fn is_side_effect(&self) -> bool {
        !matches!(self, SimOp::Poll)
    }
}

/// One logged provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimCall {
    pub op: SimOp,
    /// Logical resource name, or `pool/username` for directory calls.
    pub target: String,
}

/// Injected failure: the next `times` calls of `op` on `target` fail.
#[derive(Debug, Clone)]
struct Fault {
    target: String,
    op: SimOp,
    error: HandlerError,
    times: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimResource {
    name: String,
    kind: ResourceKind,
    properties: BTreeMap<String, String>,
    outputs: BTreeMap<String, String>,
    polls_remaining: u32,
    /// Set once a service has launched its task.
    #[serde(default)]
    launched: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimSecret {
    username: String,
    value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimUser {
    status: UserStatus,
    attributes: BTreeMap<String, String>,
    permanent_password: bool,
}

/// Provider state. This is what the snapshot file holds.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Cloud {
    next_id: u64,
    resources: BTreeMap<String, SimResource>,
    secrets: BTreeMap<String, SimSecret>,
    domains: BTreeSet<String>,
    pools: BTreeSet<String>,
    /// Keyed by `pool/username`.
    users: BTreeMap<String, SimUser>,
}

impl Cloud {
    fn allocate(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:04}", self.next_id)
    }

    fn require(&self, resource: &ResolvedResource, key: &str) -> HandlerResult<String> {
        resource
            .get(key)
            .map(str::to_string)
            .ok_or_else(|| HandlerError::Invalid(format!("{} is missing {key}", resource.name)))
    }

    /// A property that must name something this provider already created.
    fn require_existing(&self, resource: &ResolvedResource, key: &str) -> HandlerResult<String> {
        let id = self.require(resource, key)?;
        let known = self.resources.values().any(|r| r.outputs.values().any(|v| *v == id))
            || self.secrets.contains_key(&id);
        if known {
            Ok(id)
        } else {
            Err(HandlerError::DependencyUnready(format!("{key} {id} does not exist yet")))
        }
    }

    fn find_by_output(&self, attribute: &str, value: &str) -> Option<&SimResource> {
        self.resources
            .values()
            .find(|r| r.outputs.get(attribute).map(String::as_str) == Some(value))
    }
}

#[derive(Default)]
pub struct SimulatedCloud {
    cloud: Mutex<Cloud>,
    ready_after_polls: u32,
    region: String,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<Vec<SimCall>>,
    secret_reads: Mutex<Vec<(String, SecretConsumer)>>,
    snapshot: Option<PathBuf>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SimulatedCloud {
    pub fn new() -> Self {
        Self {
            region: "local-1".to_string(),
            ..Default::default()
        }
    }

    /// Open a simulated cloud backed by a JSON snapshot file. A missing
    /// file starts an empty cloud.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let cloud = if path.exists() {
            let bytes = std::fs::read(path)
                .with_context(|| format!("reading simulator snapshot {}", path.display()))?;
            serde_json::from_slice(&bytes)
                .with_context(|| format!("parsing simulator snapshot {}", path.display()))?
        } else {
            Cloud::default()
        };
        Ok(Self {
            cloud: Mutex::new(cloud),
            snapshot: Some(path.to_path_buf()),
            ..Self::new()
        })
    }

    /// Write the snapshot back, if this cloud was opened from one.
    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating snapshot directory {}", parent.display()))?;
        }
        let json = serde_json::to_vec_pretty(&*lock(&self.cloud))?;
        std::fs::write(path, json)
            .with_context(|| format!("writing simulator snapshot {}", path.display()))?;
        debug!(path = %path.display(), "simulator snapshot saved");
        Ok(())
    }

    /// Number of `Pending` polls before a new resource reports ready.
    pub fn with_ready_after_polls(mut self, polls: u32) -> Self {
        self.ready_after_polls = polls;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Fail the next `times` calls of `op` on `target` with `error`.
    pub fn inject_fault(&self, target: &str, op: SimOp, error: HandlerError, times: u32) {
        lock(&self.faults).push(Fault {
            target: target.to_string(),
            op,
            error,
            times,
        });
    }

    /// Reserve a domain prefix as if another account owned it.
    pub fn claim_domain(&self, prefix: &str) {
        lock(&self.cloud).domains.insert(prefix.to_string());
    }

    pub fn calls(&self) -> Vec<SimCall> {
        lock(&self.calls).clone()
    }

    /// Calls that changed provider state.
    pub fn side_effects(&self) -> usize {
        lock(&self.calls).iter().filter(|c| c.op.is_side_effect()).count()
    }

    pub fn secret_reads(&self) -> Vec<(String, SecretConsumer)> {
        lock(&self.secret_reads).clone()
    }

    pub fn resource_count(&self) -> usize {
        lock(&self.cloud).resources.len()
    }

    pub fn user_exists(&self, pool_id: &str, username: &str) -> bool {
        lock(&self.cloud).users.contains_key(&format!("{pool_id}/{username}"))
    }

    /// Remove a resource behind the orchestrator's back.
    pub fn forget(&self, physical_id: &str) {
        lock(&self.cloud).resources.remove(physical_id);
    }

    /// Targets registered by running services in a target group, as
    /// `(target_id, address, port)`.
    pub fn service_targets(&self, target_group_arn: &str) -> Vec<(String, String, u16)> {
        let cloud = lock(&self.cloud);
        cloud
            .resources
            .iter()
            .filter(|(_, r)| {
                r.kind == ResourceKind::Service
                    && r.launched
                    && r.properties.get("target_group").map(String::as_str) == Some(target_group_arn)
            })
            .flat_map(|(id, r)| {
                let count: u32 = r.properties.get("desired_count").and_then(|c| c.parse().ok()).unwrap_or(0);
                let port: u16 = r
                    .properties
                    .get("container_port")
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(80);
                (0..count).map(move |i| (format!("{id}-task-{i}"), format!("10.0.1.{}", 10 + i), port))
            })
            .collect()
    }

    fn log(&self, op: SimOp, target: &str) {
        lock(&self.calls).push(SimCall {
            op,
            target: target.to_string(),
        });
    }

    /// Consume a matching injected fault, if any.
    fn take_fault(&self, target: &str, op: SimOp) -> Option<HandlerError> {
        let mut faults = lock(&self.faults);
        let index = faults.iter().position(|f| f.target == target && f.op == op)?;
        let fault = &mut faults[index];
        fault.times = fault.times.saturating_sub(1);
        let error = fault.error.clone();
        if fault.times == 0 {
            faults.remove(index);
        }
        Some(error)
    }

    fn name_of(&self, physical_id: &str) -> String {
        lock(&self.cloud)
            .resources
            .get(physical_id)
            .map(|r| r.name.clone())
            .unwrap_or_else(|| physical_id.to_string())
    }

    fn create_resource(&self, resource: &ResolvedResource) -> HandlerResult<String> {
        let mut cloud = lock(&self.cloud);
        let region = &self.region;
        let (id, outputs) = match resource.kind {
            ResourceKind::Network => {
                let id = cloud.allocate("vpc");
                let zones: u32 = resource.get("availability_zones").and_then(|z| z.parse().ok()).unwrap_or(2);
                let subnets = |tier: &str| {
                    (0..zones)
                        .map(|z| format!("{id}-{tier}-{z}"))
                        .collect::<Vec<_>>()
                        .join(",")
                };
                let outputs = BTreeMap::from([
                    ("vpc_id".to_string(), id.clone()),
                    ("private_subnet_ids".to_string(), subnets("private")),
                    ("public_subnet_ids".to_string(), subnets("public")),
                ]);
                (id, outputs)
            }
            ResourceKind::SecurityGroup => {
                cloud.require_existing(resource, "vpc_id")?;
                let id = cloud.allocate("sg");
                (id.clone(), BTreeMap::from([("group_id".to_string(), id)]))
            }
            ResourceKind::Secret => {
                let username = cloud.require(resource, "username")?;
                let length = resource.get("length").and_then(|l| l.parse().ok()).unwrap_or(30);
                let exclude = resource.get("exclude_punctuation") == Some("true");
                let id = cloud.allocate("secret");
                let value = generate_password(length, exclude);
                info!(
                    resource = %resource.name,
                    secret_id = %id,
                    fingerprint = %value.fingerprint(),
                    "secret generated"
                );
                cloud.secrets.insert(
                    id.clone(),
                    SimSecret {
                        username: username.clone(),
                        value: value.expose().to_string(),
                    },
                );
                let outputs = BTreeMap::from([
                    ("secret_id".to_string(), id.clone()),
                    ("username".to_string(), username),
                ]);
                (id, outputs)
            }
            ResourceKind::Database => {
                cloud.require_existing(resource, "credentials_secret")?;
                cloud.require_existing(resource, "security_group")?;
                let id = cloud.allocate("db");
                let outputs = BTreeMap::from([
                    ("endpoint".to_string(), format!("{id}.db.{region}.internal")),
                    ("port".to_string(), cloud.require(resource, "port")?),
                    ("database_name".to_string(), cloud.require(resource, "database_name")?),
                ]);
                (id, outputs)
            }
            ResourceKind::FileSystem => {
                cloud.require_existing(resource, "security_group")?;
                let id = cloud.allocate("fs");
                (id.clone(), BTreeMap::from([("file_system_id".to_string(), id)]))
            }
            ResourceKind::AccessPoint => {
                cloud.require_existing(resource, "file_system_id")?;
                let id = cloud.allocate("fsap");
                (id.clone(), BTreeMap::from([("access_point_id".to_string(), id)]))
            }
            ResourceKind::Cluster => {
                let id = cloud.allocate("cluster");
                let arn = format!("arn:sim:{region}:cluster/{id}");
                (id, BTreeMap::from([("cluster_arn".to_string(), arn)]))
            }
            ResourceKind::TaskDefinition => {
                for (key, secret_id) in resource.prefixed("secret") {
                    if !cloud.secrets.contains_key(secret_id) {
                        return Err(HandlerError::DependencyUnready(format!(
                            "secret {secret_id} bound to {key} does not exist yet"
                        )));
                    }
                }
                cloud.require_existing(resource, "volume.access_point_id")?;
                let id = cloud.allocate("taskdef");
                let arn = format!("arn:sim:{region}:task-definition/{id}:1");
                (id, BTreeMap::from([("task_definition_arn".to_string(), arn)]))
            }
            ResourceKind::Service => {
                cloud.require_existing(resource, "cluster")?;
                cloud.require_existing(resource, "task_definition")?;
                cloud.require_existing(resource, "target_group")?;
                let id = cloud.allocate("svc");
                let arn = format!("arn:sim:{region}:service/{id}");
                let outputs = BTreeMap::from([
                    ("service_arn".to_string(), arn),
                    ("running_count".to_string(), cloud.require(resource, "desired_count")?),
                ]);
                (id, outputs)
            }
            ResourceKind::TargetGroup => {
                let id = cloud.allocate("tg");
                let arn = format!("arn:sim:{region}:targetgroup/{id}");
                (id, BTreeMap::from([("target_group_arn".to_string(), arn)]))
            }
            ResourceKind::LoadBalancer => {
                cloud.require_existing(resource, "security_group")?;
                let id = cloud.allocate("lb");
                let outputs = BTreeMap::from([
                    ("load_balancer_arn".to_string(), format!("arn:sim:{region}:loadbalancer/{id}")),
                    ("dns_name".to_string(), format!("{id}.elb.{region}.sim.example")),
                ]);
                (id, outputs)
            }
            ResourceKind::UserPool => {
                let id = cloud.allocate("pool");
                cloud.pools.insert(id.clone());
                let outputs = BTreeMap::from([
                    ("user_pool_id".to_string(), id.clone()),
                    ("user_pool_arn".to_string(), format!("arn:sim:{region}:userpool/{id}")),
                ]);
                (id, outputs)
            }
            ResourceKind::UserPoolDomain => {
                let pool = cloud.require(resource, "user_pool_id")?;
                if !cloud.pools.contains(&pool) {
                    return Err(HandlerError::DependencyUnready(format!("pool {pool} does not exist yet")));
                }
                let prefix = cloud.require(resource, "domain_prefix")?;
                if !cloud.domains.insert(prefix.clone()) {
                    return Err(HandlerError::AlreadyExists(format!("domain prefix {prefix} is taken")));
                }
                let domain = format!("{prefix}.auth.{region}.sim.example");
                (prefix, BTreeMap::from([("domain".to_string(), domain)]))
            }
            ResourceKind::UserPoolClient => {
                let pool = cloud.require(resource, "user_pool_id")?;
                if !cloud.pools.contains(&pool) {
                    return Err(HandlerError::DependencyUnready(format!("pool {pool} does not exist yet")));
                }
                let callback = cloud.require(resource, "callback_url")?;
                if !callback.starts_with("https://") || callback.contains("${") {
                    return Err(HandlerError::Invalid(format!("callback URL {callback} is not a resolved https URL")));
                }
                let id = cloud.allocate("client");
                (id.clone(), BTreeMap::from([("client_id".to_string(), id)]))
            }
            ResourceKind::Listener => {
                let certificate = cloud.require(resource, "certificate")?;
                if certificate.is_empty() {
                    return Err(HandlerError::Invalid("listener needs a certificate".to_string()));
                }
                cloud.require_existing(resource, "load_balancer")?;
                cloud.require_existing(resource, "target_group")?;
                cloud.require_existing(resource, "auth.client_id")?;
                let id = cloud.allocate("listener");
                let arn = format!("arn:sim:{region}:listener/{id}");
                (id, BTreeMap::from([("listener_arn".to_string(), arn)]))
            }
            ResourceKind::ReconciledUser => {
                return Err(HandlerError::Invalid(
                    "reconciled users are provisioned through the identity reconciler".to_string(),
                ));
            }
        };

        cloud.resources.insert(
            id.clone(),
            SimResource {
                name: resource.name.clone(),
                kind: resource.kind,
                properties: resource.properties.clone(),
                outputs,
                polls_remaining: self.ready_after_polls,
                launched: false,
            },
        );
        Ok(id)
    }

    /// Launch a service's task: bind its secrets into the environment.
    fn launch_service(&self, service: &SimResource) -> HandlerResult<()> {
        let cloud = lock(&self.cloud);
        let task_arn = service.properties.get("task_definition").cloned().unwrap_or_default();
        let task = cloud
            .find_by_output("task_definition_arn", &task_arn)
            .ok_or_else(|| HandlerError::Service(format!("task definition {task_arn} vanished")))?;
        let bindings: Vec<(String, String)> = task
            .properties
            .iter()
            .filter_map(|(k, v)| k.strip_prefix("secret.").map(|name| (name.to_string(), v.clone())))
            .collect();
        drop(cloud);

        for (name, secret_id) in bindings {
            let value = self.read(&secret_id, SecretConsumer::TaskEnvironment)?;
            debug!(service = %service.name, env = %name, fingerprint = %value.fingerprint(), "secret bound");
        }
        Ok(())
    }

    fn read(&self, secret_id: &str, consumer: SecretConsumer) -> HandlerResult<SecretValue> {
        let cloud = lock(&self.cloud);
        let secret = cloud
            .secrets
            .get(secret_id)
            .ok_or_else(|| HandlerError::NotFound(format!("secret {secret_id}")))?;
        lock(&self.secret_reads).push((secret_id.to_string(), consumer));
        Ok(SecretValue::new(secret.value.clone()))
    }

    fn directory_fault(&self, op: SimOp, pool_id: &str, username: &str) -> DirectoryResult<String> {
        let key = format!("{pool_id}/{username}");
        self.log(op, &key);
        match self.take_fault(&key, op) {
            Some(HandlerError::AccessDenied(m)) => Err(DirectoryError::AccessDenied(m)),
            Some(e) => Err(DirectoryError::Service(e.to_string())),
            None => Ok(key),
        }
    }

    fn with_user<T>(
        &self,
        key: &str,
        pool_id: &str,
        f: impl FnOnce(&mut SimUser) -> T,
    ) -> DirectoryResult<T> {
        let mut cloud = lock(&self.cloud);
        if !cloud.pools.contains(pool_id) {
            return Err(DirectoryError::NotFound(format!("pool {pool_id}")));
        }
        let user = cloud
            .users
            .get_mut(key)
            .ok_or_else(|| DirectoryError::NotFound(format!("user {key}")))?;
        Ok(f(user))
    }
}

#[async_trait]
impl ResourceHandler for SimulatedCloud {
    async fn create(&self, resource: &ResolvedResource) -> HandlerResult<String> {
        self.log(SimOp::Create, &resource.name);
        if let Some(error) = self.take_fault(&resource.name, SimOp::Create) {
            return Err(error);
        }
        let id = self.create_resource(resource)?;
        debug!(resource = %resource.name, physical_id = %id, "simulated create");
        Ok(id)
    }

    async fn poll(&self, _kind: ResourceKind, physical_id: &str) -> HandlerResult<Readiness> {
        let name = self.name_of(physical_id);
        self.log(SimOp::Poll, &name);
        if let Some(error) = self.take_fault(&name, SimOp::Poll) {
            return Err(error);
        }

        let launch = {
            let mut cloud = lock(&self.cloud);
            let resource = cloud
                .resources
                .get_mut(physical_id)
                .ok_or_else(|| HandlerError::NotFound(physical_id.to_string()))?;
            if resource.polls_remaining > 0 {
                resource.polls_remaining -= 1;
                return Ok(Readiness::Pending);
            }
            let launch = resource.kind == ResourceKind::Service && !resource.launched;
            resource.launched = true;
            launch.then(|| resource.clone())
        };
        if let Some(service) = launch {
            self.launch_service(&service)?;
        }

        let cloud = lock(&self.cloud);
        let outputs = cloud
            .resources
            .get(physical_id)
            .map(|r| r.outputs.clone())
            .ok_or_else(|| HandlerError::NotFound(physical_id.to_string()))?;
        Ok(Readiness::Ready(outputs))
    }

    async fn update(&self, physical_id: &str, resource: &ResolvedResource) -> HandlerResult<()> {
        self.log(SimOp::Update, &resource.name);
        if let Some(error) = self.take_fault(&resource.name, SimOp::Update) {
            return Err(error);
        }
        let mut cloud = lock(&self.cloud);
        let existing = cloud
            .resources
            .get_mut(physical_id)
            .ok_or_else(|| HandlerError::NotFound(physical_id.to_string()))?;
        existing.properties = resource.properties.clone();
        existing.polls_remaining = self.ready_after_polls;
        if existing.kind == ResourceKind::Service {
            // Redeploy: the new task launches on the next ready poll.
            existing.launched = false;
            if let Some(count) = resource.get("desired_count") {
                existing.outputs.insert("running_count".to_string(), count.to_string());
            }
        }
        Ok(())
    }

    async fn delete(&self, _kind: ResourceKind, physical_id: &str) -> HandlerResult<()> {
        let name = self.name_of(physical_id);
        self.log(SimOp::Delete, &name);
        if let Some(error) = self.take_fault(&name, SimOp::Delete) {
            return Err(error);
        }
        let mut cloud = lock(&self.cloud);
        if cloud.secrets.remove(physical_id).is_some() {
            cloud.resources.remove(physical_id);
            return Ok(());
        }
        let removed = cloud
            .resources
            .remove(physical_id)
            .ok_or_else(|| HandlerError::NotFound(physical_id.to_string()))?;
        match removed.kind {
            ResourceKind::UserPool => {
                cloud.pools.remove(physical_id);
                let prefix = format!("{physical_id}/");
                cloud.users.retain(|key, _| !key.starts_with(&prefix));
            }
            ResourceKind::UserPoolDomain => {
                cloud.domains.remove(physical_id);
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl SecretReader for SimulatedCloud {
    async fn read_secret(&self, secret_id: &str, consumer: SecretConsumer) -> HandlerResult<SecretValue> {
        self.read(secret_id, consumer)
    }
}

#[async_trait]
impl IdentityDirectory for SimulatedCloud {
    async fn admin_create_user(
        &self,
        pool_id: &str,
        username: &str,
        attributes: &BTreeMap<String, String>,
        _temporary_password: &SecretValue,
    ) -> DirectoryResult<UserStatus> {
        let key = self.directory_fault(SimOp::CreateUser, pool_id, username)?;
        let mut cloud = lock(&self.cloud);
        if !cloud.pools.contains(pool_id) {
            return Err(DirectoryError::NotFound(format!("pool {pool_id}")));
        }
        if cloud.users.contains_key(&key) {
            return Err(DirectoryError::AlreadyExists(username.to_string()));
        }
        cloud.users.insert(
            key,
            SimUser {
                status: UserStatus::ForceChangePassword,
                attributes: attributes.clone(),
                permanent_password: false,
            },
        );
        Ok(UserStatus::ForceChangePassword)
    }

    async fn admin_delete_user(&self, pool_id: &str, username: &str) -> DirectoryResult<()> {
        let key = self.directory_fault(SimOp::DeleteUser, pool_id, username)?;
        let mut cloud = lock(&self.cloud);
        if !cloud.pools.contains(pool_id) {
            return Err(DirectoryError::NotFound(format!("pool {pool_id}")));
        }
        cloud
            .users
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| DirectoryError::NotFound(format!("user {key}")))
    }

    async fn admin_set_user_password(
        &self,
        pool_id: &str,
        username: &str,
        _password: &SecretValue,
        permanent: bool,
    ) -> DirectoryResult<()> {
        let key = self.directory_fault(SimOp::SetUserPassword, pool_id, username)?;
        self.with_user(&key, pool_id, |user| {
            user.permanent_password = permanent;
            if permanent {
                user.status = UserStatus::Confirmed;
            }
        })
    }

    async fn admin_confirm_sign_up(&self, pool_id: &str, username: &str) -> DirectoryResult<()> {
        let key = self.directory_fault(SimOp::ConfirmSignUp, pool_id, username)?;
        self.with_user(&key, pool_id, |user| {
            if user.status == UserStatus::Unconfirmed {
                user.status = UserStatus::ForceChangePassword;
            }
        })
    }

    async fn admin_update_user_attributes(
        &self,
        pool_id: &str,
        username: &str,
        attributes: &BTreeMap<String, String>,
    ) -> DirectoryResult<()> {
        let key = self.directory_fault(SimOp::UpdateUserAttributes, pool_id, username)?;
        self.with_user(&key, pool_id, |user| user.attributes.extend(attributes.clone()))
    }
}
