//! `ResourceHandler` for `reconciled_user` resources.
//!
//! Translates a resolved descriptor into reconciler calls. The physical id
//! is `{pool_id}/{username}`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use tierform_core::{
    HandlerError, HandlerResult, Readiness, ResolvedResource, ResourceHandler, ResourceKind,
    SecretConsumer, SecretReader,
};
use tierform_state::{StateStore, UserLifecycle};

use crate::capability::{AdminCapability, ScopedDirectory};
use crate::directory::{DirectoryError, IdentityDirectory};
use crate::reconciler::{CreateUser, ReconcileError, UserReconciler};

pub struct ReconciledUserHandler {
    directory: Arc<dyn IdentityDirectory>,
    secrets: Arc<dyn SecretReader>,
    state: StateStore,
}

impl ReconciledUserHandler {
    pub fn new(
        directory: Arc<dyn IdentityDirectory>,
        secrets: Arc<dyn SecretReader>,
        state: StateStore,
    ) -> Self {
        Self {
            directory,
            secrets,
            state,
        }
    }

    /// A reconciler scoped to exactly one pool.
    fn reconciler(&self, pool_id: &str) -> UserReconciler {
        let scoped = ScopedDirectory::new(
            self.directory.clone(),
            AdminCapability::for_user_reconciler(pool_id),
        );
        UserReconciler::new(scoped, self.state.clone())
    }

    async fn request(&self, resource: &ResolvedResource) -> HandlerResult<CreateUser> {
        let pool_id = required(resource, "user_pool_id")?;
        let username = required(resource, "username")?;
        let secret_id = required(resource, "temporary_password_secret")?;
        let temporary_password = self
            .secrets
            .read_secret(secret_id, SecretConsumer::IdentityReconciler)
            .await?;
        debug!(
            resource = %resource.name,
            secret_id,
            fingerprint = %temporary_password.fingerprint(),
            "temporary password read"
        );

        let attributes: BTreeMap<String, String> = resource
            .prefixed("attr")
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        Ok(CreateUser {
            pool_id: pool_id.to_string(),
            username: username.to_string(),
            attributes,
            temporary_password,
            permanent_password: resource.get("permanent_password") == Some("true"),
        })
    }
}

fn required<'a>(resource: &'a ResolvedResource, key: &str) -> HandlerResult<&'a str> {
    resource
        .get(key)
        .ok_or_else(|| HandlerError::Invalid(format!("{} is missing property {key}", resource.name)))
}

fn split_physical_id(physical_id: &str) -> HandlerResult<(&str, &str)> {
    physical_id
        .split_once('/')
        .ok_or_else(|| HandlerError::Invalid(format!("malformed user id {physical_id}")))
}

/// Map reconciler failures onto the handler taxonomy. A missing pool on
/// create means the pool is not usable yet.
fn handler_error(err: ReconcileError) -> HandlerError {
    match err {
        ReconcileError::Directory(DirectoryError::NotFound(what)) => {
            HandlerError::DependencyUnready(what)
        }
        ReconcileError::Directory(DirectoryError::AlreadyExists(what)) => {
            HandlerError::AlreadyExists(what)
        }
        ReconcileError::Directory(DirectoryError::AccessDenied(what)) => {
            HandlerError::AccessDenied(what)
        }
        ReconcileError::Directory(DirectoryError::Service(what)) => HandlerError::Service(what),
        other => HandlerError::Service(other.to_string()),
    }
}

#[async_trait]
impl ResourceHandler for ReconciledUserHandler {
    async fn create(&self, resource: &ResolvedResource) -> HandlerResult<String> {
        let request = self.request(resource).await?;
        self.reconciler(&request.pool_id)
            .create(&request)
            .await
            .map_err(handler_error)?;
        Ok(format!("{}/{}", request.pool_id, request.username))
    }

    async fn poll(&self, _kind: ResourceKind, physical_id: &str) -> HandlerResult<Readiness> {
        let (pool_id, username) = split_physical_id(physical_id)?;
        let lifecycle = self
            .reconciler(pool_id)
            .lifecycle(pool_id, username)
            .map_err(handler_error)?;
        match lifecycle {
            UserLifecycle::Present => Ok(Readiness::Ready(BTreeMap::from([(
                "username".to_string(),
                username.to_string(),
            )]))),
            UserLifecycle::Creating => Ok(Readiness::Pending),
            UserLifecycle::Absent | UserLifecycle::Deleting => {
                Err(HandlerError::NotFound(physical_id.to_string()))
            }
        }
    }

    async fn update(&self, physical_id: &str, resource: &ResolvedResource) -> HandlerResult<()> {
        let request = self.request(resource).await?;
        if physical_id != format!("{}/{}", request.pool_id, request.username) {
            return Err(HandlerError::Invalid(format!(
                "{} cannot move user {physical_id} to another pool or name",
                resource.name
            )));
        }
        self.reconciler(&request.pool_id)
            .create(&request)
            .await
            .map_err(handler_error)?;
        Ok(())
    }

    async fn delete(&self, _kind: ResourceKind, physical_id: &str) -> HandlerResult<()> {
        let (pool_id, username) = split_physical_id(physical_id)?;
        self.reconciler(pool_id)
            .delete(pool_id, username)
            .await
            .map_err(handler_error)?;
        Ok(())
    }
}
