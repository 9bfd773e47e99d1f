//! The seam between the orchestrator and whatever actually creates resources.
//!
//! Managed services (database, file system, load balancer, directory) are
//! opaque collaborators; the orchestrator only needs create, readiness,
//! update and delete calls against them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::resource::{ResolvedResource, ResourceKind};

pub type HandlerResult<T> = Result<T, HandlerError>;

/// Errors a resource handler can report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Transient: a prerequisite is not usable yet. Callers retry with backoff.
    #[error("dependency not ready: {0}")]
    DependencyUnready(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("service error: {0}")]
    Service(String),
}

impl HandlerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, HandlerError::DependencyUnready(_))
    }
}

/// Observed provisioning state of a created resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Still converging; poll again later.
    Pending,
    /// Ready, with the attributes dependents may consume.
    Ready(BTreeMap<String, String>),
    /// The managed service gave up on this resource.
    Failed(String),
}

#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Start creating a resource. Returns its physical id.
    async fn create(&self, resource: &ResolvedResource) -> HandlerResult<String>;

    /// Observe the readiness of a previously created resource.
    async fn poll(&self, kind: ResourceKind, physical_id: &str) -> HandlerResult<Readiness>;

    /// Apply changed properties to an existing resource.
    async fn update(&self, physical_id: &str, resource: &ResolvedResource) -> HandlerResult<()>;

    /// Delete a resource. `NotFound` means it is already gone.
    async fn delete(&self, kind: ResourceKind, physical_id: &str) -> HandlerResult<()>;
}
