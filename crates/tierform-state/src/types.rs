//! Domain types for the tierform state store.
//!
//! These types represent what the orchestrator has observed and done. All
//! types are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tierform_core::ResourceKind;

// ── Resource ──────────────────────────────────────────────────────

/// Persisted provisioning state of one logical resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceRecord {
    pub name: String,
    pub kind: ResourceKind,
    /// Id assigned by the managed service, once `create` returned.
    pub physical_id: Option<String>,
    pub status: ResourceStatus,
    /// Ready outputs dependents consume.
    pub outputs: BTreeMap<String, String>,
    /// Hash of the resolved descriptor last applied.
    pub spec_hash: String,
    /// Resolved dependency edges at the time of the last apply. Teardown is
    /// ordered from these, so it works even if the config has since changed.
    pub dependencies: Vec<String>,
    pub error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Lifecycle status of a resource record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Creating,
    Updating,
    Ready,
    Deleting,
    Failed,
}

impl ResourceRecord {
    pub fn is_ready(&self) -> bool {
        self.status == ResourceStatus::Ready
    }
}

// ── Reconciled user ───────────────────────────────────────────────

/// State of a directory user managed outside the pool's declarative model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserLifecycle {
    Absent,
    Creating,
    Present,
    Deleting,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub pool_id: String,
    pub username: String,
    pub lifecycle: UserLifecycle,
    /// Attributes last written to the directory.
    pub attributes: BTreeMap<String, String>,
    pub updated_at: u64,
}

impl UserRecord {
    pub fn table_key(&self) -> String {
        user_key(&self.pool_id, &self.username)
    }
}

/// Composite key for the users table.
pub fn user_key(pool_id: &str, username: &str) -> String {
    format!("{pool_id}/{username}")
}

// ── Target ────────────────────────────────────────────────────────

/// Health status as determined by target group probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// A registered target of a target group and its last known health.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetRecord {
    pub group: String,
    pub target_id: String,
    pub address: String,
    pub port: u16,
    pub health: HealthStatus,
    pub updated_at: u64,
}

impl TargetRecord {
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.group, self.target_id)
    }
}

// ── Run ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Apply,
    Destroy,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    /// A resource operation failed; `blocked` lists dependents left unprovisioned.
    Failed {
        resource: String,
        reason: String,
        blocked: Vec<String>,
    },
    Cancelled,
    /// Rejected before any side effect (cycle, missing input).
    Rejected { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub id: String,
    pub kind: RunKind,
    pub outcome: RunOutcome,
    pub started_at: u64,
    pub finished_at: u64,
    /// Resources that changed during the run.
    pub touched: Vec<String>,
}

impl RunRecord {
    pub fn table_key(&self) -> String {
        format!("{:020}-{}", self.started_at, self.id)
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
