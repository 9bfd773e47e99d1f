//! Target group: registered targets and their health trackers.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use tracing::info;

use tierform_core::config::HealthCheckConfig;
use tierform_core::parse_duration;
use tierform_state::HealthStatus;

use crate::checker::{HealthTracker, ProbeResult};
use crate::error::{HealthError, HealthResult};

/// One registered backend (a running task of the compute service).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: String,
    pub address: String,
    pub port: u16,
}

impl Target {
    pub fn new(id: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port,
        }
    }

    /// `host:port` for probing and forwarding.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// A target together with its current health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetView {
    pub target: Target,
    pub health: HealthStatus,
}

struct Entry {
    target: Target,
    tracker: HealthTracker,
}

/// Targets of one group, keyed by id. Shared between the health monitor
/// (writer) and the listener (reader).
pub struct TargetGroup {
    name: String,
    health_check: HealthCheckConfig,
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl TargetGroup {
    pub fn new(name: impl Into<String>, health_check: HealthCheckConfig) -> HealthResult<Self> {
        // Reject bad thresholds up front rather than per registration.
        HealthTracker::new(&health_check)?;
        Ok(Self {
            name: name.into(),
            health_check,
            entries: RwLock::new(BTreeMap::new()),
        })
    }

    /// Build a group from a target group descriptor's `health_check.*`
    /// properties. Missing keys take the defaults.
    pub fn from_properties(name: impl Into<String>, properties: &BTreeMap<String, String>) -> HealthResult<Self> {
        let mut check = HealthCheckConfig::default();
        let duration = |key: &str, slot: &mut String| -> HealthResult<()> {
            if let Some(value) = properties.get(key) {
                parse_duration(value)
                    .ok_or_else(|| HealthError::InvalidConfig(format!("{key} = {value:?} is not a duration")))?;
                *slot = value.clone();
            }
            Ok(())
        };
        duration("health_check.interval", &mut check.interval)?;
        duration("health_check.timeout", &mut check.timeout)?;
        if let Some(path) = properties.get("health_check.path") {
            check.path = path.clone();
        }
        let threshold = |key: &str, default: u32| -> HealthResult<u32> {
            properties.get(key).map_or(Ok(default), |v| {
                v.parse()
                    .map_err(|_| HealthError::InvalidConfig(format!("{key} = {v:?} is not a count")))
            })
        };
        check.healthy_threshold = threshold("health_check.healthy_threshold", check.healthy_threshold)?;
        check.unhealthy_threshold = threshold("health_check.unhealthy_threshold", check.unhealthy_threshold)?;
        Self::new(name, check)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn health_check(&self) -> &HealthCheckConfig {
        &self.health_check
    }

    /// Register a target. It starts `Unknown` and receives no traffic until
    /// it passes the healthy threshold. Re-registering resets its health.
    pub fn register(&self, target: Target) -> HealthResult<()> {
        let tracker = HealthTracker::new(&self.health_check)?;
        info!(group = %self.name, target = %target.id, endpoint = %target.endpoint(), "target registered");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(target.id.clone(), Entry { target, tracker });
        Ok(())
    }

    pub fn deregister(&self, target_id: &str) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target_id)
            .is_some();
        if removed {
            info!(group = %self.name, target = %target_id, "target deregistered");
        }
        removed
    }

    /// Fold a probe result into the target's tracker.
    pub fn record(&self, target_id: &str, result: ProbeResult) -> HealthResult<HealthStatus> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = entries
            .get_mut(target_id)
            .ok_or_else(|| HealthError::UnknownTarget {
                group: self.name.clone(),
                target: target_id.to_string(),
            })?;
        Ok(entry.tracker.record(result))
    }

    pub fn status(&self, target_id: &str) -> Option<HealthStatus> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target_id)
            .map(|e| e.tracker.status())
    }

    /// Routable targets in id order.
    pub fn healthy_targets(&self) -> Vec<Target> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| e.tracker.is_routable())
            .map(|e| e.target.clone())
            .collect()
    }

    pub fn targets(&self) -> Vec<TargetView> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|e| TargetView {
                target: e.target.clone(),
                health: e.tracker.status(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
