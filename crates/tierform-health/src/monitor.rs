//! Health monitor: background tasks that probe each registered target.
//!
//! One task per target probes `health_check.path` every
//! `health_check.interval`, records the result in the shared
//! [`TargetGroup`] and persists the target's health in the state store
//! whenever it changes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use tierform_state::{HealthStatus, StateStore, TargetRecord, epoch_secs};

use crate::checker::http_probe;
use crate::error::HealthResult;
use crate::target::{Target, TargetGroup};

struct MonitorSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

pub struct TargetHealthMonitor {
    group: Arc<TargetGroup>,
    state: StateStore,
    /// Active monitors: target_id → slot.
    monitors: Arc<RwLock<HashMap<String, MonitorSlot>>>,
}

impl TargetHealthMonitor {
    pub fn new(group: Arc<TargetGroup>, state: StateStore) -> Self {
        Self {
            group,
            state,
            monitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn group(&self) -> &Arc<TargetGroup> {
        &self.group
    }

    /// Register `target` in the group and start probing it. Replaces any
    /// monitor already running for the same id.
    pub async fn start_monitor(&self, target: Target) -> HealthResult<()> {
        self.group.register(target.clone())?;
        persist(&self.state, self.group.name(), &target, HealthStatus::Unknown)?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let group = self.group.clone();
        let state = self.state.clone();
        let target_id = target.id.clone();
        let handle = tokio::spawn(async move {
            run_probe_loop(group, target, state, shutdown_rx).await;
        });

        let mut monitors = self.monitors.write().await;
        if let Some(old) = monitors.insert(
            target_id.clone(),
            MonitorSlot {
                handle,
                shutdown_tx,
            },
        ) {
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }

        info!(group = %self.group.name(), target = %target_id, "health monitor started");
        Ok(())
    }

    /// Stop probing a target and remove it from the group.
    pub async fn stop_monitor(&self, target_id: &str) -> HealthResult<()> {
        let mut monitors = self.monitors.write().await;
        if let Some(slot) = monitors.remove(target_id) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!(group = %self.group.name(), target = %target_id, "health monitor stopped");
        }
        self.group.deregister(target_id);
        self.state.delete_target(self.group.name(), target_id)?;
        Ok(())
    }

    /// Stop all monitors (for graceful shutdown) and wait for their tasks
    /// to finish. Targets stay registered.
    pub async fn stop_all(&self) {
        let mut monitors = self.monitors.write().await;
        for (id, slot) in monitors.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            let _ = slot.handle.await;
            debug!(target = %id, "health monitor stopped");
        }
        info!(group = %self.group.name(), "all health monitors stopped");
    }

    pub async fn active_monitors(&self) -> Vec<String> {
        let monitors = self.monitors.read().await;
        monitors.keys().cloned().collect()
    }

    pub async fn is_monitoring(&self, target_id: &str) -> bool {
        let monitors = self.monitors.read().await;
        monitors.contains_key(target_id)
    }
}

async fn run_probe_loop(
    group: Arc<TargetGroup>,
    target: Target,
    state: StateStore,
    mut shutdown: watch::Receiver<bool>,
) {
    let check = group.health_check().clone();
    let interval = check.interval();
    let timeout = check.timeout();
    let endpoint = target.endpoint();

    debug!(target = %target.id, %endpoint, path = %check.path, "probe loop starting");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let result = http_probe(&endpoint, &check.path, timeout).await;
                let previous = group.status(&target.id);
                let status = match group.record(&target.id, result) {
                    Ok(status) => status,
                    Err(e) => {
                        debug!(target = %target.id, error = %e, "target gone, probe loop exiting");
                        break;
                    }
                };

                if previous != Some(status) {
                    info!(group = %group.name(), target = %target.id, ?status, "target health changed");
                    if let Err(e) = persist(&state, group.name(), &target, status) {
                        error!(target = %target.id, error = %e, "failed to record target health");
                    }
                }
            }
            _ = shutdown.changed() => {
                debug!(target = %target.id, "probe loop shutting down");
                break;
            }
        }
    }
}

/// Make the recorded targets of `group` match `targets`. New targets are
/// recorded `Unknown`; targets whose endpoint is unchanged keep their last
/// known health; targets no longer running are removed. Returns how many
/// records were added or removed.
pub fn sync_registrations(state: &StateStore, group: &str, targets: &[Target]) -> HealthResult<usize> {
    let recorded = state.list_targets_for_group(group)?;
    let mut changed = 0;

    for record in &recorded {
        let still_running = targets
            .iter()
            .any(|t| t.id == record.target_id && t.address == record.address && t.port == record.port);
        if !still_running {
            state.delete_target(group, &record.target_id)?;
            info!(%group, target = %record.target_id, "target deregistered");
            changed += 1;
        }
    }
    for target in targets {
        let known = recorded
            .iter()
            .any(|r| r.target_id == target.id && r.address == target.address && r.port == target.port);
        if !known {
            persist(state, group, target, HealthStatus::Unknown)?;
            info!(%group, target = %target.id, endpoint = %target.endpoint(), "target registered");
            changed += 1;
        }
    }
    Ok(changed)
}

fn persist(state: &StateStore, group: &str, target: &Target, health: HealthStatus) -> HealthResult<()> {
    state.put_target(&TargetRecord {
        group: group.to_string(),
        target_id: target.id.clone(),
        address: target.address.clone(),
        port: target.port,
        health,
        updated_at: epoch_secs(),
    })?;
    Ok(())
}
