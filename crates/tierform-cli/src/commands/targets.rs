use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::sync::watch;
use tracing::info;

use tierform_core::{StackConfig, parse_duration};
use tierform_core::topology::TARGET_GROUP;
use tierform_health::{Target, TargetGroup, TargetHealthMonitor, sync_registrations};
use tierform_provision::SimulatedCloud;
use tierform_state::StateStore;

use super::{Workspace, cancelled};

/// The provisioned target group and the service tasks running in it.
pub struct Registration {
    pub group: Arc<TargetGroup>,
    pub targets: Vec<Target>,
}

/// `None` until the target group is ready.
pub fn running_targets(
    state: &StateStore,
    cloud: &SimulatedCloud,
    config: &StackConfig,
) -> anyhow::Result<Option<Registration>> {
    let Some(record) = state.get_resource(TARGET_GROUP)?.filter(|r| r.is_ready()) else {
        return Ok(None);
    };
    let Some(arn) = record.outputs.get("target_group_arn") else {
        return Ok(None);
    };
    let spec = config
        .resources()
        .into_iter()
        .find(|r| r.name == TARGET_GROUP)
        .context("stack has no target group")?;
    let group = TargetGroup::from_properties(TARGET_GROUP, &spec.properties)?;
    let targets = cloud
        .service_targets(arn)
        .into_iter()
        .map(|(id, address, port)| Target::new(id, address, port))
        .collect();
    Ok(Some(Registration {
        group: Arc::new(group),
        targets,
    }))
}

/// Bring the recorded targets in line with what is running. With no target
/// group every record is dropped. Returns the number of registered targets.
pub fn register(state: &StateStore, cloud: &SimulatedCloud, config: &StackConfig) -> anyhow::Result<usize> {
    let targets = running_targets(state, cloud, config)?
        .map(|r| r.targets)
        .unwrap_or_default();
    let changed = sync_registrations(state, TARGET_GROUP, &targets)?;
    if changed > 0 {
        info!(group = TARGET_GROUP, registered = targets.len(), changed, "target registrations updated");
    }
    Ok(targets.len())
}

/// Probe every registered target until interrupted, or for `duration`.
pub async fn monitor(
    workspace: &Workspace,
    duration: Option<&str>,
    mut cancel: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let duration = duration
        .map(|d| parse_duration(d).with_context(|| format!("{d:?} is not a duration")))
        .transpose()?;
    let config = workspace.load_config()?;
    let state = workspace.state()?;
    let cloud = workspace.cloud(&config)?;

    let Some(registration) = running_targets(&state, &cloud, &config)? else {
        bail!("no target group is provisioned; run apply first");
    };
    sync_registrations(&state, TARGET_GROUP, &registration.targets)?;

    let monitor = TargetHealthMonitor::new(registration.group.clone(), state);
    for target in registration.targets {
        monitor.start_monitor(target).await?;
    }
    println!(
        "Monitoring {} targets in {}; interval {:?}",
        registration.group.len(),
        TARGET_GROUP,
        registration.group.health_check().interval()
    );

    match duration {
        Some(limit) => {
            tokio::select! {
                _ = tokio::time::sleep(limit) => {}
                _ = cancelled(&mut cancel) => {}
            }
        }
        None => cancelled(&mut cancel).await,
    }
    monitor.stop_all().await;

    for view in registration.group.targets() {
        println!("  {:<24} {} {:?}", view.target.id, view.target.endpoint(), view.health);
    }
    Ok(())
}
