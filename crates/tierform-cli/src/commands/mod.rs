pub mod apply;
pub mod destroy;
pub mod init;
pub mod outputs;
pub mod plan;
pub mod probe;
pub mod status;
pub mod targets;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use tierform_core::{ResourceKind, StackConfig};
use tierform_identity::ReconciledUserHandler;
use tierform_provision::{Change, HandlerSet, Orchestrator, ProvisionError, ProvisionSettings, RunReport, SimulatedCloud};
use tierform_state::StateStore;

const STATE_FILE: &str = "state.redb";
const CLOUD_FILE: &str = "cloud.json";

/// Where a command finds its configuration and state.
pub struct Workspace {
    config_path: PathBuf,
    state_dir: PathBuf,
}

impl Workspace {
    pub fn new(config_path: PathBuf, state_dir: PathBuf) -> Self {
        Self {
            config_path,
            state_dir,
        }
    }

    /// Load and validate the stack configuration.
    pub fn load_config(&self) -> anyhow::Result<StackConfig> {
        let config = StackConfig::from_file(&self.config_path)
            .with_context(|| format!("loading {}", self.config_path.display()))?;
        config
            .validate()
            .with_context(|| format!("validating {}", self.config_path.display()))?;
        Ok(config)
    }

    pub fn state(&self) -> anyhow::Result<StateStore> {
        std::fs::create_dir_all(&self.state_dir)
            .with_context(|| format!("creating state directory {}", self.state_dir.display()))?;
        let path = self.state_dir.join(STATE_FILE);
        let state = StateStore::open(&path)
            .with_context(|| format!("opening state store {}", path.display()))?;
        Ok(state)
    }

    /// The simulated cloud, with its snapshot in the state directory.
    pub fn cloud(&self, config: &StackConfig) -> anyhow::Result<Arc<SimulatedCloud>> {
        let cloud = SimulatedCloud::open(&self.state_dir.join(CLOUD_FILE))?
            .with_region(config.stack.region.clone());
        Ok(Arc::new(cloud))
    }

    /// Orchestrator wired to the simulated cloud, with the reconciled user
    /// routed to the identity reconciler.
    pub fn orchestrator(&self, config: &StackConfig) -> anyhow::Result<(Orchestrator, Arc<SimulatedCloud>)> {
        let state = self.state()?;
        let cloud = self.cloud(config)?;
        let users = ReconciledUserHandler::new(cloud.clone(), cloud.clone(), state.clone());
        let handlers = HandlerSet::new(cloud.clone()).with(ResourceKind::ReconciledUser, Arc::new(users));
        let settings = ProvisionSettings::from_config(&config.provisioning);
        Ok((Orchestrator::new(handlers, state, settings), cloud))
    }
}

/// A cancellation channel flipped by the first Ctrl-C.
pub fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; letting in-flight operations settle");
            let _ = tx.send(true);
        }
    });
    rx
}

/// Resolves once cancellation is requested; never, if the sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Print a finished run.
pub fn print_report(report: &RunReport, format: &str) -> anyhow::Result<()> {
    match format {
        "json" => {
            let results: Vec<_> = report
                .results
                .iter()
                .map(|(name, change)| serde_json::json!({ "resource": name, "change": change }))
                .collect();
            let doc = serde_json::json!({
                "run_id": report.run_id,
                "kind": report.kind,
                "results": results,
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        _ => {
            for (name, change) in &report.results {
                println!("  {name:<24} {}", change_label(*change));
            }
            println!("{} resources, {} changed", report.results.len(), report.changed().len());
        }
    }
    Ok(())
}

fn change_label(change: Change) -> &'static str {
    match change {
        Change::Created => "created",
        Change::Updated => "updated",
        Change::Resumed => "resumed",
        Change::Unchanged => "unchanged",
        Change::Deleted => "deleted",
        Change::AlreadyGone => "already gone",
    }
}

/// Explain a failed run on stderr.
pub fn print_failure(err: &ProvisionError) {
    match err {
        ProvisionError::ProvisioningFailed {
            resource,
            reason,
            blocked,
        } => {
            eprintln!("✗ {resource} failed: {reason}");
            if !blocked.is_empty() {
                eprintln!("  not provisioned because of it: {}", blocked.join(", "));
            }
            eprintln!("  records were kept; re-run to resume, or destroy to roll back");
        }
        ProvisionError::Cancelled { completed, pending } => {
            eprintln!("✗ cancelled after {} resources", completed.len());
            if !pending.is_empty() {
                eprintln!("  not reached: {}", pending.join(", "));
            }
        }
        ProvisionError::CircularDependency { cycle } => {
            eprintln!("✗ rejected before provisioning: cycle {}", cycle.join(" -> "));
        }
        other => eprintln!("✗ {other}"),
    }
}

/// Persist the simulator and hand back the run result.
fn finish(
    cloud: &SimulatedCloud,
    result: Result<RunReport, ProvisionError>,
) -> anyhow::Result<RunReport> {
    cloud.save()?;
    match result {
        Ok(report) => {
            info!(run_id = %report.run_id, changed = report.changed().len(), "run finished");
            Ok(report)
        }
        Err(err) => {
            print_failure(&err);
            Err(err.into())
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A workspace in a temp dir with a scaffolded, fast-provisioning config.
    pub(crate) fn scaffolded(dir: &tempfile::TempDir) -> Workspace {
        let workspace = Workspace::new(dir.path().join("tierform.toml"), dir.path().join(".tierform"));
        let mut config = StackConfig::scaffold("demo");
        config.provisioning.initial_backoff = "1ms".to_string();
        config.provisioning.max_backoff = "2ms".to_string();
        config.provisioning.poll_interval = "1ms".to_string();
        std::fs::write(&workspace.config_path, config.to_toml_string().unwrap()).unwrap();
        workspace
    }

    pub(crate) fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[test]
    fn test_missing_config_is_reported_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path().join("absent.toml"), dir.path().join(".tierform"));
        let err = workspace.load_config().unwrap_err();
        assert!(format!("{err:#}").contains("absent.toml"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = scaffolded(&dir);
        let mut config = StackConfig::scaffold("demo");
        config.stack.certificate = String::new();
        std::fs::write(&workspace.config_path, config.to_toml_string().unwrap()).unwrap();

        let err = workspace.load_config().unwrap_err();
        assert!(format!("{err:#}").contains("stack.certificate"));
    }

    #[test]
    fn test_state_dir_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = scaffolded(&dir);
        workspace.state().unwrap();
        assert!(dir.path().join(".tierform").join(STATE_FILE).exists());
    }
}
