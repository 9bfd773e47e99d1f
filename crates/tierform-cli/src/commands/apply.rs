use tokio::sync::watch;

use tierform_core::topology::TARGET_GROUP;
use tierform_provision::StackOutputs;

use super::{Workspace, finish, print_report, targets};

/// Create or update the stack, then print the entry point.
pub async fn apply(workspace: &Workspace, format: &str, cancel: watch::Receiver<bool>) -> anyhow::Result<()> {
    let config = workspace.load_config()?;
    let (orchestrator, cloud) = workspace.orchestrator(&config)?;

    let result = orchestrator.apply(config.resources(), cancel).await;
    let report = finish(&cloud, result)?;
    let registered = targets::register(orchestrator.state(), &cloud, &config)?;
    print_report(&report, format)?;

    if format != "json" {
        let outputs = StackOutputs::load(orchestrator.state())?;
        if let Some(url) = &outputs.entry_point_url {
            println!("✓ Entry point: {url}");
        }
        if let Some(user) = &outputs.admin_username {
            let secret = outputs.admin_credentials_secret_id.as_deref().unwrap_or("-");
            println!("  Admin user:  {user} (temporary password in secret {secret})");
        }
        println!("  Targets:     {registered} registered in {TARGET_GROUP}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{no_cancel, scaffolded};
    use tierform_state::{RunOutcome, StateStore};

    #[tokio::test]
    async fn test_apply_then_reapply_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = scaffolded(&dir);

        apply(&workspace, "text", no_cancel()).await.unwrap();
        let snapshot = std::fs::read_to_string(dir.path().join(".tierform/cloud.json")).unwrap();

        apply(&workspace, "json", no_cancel()).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join(".tierform/cloud.json")).unwrap(),
            snapshot
        );

        let state = StateStore::open(&dir.path().join(".tierform/state.redb")).unwrap();
        let runs = state.recent_runs(5).unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.outcome == RunOutcome::Succeeded));
        assert!(runs.iter().any(|r| r.touched.is_empty()));
        assert!(state.list_resources().unwrap().iter().all(|r| r.is_ready()));
    }

    #[tokio::test]
    async fn test_apply_with_taken_domain_fails_and_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = scaffolded(&dir);
        let config = workspace.load_config().unwrap();
        {
            let cloud = workspace.cloud(&config).unwrap();
            cloud.claim_domain(&config.identity.domain_prefix);
            cloud.save().unwrap();
        }

        let err = apply(&workspace, "text", no_cancel()).await.unwrap_err();
        assert!(err.to_string().contains("domain"));

        let state = StateStore::open(&dir.path().join(".tierform/state.redb")).unwrap();
        assert!(!state.list_resources().unwrap().is_empty());
        assert!(matches!(
            state.recent_runs(1).unwrap()[0].outcome,
            RunOutcome::Failed { .. }
        ));
    }
}
