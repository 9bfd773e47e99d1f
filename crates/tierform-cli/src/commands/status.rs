use tierform_core::topology::TARGET_GROUP;
use tierform_state::{ResourceStatus, RunOutcome, RunRecord};

use super::Workspace;

/// Print recorded resources and the most recent runs.
pub fn status(workspace: &Workspace, runs: usize) -> anyhow::Result<()> {
    let state = workspace.state()?;
    let resources = state.list_resources()?;

    if resources.is_empty() {
        println!("No resources recorded.");
    } else {
        println!("{:<24} {:<20} {:<10} PHYSICAL ID", "RESOURCE", "KIND", "STATUS");
        for r in &resources {
            println!(
                "{:<24} {:<20} {:<10} {}",
                r.name,
                r.kind,
                status_label(r.status),
                r.physical_id.as_deref().unwrap_or("-")
            );
            if let Some(error) = &r.error {
                println!("  last error: {error}");
            }
        }
    }

    let targets = state.list_targets_for_group(TARGET_GROUP)?;
    if !targets.is_empty() {
        println!();
        println!("Targets:");
        for t in targets {
            println!("  {:<16} {}:{} {:?}", t.target_id, t.address, t.port, t.health);
        }
    }

    let history = state.recent_runs(runs)?;
    if !history.is_empty() {
        println!();
        println!("Recent runs:");
        for run in &history {
            println!("  {}", describe_run(run));
        }
    }
    Ok(())
}

fn status_label(status: ResourceStatus) -> &'static str {
    match status {
        ResourceStatus::Creating => "creating",
        ResourceStatus::Updating => "updating",
        ResourceStatus::Ready => "ready",
        ResourceStatus::Deleting => "deleting",
        ResourceStatus::Failed => "failed",
    }
}

fn describe_run(run: &RunRecord) -> String {
    let outcome = match &run.outcome {
        RunOutcome::Succeeded => format!("succeeded, {} changed", run.touched.len()),
        RunOutcome::Failed {
            resource,
            reason,
            blocked,
        } if blocked.is_empty() => format!("failed at {resource}: {reason}"),
        RunOutcome::Failed {
            resource,
            reason,
            blocked,
        } => format!("failed at {resource}: {reason} (blocked: {})", blocked.join(", ")),
        RunOutcome::Cancelled => "cancelled".to_string(),
        RunOutcome::Rejected { reason } => format!("rejected: {reason}"),
    };
    format!("{} {:?} {outcome}", run.id, run.kind)
}
