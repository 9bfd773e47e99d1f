use tokio::sync::watch;

use super::{Workspace, finish, print_report, targets};

/// Delete every recorded resource, dependents before dependencies.
pub async fn destroy(workspace: &Workspace, format: &str, cancel: watch::Receiver<bool>) -> anyhow::Result<()> {
    let config = workspace.load_config()?;
    let (orchestrator, cloud) = workspace.orchestrator(&config)?;

    let result = orchestrator.destroy(cancel).await;
    let report = finish(&cloud, result)?;
    targets::register(orchestrator.state(), &cloud, &config)?;
    print_report(&report, format)?;
    if format != "json" {
        println!("✓ Stack {} destroyed", config.stack.name);
    }
    Ok(())
}
