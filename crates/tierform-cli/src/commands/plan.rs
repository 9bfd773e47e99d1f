use tierform_provision::PlanAction;

use super::Workspace;

/// Print what `apply` would do, without touching the cloud.
pub fn plan(workspace: &Workspace, format: &str) -> anyhow::Result<()> {
    let config = workspace.load_config()?;
    let (orchestrator, _cloud) = workspace.orchestrator(&config)?;
    let plan = orchestrator.plan(config.resources())?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&plan)?),
        _ => {
            for (i, wave) in plan.waves.iter().enumerate() {
                println!("wave {}:", i + 1);
                for step in wave {
                    println!("  {:<10} {:<24} ({})", action_label(step.action), step.name, step.kind);
                }
            }
            for orphan in &plan.orphans {
                println!("  {:<10} {orphan:<24} (no longer declared; removed by destroy)", "orphan");
            }
        }
    }
    Ok(())
}

fn action_label(action: PlanAction) -> &'static str {
    match action {
        PlanAction::Create => "create",
        PlanAction::Update => "update",
        PlanAction::Resume => "resume",
        PlanAction::NoChange => "no change",
        PlanAction::Deferred => "deferred",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::scaffolded;

    #[test]
    fn test_plan_on_fresh_state_creates_everything() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = scaffolded(&dir);
        let config = workspace.load_config().unwrap();

        let (orchestrator, cloud) = workspace.orchestrator(&config).unwrap();
        let plan = orchestrator.plan(config.resources()).unwrap();
        assert_eq!(cloud.side_effects(), 0);
        assert!(plan.orphans.is_empty());
        assert!(
            plan.waves
                .iter()
                .flatten()
                .all(|s| matches!(s.action, PlanAction::Create | PlanAction::Deferred))
        );

        drop(orchestrator);
        plan_text_and_json(&workspace);
    }

    fn plan_text_and_json(workspace: &Workspace) {
        super::plan(workspace, "text").unwrap();
        super::plan(workspace, "json").unwrap();
    }
}
