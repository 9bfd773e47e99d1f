use tierform_provision::StackOutputs;

use super::Workspace;

/// Print stack outputs. Secrets appear by id only.
pub fn outputs(workspace: &Workspace, format: &str) -> anyhow::Result<()> {
    let state = workspace.state()?;
    let outputs = StackOutputs::load(&state)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&outputs)?),
        _ => {
            for (key, value) in outputs.entries() {
                println!("{key:<30} {}", value.unwrap_or("-"));
            }
        }
    }
    Ok(())
}
