use anyhow::bail;

use tierform_core::StackConfig;

use super::Workspace;

/// Write a scaffolded tierform.toml.
pub fn init(workspace: &Workspace, name: &str, force: bool) -> anyhow::Result<()> {
    let path = &workspace.config_path;
    if path.exists() && !force {
        bail!("{} already exists; pass --force to overwrite", path.display());
    }

    let config = StackConfig::scaffold(name);
    config.validate()?;
    std::fs::write(path, config.to_toml_string()?)?;
    println!("✓ Generated {}", path.display());
    println!("  set stack.account, stack.certificate and compute.image before applying");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path().join("tierform.toml"), dir.path().join(".tierform"));

        init(&workspace, "demo", false).unwrap();
        let config = workspace.load_config().unwrap();
        assert_eq!(config.stack.name, "demo");
        assert_eq!(config.identity.domain_prefix, "demo-login");
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path().join("tierform.toml"), dir.path().join(".tierform"));
        std::fs::write(dir.path().join("tierform.toml"), "# mine\n").unwrap();

        assert!(init(&workspace, "demo", false).is_err());
        assert_eq!(std::fs::read_to_string(dir.path().join("tierform.toml")).unwrap(), "# mine\n");

        init(&workspace, "demo", true).unwrap();
        assert!(workspace.load_config().is_ok());
    }
}
