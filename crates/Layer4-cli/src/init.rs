//! appletd init command
//!
//! Writes a project config under `.appletd/`.

use applet_foundation::RuntimeConfig;
use std::path::Path;

/// Write the default runtime config for the current directory
pub fn init_project(force: bool) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    init_in(&cwd, force)
}

fn init_in(root: &Path, force: bool) -> anyhow::Result<()> {
    let path = RuntimeConfig::project_path(root);

    if path.exists() && !force {
        println!("✓ appletd already initialized: {}", path.display());
        println!("  Use --force to overwrite.");
        return Ok(());
    }

    RuntimeConfig::default().save_to(&path)?;
    println!("Created {}", path.display());
    println!("  Register applets under \"applets\": [{{\"id\": ..., \"entryPoint\": ...}}]");
    Ok(())
}
