use std::fs;

use anyhow::{Context, Result};

use helios_core::db::{SettingsDb, WorkspaceConfig, WorkspaceLayout};

use crate::{canonicalize_or_current, infer_workspace_name};

/// Initialize a new workspace at `root`.
pub fn init_workspace_command(root: &str, name: Option<String>) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let layout = WorkspaceLayout::new(&root_path);

    let workspace_name = match name {
        Some(n) => n,
        None => infer_workspace_name(&root_path),
    };

    fs::create_dir_all(&layout.meta_dir)
        .with_context(|| format!("Failed to create meta dir: {}", layout.meta_dir.display()))?;
    fs::create_dir_all(&layout.exports_dir).with_context(|| {
        format!("Failed to create exports dir: {}", layout.exports_dir.display())
    })?;

    if layout.is_initialized() {
        println!("Workspace already initialized at {}", layout.root.display());
        return Ok(());
    }

    let config = WorkspaceConfig::new(&workspace_name, layout.db_path_relative_string());
    let json = serde_json::to_string_pretty(&config)?;
    fs::write(&layout.config_path, json).with_context(|| {
        format!("Failed to write workspace config: {}", layout.config_path.display())
    })?;

    // Create the settings database now so later commands find it in place.
    SettingsDb::open(&layout.db_path).with_context(|| {
        format!("Failed to initialize settings database at {}", layout.db_path.display())
    })?;

    println!("Initialized Helios workspace:");
    println!("  Name: {}", workspace_name);
    println!("  Root: {}", layout.root.display());
    println!("  Config: {}", layout.config_path.display());
    println!("  DB path (relative): {}", config.db.path);
    println!("  Exports dir: {}", layout.exports_dir.display());

    Ok(())
}
