use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::db::{SettingsDb, WorkspaceConfig, WorkspaceLayout};

/// Read `.helios/config.json`. A missing file means the root was never initialized.
pub fn load_workspace_config(layout: &WorkspaceLayout) -> Result<WorkspaceConfig> {
    let raw = std::fs::read_to_string(&layout.config_path).with_context(|| {
        format!(
            "No workspace config at {} (run `helios init` first)",
            layout.config_path.display()
        )
    })?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Malformed workspace config {}", layout.config_path.display()))
}

/// Where the transformer settings store lives; relative paths hang off the workspace root.
pub fn settings_db_path(layout: &WorkspaceLayout, config: &WorkspaceConfig) -> PathBuf {
    let configured = PathBuf::from(&config.db.path);
    if configured.is_absolute() {
        configured
    } else {
        layout.root.join(configured)
    }
}

/// Load the config and open (migrating if needed) the settings store it points at.
pub fn open_settings_db(layout: &WorkspaceLayout) -> Result<(WorkspaceConfig, PathBuf, SettingsDb)> {
    let config = load_workspace_config(layout)?;
    let db_path = settings_db_path(layout, &config);
    let db = SettingsDb::open(&db_path)
        .with_context(|| format!("Failed to open transformer settings at {}", db_path.display()))?;
    Ok((config, db_path, db))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_path_is_relative_to_root_unless_absolute() {
        let layout = WorkspaceLayout::new("/work/space");
        let mut config = WorkspaceConfig::new("demo", ".helios/settings.db");
        assert_eq!(settings_db_path(&layout, &config), PathBuf::from("/work/space/.helios/settings.db"));
        config.db.path = "/var/lib/helios.db".into();
        assert_eq!(settings_db_path(&layout, &config), PathBuf::from("/var/lib/helios.db"));
    }

    #[test]
    fn uninitialized_roots_point_at_init() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_settings_db(&WorkspaceLayout::new(dir.path())).unwrap_err();
        assert!(format!("{err:#}").contains("run `helios init` first"));
    }
}
