use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::db::{open_settings_db, SettingsDb, ToolPaths, WorkspaceConfig, WorkspaceLayout};

/// An initialized workspace: its config plus the open transformer settings store.
#[derive(Debug)]
pub struct WorkspaceContext {
    pub layout: WorkspaceLayout,
    pub config: WorkspaceConfig,
    pub db_path: PathBuf,
    pub db: SettingsDb,
}

impl WorkspaceContext {
    pub fn from_root(root: impl AsRef<Path>) -> Result<Self> {
        let layout = WorkspaceLayout::new(root);
        let (config, db_path, db) = open_settings_db(&layout)?;
        tracing::debug!(workspace = %config.name, db = %db_path.display(), "workspace loaded");
        Ok(Self { layout, config, db_path, db })
    }

    /// External tool locations: `HELIOS_*` variables, then config (relative to the root), then PATH.
    pub fn tool_paths(&self) -> ToolPaths {
        self.config.tools.clone().relative_to(&self.layout.root).with_env_overrides()
    }
}
