//! Workspace configuration and settings persistence.
//!
//! This module contains:
//! - `WorkspaceLayout`: computed paths for the workspace directories/files.
//! - `WorkspaceConfig` / `ToolPaths`: serializable workspace metadata.
//! - `SettingsDb`: a small SQLite wrapper implementing `ConfigStore`.
//! - `WorkspaceContext`: an initialized workspace with its settings store open.

mod config;
mod context;
mod layout;
mod settings_db;
mod util;

pub use config::*;
pub use context::WorkspaceContext;
pub use layout::WorkspaceLayout;
pub use settings_db::{DbError, DbResult, SettingsDb, StoredSetting, CURRENT_SCHEMA_VERSION};
pub use util::{load_workspace_config, open_settings_db, settings_db_path};
