use std::path::{Path, PathBuf};

/// Logical layout of a workspace on disk.
///
/// This is derived from a chosen root path. It does *not* perform any IO itself.
/// The CLI or other frontends are responsible for actually creating directories
/// and files based on this layout.
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    /// Root directory of the workspace.
    pub root: PathBuf,
    /// Directory for internal metadata (.helios).
    pub meta_dir: PathBuf,
    /// Path to the workspace config file (JSON).
    pub config_path: PathBuf,
    /// Path to the settings database file.
    pub db_path: PathBuf,
    /// Directory batch exports are written to by default.
    pub exports_dir: PathBuf,
}

impl WorkspaceLayout {
    /// Compute the default layout for a workspace rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let meta_dir = root.join(".helios");
        let config_path = meta_dir.join("config.json");
        let db_path = meta_dir.join("settings.db");
        let exports_dir = root.join("exports");
        Self { root, meta_dir, config_path, db_path, exports_dir }
    }

    /// Database path suitable for storing in `WorkspaceConfig`, relative to `root` when possible.
    pub fn db_path_relative_string(&self) -> String {
        match self.db_path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_string_lossy().to_string(),
            Err(_) => self.db_path.to_string_lossy().to_string(),
        }
    }

    /// Default export bundle path for an opened file.
    pub fn export_path(&self, artifact_name: &str, transformer_id: &str) -> PathBuf {
        self.exports_dir.join(format!("{artifact_name}.{transformer_id}.zip"))
    }

    pub fn is_initialized(&self) -> bool {
        self.config_path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_the_root() {
        let layout = WorkspaceLayout::new("/ws");
        assert_eq!(layout.config_path, PathBuf::from("/ws/.helios/config.json"));
        assert_eq!(layout.db_path_relative_string(), ".helios/settings.db");
        assert_eq!(layout.export_path("app.jar", "cfr"), PathBuf::from("/ws/exports/app.jar.cfr.zip"));
    }
}
