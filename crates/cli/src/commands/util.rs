use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use helios_core::archive::{OpenedArtifact, Workspace};
use helios_core::db::{SettingsDb, ToolPaths, WorkspaceConfig, WorkspaceContext, WorkspaceLayout};
use helios_core::model::Capability;
use helios_core::process::ProcessLauncher;
use helios_core::services::backends::default_registry;
use helios_core::services::{ClasspathOrder, Dispatcher, Scheduler, Transformer, TransformerRegistry};
use helios_core::settings::{ConfigStore, MemoryConfigStore};

/// Everything a command needs to open files and run transformers.
///
/// Settings persist to the workspace database when `root` has been
/// initialized; otherwise they live in memory for the duration of the command.
pub struct Session {
    pub layout: WorkspaceLayout,
    pub config: Option<WorkspaceConfig>,
    pub db: Option<Arc<SettingsDb>>,
    pub store: Arc<dyn ConfigStore>,
    pub launcher: ProcessLauncher,
    pub registry: TransformerRegistry,
    pub workspace: Arc<Workspace>,
    pub scheduler: Scheduler,
    pub dispatcher: Dispatcher,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    pub order: ClasspathOrder,
    pub deadline: Option<Duration>,
}

impl Session {
    pub fn open(root: &Path, options: SessionOptions) -> Result<Self> {
        let layout = WorkspaceLayout::new(root);
        let (config, db, tools) = if layout.is_initialized() {
            let context = WorkspaceContext::from_root(root)?;
            let tools = context.tool_paths();
            (Some(context.config), Some(Arc::new(context.db)), tools)
        } else {
            tracing::debug!(root = %root.display(), "no workspace here; settings will not persist");
            (None, None, ToolPaths::default().with_env_overrides())
        };
        let store: Arc<dyn ConfigStore> = match &db {
            Some(db) => db.clone() as Arc<dyn ConfigStore>,
            None => Arc::new(MemoryConfigStore::new()),
        };

        let launcher = ProcessLauncher::new();
        let registry =
            default_registry(&tools, &launcher).context("Failed to register built-in transformers")?;
        let workspace = Arc::new(Workspace::new());
        let scheduler = Scheduler::new();
        let mut dispatcher = Dispatcher::new(workspace.clone(), scheduler.clone(), store.clone())
            .with_classpath_order(options.order);
        if let Some(deadline) = options.deadline {
            dispatcher = dispatcher.with_deadline(deadline);
        }

        Ok(Self { layout, config, db, store, launcher, registry, workspace, scheduler, dispatcher })
    }

    /// Open `path` into the session workspace.
    pub fn open_artifact(&self, path: &Path) -> Result<Arc<OpenedArtifact>> {
        self.workspace.open(path).with_context(|| format!("Failed to open {}", path.display()))
    }

    /// Look a transformer up by id, then by display name.
    pub fn transformer(&self, key: &str) -> Result<Arc<Transformer>> {
        self.registry
            .get_by_id(key)
            .or_else(|| self.registry.get_by_name(key))
            .cloned()
            .ok_or_else(|| anyhow!("Unknown transformer '{key}' (see `helios transformers`)"))
    }

    /// Explicit choice, else the workspace default for `capability`, else the first registered one.
    pub fn transformer_or_default(
        &self,
        key: Option<&str>,
        capability: Capability,
    ) -> Result<Arc<Transformer>> {
        if let Some(key) = key {
            return self.transformer(key);
        }
        let configured = self.config.as_ref().and_then(|c| c.default_transformers.get(&capability));
        match configured {
            Some(id) => self.transformer(id),
            None => self
                .registry
                .first(capability)
                .cloned()
                .ok_or_else(|| anyhow!("No {capability} transformer is registered")),
        }
    }

    /// Persist finished task records and stop the scheduler and any child processes.
    pub fn finish(self) -> Result<()> {
        self.scheduler.shutdown();
        self.launcher.destroy_all();
        if let Some(db) = &self.db {
            for record in self.scheduler.history() {
                db.insert_task_run(&record).context("Failed to record task run")?;
            }
        }
        Ok(())
    }
}
