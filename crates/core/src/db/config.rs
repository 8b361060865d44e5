use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::Capability;

/// Location of the settings database (typically relative to the workspace root).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    pub path: String,
}

impl DbConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Paths of the external tools the built-in backends drive.
///
/// Anything left unset falls back to an environment override, and for the
/// launchers (`java`, `python`, `javap`) to the bare command name on `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPaths {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub python: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub javap: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cfr_jar: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procyon_jar: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub krakatau_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baksmali_jar: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smali_jar: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dex2jar_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enjarify_dir: Option<PathBuf>,
}

pub const ENV_JAVA: &str = "HELIOS_JAVA";
pub const ENV_PYTHON: &str = "HELIOS_PYTHON";
pub const ENV_JAVAP: &str = "HELIOS_JAVAP";
pub const ENV_CFR_JAR: &str = "HELIOS_CFR_JAR";
pub const ENV_PROCYON_JAR: &str = "HELIOS_PROCYON_JAR";
pub const ENV_KRAKATAU_DIR: &str = "HELIOS_KRAKATAU_DIR";
pub const ENV_BAKSMALI_JAR: &str = "HELIOS_BAKSMALI_JAR";
pub const ENV_SMALI_JAR: &str = "HELIOS_SMALI_JAR";
pub const ENV_DEX2JAR_DIR: &str = "HELIOS_DEX2JAR_DIR";
pub const ENV_ENJARIFY_DIR: &str = "HELIOS_ENJARIFY_DIR";

impl ToolPaths {
    /// Apply `HELIOS_*` environment overrides on top of these paths.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var_os(key))
    }

    /// Apply overrides from an arbitrary lookup (environment-shaped).
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let pick = |key: &str, current: &mut Option<PathBuf>| {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *current = Some(PathBuf::from(value));
            }
        };
        pick(ENV_JAVA, &mut self.java);
        pick(ENV_PYTHON, &mut self.python);
        pick(ENV_JAVAP, &mut self.javap);
        pick(ENV_CFR_JAR, &mut self.cfr_jar);
        pick(ENV_PROCYON_JAR, &mut self.procyon_jar);
        pick(ENV_KRAKATAU_DIR, &mut self.krakatau_dir);
        pick(ENV_BAKSMALI_JAR, &mut self.baksmali_jar);
        pick(ENV_SMALI_JAR, &mut self.smali_jar);
        pick(ENV_DEX2JAR_DIR, &mut self.dex2jar_dir);
        pick(ENV_ENJARIFY_DIR, &mut self.enjarify_dir);
        self
    }

    pub fn java_or_default(&self) -> PathBuf {
        self.java.clone().unwrap_or_else(|| PathBuf::from("java"))
    }

    pub fn python_or_default(&self) -> PathBuf {
        self.python.clone().unwrap_or_else(|| PathBuf::from("python3"))
    }

    pub fn javap_or_default(&self) -> PathBuf {
        self.javap.clone().unwrap_or_else(|| PathBuf::from("javap"))
    }

    /// Resolve relative tool paths against `root`.
    pub fn relative_to(mut self, root: &Path) -> Self {
        for path in [
            &mut self.cfr_jar,
            &mut self.procyon_jar,
            &mut self.krakatau_dir,
            &mut self.baksmali_jar,
            &mut self.smali_jar,
            &mut self.dex2jar_dir,
            &mut self.enjarify_dir,
        ]
        .into_iter()
        .flatten()
        {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
        self
    }
}

/// Serializable workspace configuration, stored at `.helios/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Human-friendly workspace name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Config format version.
    pub config_version: String,
    /// Settings database location.
    pub db: DbConfig,
    #[serde(default)]
    pub tools: ToolPaths,
    /// Preferred transformer id per capability, overriding "first registered".
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub default_transformers: BTreeMap<Capability, String>,
}

impl WorkspaceConfig {
    pub fn new(name: impl Into<String>, db_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            config_version: "0.1.0".to_string(),
            db: DbConfig::new(db_path),
            tools: ToolPaths::default(),
            default_transformers: BTreeMap::new(),
        }
    }
}
