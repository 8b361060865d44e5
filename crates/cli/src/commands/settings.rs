use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use helios_core::settings::{SettingKind, SettingValue};

use crate::canonicalize_or_current;
use crate::commands::{Session, SessionOptions};
use crate::parse_assignment;

#[derive(Debug, Serialize)]
pub struct SettingInfo {
    pub param: String,
    pub description: String,
    pub kind: SettingKind,
    pub value: String,
    pub default: SettingValue,
}

#[derive(Debug, Serialize)]
pub struct SettingsSnapshot {
    pub transformer: String,
    pub persistent: bool,
    pub settings: Vec<SettingInfo>,
    pub args: Vec<String>,
}

/// Show (and optionally update) the stored settings of one transformer.
///
/// Listing resolves every setting first, so missing or unreadable stored
/// values are healed back to their defaults.
pub fn settings_command(root: &str, transformer: &str, assignments: &[String], json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let session = Session::open(&root_path, SessionOptions::default())?;
    let transformer = session.transformer(transformer)?;
    let settings = transformer.settings();

    for raw in assignments {
        let (param, value) = parse_assignment(raw).map_err(|e| anyhow!(e))?;
        let stored = settings
            .update(transformer.id(), &param, &value, &*session.store)
            .with_context(|| format!("Failed to update {}.{param}", transformer.id()))?;
        tracing::info!(transformer = %transformer.id(), %param, value = %stored, "setting updated");
    }

    let resolved = settings
        .resolve(transformer.id(), transformer.backend().default_settings(), &*session.store)
        .with_context(|| format!("Failed to resolve settings for {}", transformer.id()))?;

    let mut infos = Vec::with_capacity(settings.len());
    for setting in settings.iter() {
        let value = session
            .store
            .get(transformer.id(), setting.param())
            .with_context(|| format!("Failed to read {}.{}", transformer.id(), setting.param()))?
            .unwrap_or_else(|| setting.serialize(setting.default_value()));
        infos.push(SettingInfo {
            param: setting.param().to_string(),
            description: setting.desc().to_string(),
            kind: setting.kind(),
            value,
            default: setting.default_value().clone(),
        });
    }

    let snapshot = SettingsSnapshot {
        transformer: transformer.id().to_string(),
        persistent: session.db.is_some(),
        settings: infos,
        args: resolved.args().to_vec(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return session.finish();
    }

    println!("Settings for {} ({}):", transformer.name(), transformer.id());
    if snapshot.settings.is_empty() {
        println!("  (none)");
    }
    for info in &snapshot.settings {
        let marker = if info.value == info.default.to_string() { "" } else { " *" };
        println!("  {} = {}{}  # {}", info.param, info.value, marker, info.description);
    }
    if !snapshot.args.is_empty() {
        println!("Arguments: {}", snapshot.args.join(" "));
    }
    if !snapshot.persistent {
        println!("(no workspace at {}; changes are not saved)", session.layout.root.display());
    }

    session.finish()
}
