use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use helios_core::model::Capability;
use helios_core::services::export::{export_sources, FAILURES_FILE};

use crate::canonicalize_or_current;
use crate::commands::{Session, SessionOptions};

/// Transform every eligible entry of `file` and bundle the results into a zip.
pub fn export_command(
    root: &str,
    file: &Path,
    transformer: Option<&str>,
    out: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let session = Session::open(&root_path, SessionOptions::default())?;
    let artifact = session.open_artifact(file)?;
    let transformer = session.transformer_or_default(transformer, Capability::Decompiler)?;
    let out = out.unwrap_or_else(|| session.layout.export_path(&artifact.display_name(), transformer.id()));

    let report = export_sources(&session.dispatcher, &artifact, &transformer, &out)
        .with_context(|| format!("Failed to export {}", artifact.display_name()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Exported {} with {}:", artifact.display_name(), transformer.name());
        println!("  Bundle: {}", report.path.display());
        println!("  Written: {}", report.written.len());
        println!("  Failed: {}", report.failures.len());
        println!("  Aborted: {}", report.aborted.len());
        println!("  Skipped: {}", report.skipped);
        if !report.failures.is_empty() || !report.aborted.is_empty() {
            println!("  Diagnostics: {FAILURES_FILE} inside the bundle");
        }
    }

    session.finish()
}
