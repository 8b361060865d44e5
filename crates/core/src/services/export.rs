//! "Export all as source": run one transformer over every eligible entry of
//! an artifact and bundle the results into a zip.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;

use serde::Serialize;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::archive::OpenedArtifact;
use crate::model::{Capability, TransformOutcome, TransformPayload, ABORTED_MESSAGE};
use crate::services::dispatcher::Dispatcher;
use crate::services::registry::Transformer;

/// Name of the diagnostics file inside every bundle.
pub const FAILURES_FILE: &str = "failures.txt";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write export bundle {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write export bundle {path}: {source}")]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

/// What ended up in an export bundle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub path: PathBuf,
    /// Member path -> file written inside the bundle.
    pub written: BTreeMap<String, String>,
    /// Member path -> diagnostic.
    pub failures: BTreeMap<String, String>,
    pub aborted: Vec<String>,
    /// Entries the transformer does not accept (resources, manifests, ...).
    pub skipped: usize,
}

/// Transform every entry of `artifact` that `transformer` accepts and write the bundle to `out`.
pub fn export_sources(
    dispatcher: &Dispatcher,
    artifact: &Arc<OpenedArtifact>,
    transformer: &Arc<Transformer>,
    out: &Path,
) -> Result<ExportReport, ExportError> {
    let entries = artifact.entries();
    let limit = thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    let (tx, rx) = mpsc::channel();
    let mut outcomes: BTreeMap<String, TransformOutcome> = BTreeMap::new();
    let mut in_flight = 0usize;
    let mut skipped = 0usize;

    for (member, bytes) in entries.iter() {
        if transformer.validate(bytes).is_err() {
            skipped += 1;
            continue;
        }
        // At most `limit` transformations run at once.
        if in_flight == limit {
            if let Ok((done, outcome)) = rx.recv() {
                outcomes.insert(done, outcome);
            }
            in_flight -= 1;
        }
        let tx = tx.clone();
        let key = member.clone();
        dispatcher.invoke(artifact, member, transformer, move |outcome| {
            let _ = tx.send((key, outcome));
        });
        in_flight += 1;
    }
    drop(tx);
    tracing::info!(artifact = %artifact.display_name(), transformer = %transformer.id(), skipped, "exporting");

    for (member, outcome) in rx.iter().take(in_flight) {
        outcomes.insert(member, outcome);
    }

    let mut report = ExportReport { path: out.to_path_buf(), skipped, ..ExportReport::default() };
    let io_err = |source| ExportError::Io { path: out.to_path_buf(), source };
    let zip_err = |source| ExportError::Zip { path: out.to_path_buf(), source };

    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut zip = ZipWriter::new(File::create(out).map_err(io_err)?);
    let options = SimpleFileOptions::default();

    for (member, outcome) in outcomes {
        match outcome {
            TransformOutcome::Succeeded(payload) => {
                let name = output_name(&member, transformer.capability(), &payload);
                zip.start_file(name.as_str(), options).map_err(zip_err)?;
                zip.write_all(payload.as_bytes()).map_err(io_err)?;
                report.written.insert(member, name);
            }
            TransformOutcome::Failed(message) => {
                report.failures.insert(member, message);
            }
            TransformOutcome::Cancelled => report.aborted.push(member),
        }
    }

    if !report.failures.is_empty() || !report.aborted.is_empty() {
        zip.start_file(FAILURES_FILE, options).map_err(zip_err)?;
        let mut text = String::new();
        for (member, message) in &report.failures {
            text.push_str(&format!("== {member}\n{message}\n\n"));
        }
        for member in &report.aborted {
            text.push_str(&format!("== {member}\n{ABORTED_MESSAGE}\n\n"));
        }
        zip.write_all(text.as_bytes()).map_err(io_err)?;
    }
    zip.finish().map_err(zip_err)?;

    tracing::info!(
        written = report.written.len(),
        failed = report.failures.len(),
        aborted = report.aborted.len(),
        path = %out.display(),
        "export finished"
    );
    Ok(report)
}

fn output_name(member: &str, capability: Capability, payload: &TransformPayload) -> String {
    let stem = member.strip_suffix(".class").unwrap_or(member);
    match (capability, payload) {
        (Capability::Decompiler, TransformPayload::Text(_)) => format!("{stem}.java"),
        (_, TransformPayload::Text(_)) => format!("{stem}.txt"),
        (_, TransformPayload::Bytes(_)) => format!("{stem}.bin"),
    }
}
