use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};

use helios_core::model::{Capability, TransformOutcome, TransformPayload, ABORTED_MESSAGE};
use helios_core::services::ClasspathOrder;

use crate::canonicalize_or_current;
use crate::commands::{Session, SessionOptions};

/// Exit status for a transformation that ran but did not succeed.
pub const EXIT_FAILED: i32 = 1;
/// Exit status for a transformation that was aborted.
pub const EXIT_ABORTED: i32 = 130;

#[derive(Debug, Clone)]
pub struct TransformArgs {
    pub root: String,
    pub file: PathBuf,
    pub member: String,
    pub transformer: Option<String>,
    pub classpath: Vec<PathBuf>,
    pub open_order: bool,
    pub timeout_secs: Option<u64>,
    pub out: Option<PathBuf>,
}

/// Run one transformer over one entry and print the result.
///
/// Returns the process exit status: 0 on success, [`EXIT_FAILED`] when the
/// transformer reported a diagnostic, [`EXIT_ABORTED`] when it was cancelled.
pub fn transform_command(args: &TransformArgs) -> Result<i32> {
    let root_path = canonicalize_or_current(&args.root)?;
    let options = SessionOptions {
        order: if args.open_order { ClasspathOrder::OpenOrder } else { ClasspathOrder::TargetFirst },
        deadline: args.timeout_secs.map(Duration::from_secs),
    };
    let session = Session::open(&root_path, options)?;

    for extra in &args.classpath {
        session.open_artifact(extra)?;
    }
    let artifact = session.open_artifact(&args.file)?;
    let transformer =
        session.transformer_or_default(args.transformer.as_deref(), Capability::Decompiler)?;
    tracing::debug!(
        transformer = %transformer.id(),
        member = %args.member,
        open = session.workspace.artifacts().len(),
        "dispatching"
    );

    let (tx, rx) = mpsc::channel();
    let handle = session.dispatcher.invoke(&artifact, &args.member, &transformer, move |outcome| {
        let _ = tx.send(outcome);
    });
    let outcome = rx.recv().unwrap_or(TransformOutcome::Cancelled);
    if let Some(handle) = handle {
        handle.wait();
    }

    let status = match outcome {
        TransformOutcome::Succeeded(payload) => {
            emit(&payload, args.out.as_deref())?;
            0
        }
        TransformOutcome::Failed(message) => {
            eprintln!("{message}");
            EXIT_FAILED
        }
        TransformOutcome::Cancelled => {
            eprintln!("{ABORTED_MESSAGE}");
            EXIT_ABORTED
        }
    };

    session.finish()?;
    Ok(status)
}

fn emit(payload: &TransformPayload, out: Option<&Path>) -> Result<()> {
    if let Some(out) = out {
        fs::write(out, payload.as_bytes())
            .with_context(|| format!("Failed to write output to {}", out.display()))?;
        println!("Wrote {} bytes to {}", payload.as_bytes().len(), out.display());
        return Ok(());
    }
    match payload {
        TransformPayload::Text(text) => {
            print!("{text}");
            if !text.ends_with('\n') {
                println!();
            }
        }
        TransformPayload::Bytes(bytes) => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(bytes).context("Failed to write output")?;
            stdout.flush().context("Failed to write output")?;
        }
    }
    Ok(())
}
