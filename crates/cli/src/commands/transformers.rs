use anyhow::Result;
use serde::Serialize;

use helios_core::model::Capability;

use crate::canonicalize_or_current;
use crate::commands::{Session, SessionOptions};

#[derive(Debug, Serialize)]
pub struct TransformerInfo {
    pub id: String,
    pub name: String,
    pub capability: Capability,
    pub settings: usize,
}

/// List registered transformers in registration order.
pub fn list_transformers_command(
    root: &str,
    capability: Option<Capability>,
    json: bool,
) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let session = Session::open(&root_path, SessionOptions::default())?;

    let entries: Vec<TransformerInfo> = session
        .registry
        .all(|t| capability.map_or(true, |c| t.capability() == c))
        .map(|t| TransformerInfo {
            id: t.id().to_string(),
            name: t.name().to_string(),
            capability: t.capability(),
            settings: t.settings().len(),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return session.finish();
    }

    if entries.is_empty() {
        println!("Transformers: (none)");
        return session.finish();
    }

    println!("Transformers:");
    for entry in entries {
        println!("- {} [{}]: {}", entry.id, entry.capability, entry.name);
    }

    session.finish()
}
