use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use helios_core::archive::{NodeId, VirtualTree};
use helios_core::classfile;

use crate::canonicalize_or_current;
use crate::commands::{Session, SessionOptions};

#[derive(Debug, Serialize)]
pub struct EntryInfo {
    pub path: String,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OpenSummary {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub entries: Vec<EntryInfo>,
    pub tree: TreeNodeInfo,
}

/// Nested view of a compacted tree node.
#[derive(Debug, Serialize)]
pub struct TreeNodeInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNodeInfo>,
}

fn tree_info(tree: &VirtualTree, id: NodeId) -> TreeNodeInfo {
    let node = tree.node(id);
    TreeNodeInfo {
        name: node.display_name().to_string(),
        path: node.path().filter(|_| node.is_leaf()).map(str::to_string),
        children: node.children().map(|(_, child)| tree_info(tree, child)).collect(),
    }
}

/// Open a class/jar/apk/dex file and print its entries as a compacted tree.
pub fn open_command(root: &str, file: &Path, json: bool) -> Result<()> {
    let root_path = canonicalize_or_current(root)?;
    let session = Session::open(&root_path, SessionOptions::default())?;
    let artifact = session.open_artifact(file)?;
    let snapshot = artifact.snapshot();

    let entries: Vec<EntryInfo> = snapshot
        .entries
        .iter()
        .map(|(path, bytes)| EntryInfo {
            path: path.clone(),
            size: bytes.len(),
            class_name: classfile::probe(bytes).ok().map(|info| info.internal_name),
        })
        .collect();

    if json {
        let summary = OpenSummary {
            name: artifact.display_name(),
            path: artifact.path().display().to_string(),
            sha256: snapshot.sha256.clone(),
            entries,
            tree: tree_info(&snapshot.tree, snapshot.tree.root()),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{} ({} entries)", artifact.display_name(), entries.len());
        println!("sha256: {}", snapshot.sha256);
        print!("{}", snapshot.tree.render());
    }

    session.finish()
}
