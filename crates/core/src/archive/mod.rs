//! Opened artifacts: reading containers into flat entry maps and display trees.
//!
//! This module contains:
//! - `read_entries`: zip-like archive reading with a single-file fallback
//! - `VirtualTree`: the compacted display hierarchy (see `tree`)
//! - `OpenedArtifact` / `Workspace`: lifecycle of user-opened files

mod artifact;
pub mod tree;

pub use artifact::{ArtifactState, EntryMap, OpenedArtifact, Workspace};
pub use tree::{MetaValue, NodeId, VirtualTree, VirtualTreeNode};

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use zip::ZipArchive;

/// Identity of an opened artifact within a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ArtifactId(pub u64);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no open artifact with id {0}")]
    UnknownArtifact(ArtifactId),
}

/// Entries larger than this are not pre-allocated from the (untrusted) header size.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Read every entry of `raw` as an archive, falling back to a single entry
/// keyed by the file's own name when it is not an archive or has no entries.
///
/// Directory, empty and unreadable entries are skipped; duplicate names keep
/// the first occurrence.
pub fn read_entries(path: &Path, raw: &[u8]) -> BTreeMap<String, Arc<[u8]>> {
    match zip_entries(raw) {
        Ok(entries) if !entries.is_empty() => entries,
        Ok(_) => {
            tracing::debug!(path = %path.display(), "archive has no readable entries; treating as a single file");
            single_entry(path, raw)
        }
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "not an archive; treating as a single file");
            single_entry(path, raw)
        }
    }
}

fn zip_entries(raw: &[u8]) -> zip::result::ZipResult<BTreeMap<String, Arc<[u8]>>> {
    let mut archive = ZipArchive::new(Cursor::new(raw))?;
    let mut entries = BTreeMap::new();
    for idx in 0..archive.len() {
        let mut entry = match archive.by_index(idx) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(index = idx, error = %e, "skipping unreadable archive entry");
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let mut data = Vec::with_capacity(entry.size().min(MAX_PREALLOCATION) as usize);
        if let Err(e) = entry.read_to_end(&mut data) {
            tracing::warn!(entry = %name, error = %e, "skipping unreadable archive entry");
            continue;
        }
        if data.is_empty() {
            continue;
        }
        entries.entry(name).or_insert_with(|| Arc::from(data));
    }
    Ok(entries)
}

fn single_entry(path: &Path, raw: &[u8]) -> BTreeMap<String, Arc<[u8]>> {
    let mut entries = BTreeMap::new();
    entries.insert(file_name(path), Arc::from(raw));
    entries
}

/// Final path component as a string; empty when the path has none.
pub fn file_name(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()
}
