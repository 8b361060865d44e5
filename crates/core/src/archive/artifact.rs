use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};

use super::{file_name, read_entries, ArchiveError, ArtifactId, VirtualTree};
use crate::events::{Event, EventBus};

/// Flat `path -> bytes` view of an artifact.
pub type EntryMap = BTreeMap<String, Arc<[u8]>>;

/// Immutable snapshot of an artifact's derived state.
///
/// Mutations build a new snapshot and swap it in, so readers never observe a
/// half-written entry map.
#[derive(Debug)]
pub struct ArtifactState {
    pub raw: Arc<[u8]>,
    pub entries: Arc<EntryMap>,
    pub tree: Arc<VirtualTree>,
    pub sha256: String,
}

/// One user-opened file.
#[derive(Debug)]
pub struct OpenedArtifact {
    id: ArtifactId,
    path: PathBuf,
    state: RwLock<Arc<ArtifactState>>,
}

impl OpenedArtifact {
    /// Read `path` from disk and build its entry map and tree.
    pub fn open(id: ArtifactId, path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let state = load(id, &path)?;
        Ok(Self { id, path, state: RwLock::new(Arc::new(state)) })
    }

    pub fn id(&self) -> ArtifactId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn display_name(&self) -> String {
        file_name(&self.path)
    }

    /// Current snapshot of all derived state.
    pub fn snapshot(&self) -> Arc<ArtifactState> {
        Arc::clone(&self.state.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn entries(&self) -> Arc<EntryMap> {
        Arc::clone(&self.snapshot().entries)
    }

    pub fn entry(&self, path: &str) -> Option<Arc<[u8]>> {
        self.snapshot().entries.get(path).cloned()
    }

    pub fn tree(&self) -> Arc<VirtualTree> {
        Arc::clone(&self.snapshot().tree)
    }

    pub fn sha256(&self) -> String {
        self.snapshot().sha256.clone()
    }

    /// Re-read the file from disk and rebuild entries and tree.
    pub fn reset(&self) -> Result<(), ArchiveError> {
        let fresh = load(self.id, &self.path)?;
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(fresh);
        tracing::debug!(artifact = %self.id, path = %self.path.display(), "artifact reset");
        Ok(())
    }

    /// Replace (or add) one entry in place, e.g. after assembling a member.
    pub fn replace_entry(&self, path: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        let path = path.into();
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        let current = Arc::clone(&guard);

        let mut entries = (*current.entries).clone();
        let is_new = entries.insert(path.clone(), bytes.into()).is_none();
        let tree = if is_new {
            Arc::new(build_tree(self.id, &self.path, &entries))
        } else {
            Arc::clone(&current.tree)
        };

        *guard = Arc::new(ArtifactState {
            raw: Arc::clone(&current.raw),
            entries: Arc::new(entries),
            tree,
            sha256: current.sha256.clone(),
        });
        tracing::debug!(artifact = %self.id, entry = %path, "entry replaced");
    }
}

fn load(id: ArtifactId, path: &Path) -> Result<ArtifactState, ArchiveError> {
    let raw = std::fs::read(path)
        .map_err(|source| ArchiveError::Read { path: path.to_path_buf(), source })?;
    let entries = read_entries(path, &raw);
    let tree = build_tree(id, path, &entries);
    let sha256 = format!("{:x}", Sha256::digest(&raw));
    Ok(ArtifactState {
        raw: Arc::from(raw),
        entries: Arc::new(entries),
        tree: Arc::new(tree),
        sha256,
    })
}

fn build_tree(id: ArtifactId, path: &Path, entries: &EntryMap) -> VirtualTree {
    VirtualTree::build(id, &file_name(path), entries.keys().map(String::as_str))
}

/// Ordered collection of opened artifacts (open order is preserved).
#[derive(Debug, Default)]
pub struct Workspace {
    next_id: AtomicU64,
    artifacts: RwLock<Vec<Arc<OpenedArtifact>>>,
    events: Option<Arc<EventBus>>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Arc<EventBus>) -> Self {
        Self { events: Some(events), ..Self::default() }
    }

    pub fn open(&self, path: impl AsRef<Path>) -> Result<Arc<OpenedArtifact>, ArchiveError> {
        let id = ArtifactId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let artifact = Arc::new(OpenedArtifact::open(id, path)?);
        self.artifacts.write().unwrap_or_else(|e| e.into_inner()).push(Arc::clone(&artifact));
        tracing::info!(artifact = %id, path = %artifact.path().display(), entries = artifact.entries().len(), "opened artifact");
        self.publish(Event::ArtifactOpened { id, path: artifact.path().to_path_buf() });
        Ok(artifact)
    }

    pub fn get(&self, id: ArtifactId) -> Option<Arc<OpenedArtifact>> {
        self.artifacts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|a| a.id() == id)
            .cloned()
    }

    /// Snapshot of all open artifacts in open order.
    pub fn artifacts(&self) -> Vec<Arc<OpenedArtifact>> {
        self.artifacts.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn close(&self, id: ArtifactId) -> Result<(), ArchiveError> {
        let mut artifacts = self.artifacts.write().unwrap_or_else(|e| e.into_inner());
        let before = artifacts.len();
        artifacts.retain(|a| a.id() != id);
        if artifacts.len() == before {
            return Err(ArchiveError::UnknownArtifact(id));
        }
        drop(artifacts);
        self.publish(Event::ArtifactClosed { id });
        Ok(())
    }

    pub fn clear(&self) {
        let closed: Vec<ArtifactId> = {
            let mut artifacts = self.artifacts.write().unwrap_or_else(|e| e.into_inner());
            artifacts.drain(..).map(|a| a.id()).collect()
        };
        for id in closed {
            self.publish(Event::ArtifactClosed { id });
        }
    }

    fn publish(&self, event: Event) {
        if let Some(events) = &self.events {
            events.publish(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use std::sync::Mutex;

    #[test]
    fn replace_entry_swaps_snapshot_without_touching_old_readers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("A.class");
        std::fs::write(&path, b"v1").unwrap();
        let artifact = OpenedArtifact::open(ArtifactId(1), &path).unwrap();

        let before = artifact.entries();
        artifact.replace_entry("A.class", b"v2".to_vec());
        assert_eq!(&*before["A.class"], b"v1");
        assert_eq!(artifact.entry("A.class").as_deref(), Some(&b"v2"[..]));

        artifact.replace_entry("B.class", b"new".to_vec());
        assert!(artifact.tree().find(&["B.class"]).is_some());
    }

    #[test]
    fn reset_rereads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("A.class");
        std::fs::write(&path, b"v1").unwrap();
        let artifact = OpenedArtifact::open(ArtifactId(1), &path).unwrap();
        artifact.replace_entry("A.class", b"edited".to_vec());

        std::fs::write(&path, b"v3").unwrap();
        artifact.reset().unwrap();
        assert_eq!(artifact.entry("A.class").as_deref(), Some(&b"v3"[..]));
    }

    #[test]
    fn workspace_keeps_open_order_and_publishes_events() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.bin");
        let second = dir.path().join("second.bin");
        std::fs::write(&first, b"1").unwrap();
        std::fs::write(&second, b"2").unwrap();

        let bus = Arc::new(EventBus::new());
        let closed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&closed);
        bus.subscribe(EventKind::ArtifactClosed, move |e| sink.lock().unwrap().push(e.clone()));

        let workspace = Workspace::with_events(bus);
        let a = workspace.open(&first).unwrap();
        let b = workspace.open(&second).unwrap();
        let order: Vec<ArtifactId> = workspace.artifacts().iter().map(|x| x.id()).collect();
        assert_eq!(order, vec![a.id(), b.id()]);

        workspace.close(a.id()).unwrap();
        assert!(workspace.get(a.id()).is_none());
        assert!(matches!(workspace.close(a.id()), Err(ArchiveError::UnknownArtifact(_))));
        assert_eq!(closed.lock().unwrap().len(), 1);

        workspace.clear();
        assert!(workspace.artifacts().is_empty());
        assert_eq!(closed.lock().unwrap().len(), 2);
    }

    #[test]
    fn open_reports_missing_files() {
        let workspace = Workspace::new();
        let err = workspace.open("/no/such/file.jar").unwrap_err();
        assert!(matches!(err, ArchiveError::Read { .. }));
    }
}
