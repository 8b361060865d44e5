//! Virtual display tree over an artifact's flat entry map.
//!
//! Paths are expanded into a trie, runs of single-child directories are
//! compacted into one node named by the `/`-joined segments, and the result is
//! materialized breadth-first into an arena of [`VirtualTreeNode`]s.
//!
//! Degenerate paths:
//! - a path ending in `/` (directory-only entry) never becomes a leaf and adds
//!   no nodes of its own;
//! - empty segments (`a//b`, leading `/`) are ignored for display, while leaf
//!   metadata still records the original key;
//! - the empty path becomes a leaf named after the tree's root display name.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt::Write as _;

use serde::Serialize;

use super::ArtifactId;

pub const META_ROOT: &str = "root";
pub const META_LEAF: &str = "leaf";
pub const META_PATH: &str = "path";
pub const META_ARTIFACT: &str = "artifact";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MetaValue {
    Flag(bool),
    Text(String),
    Artifact(ArtifactId),
}

#[derive(Debug, Clone, Serialize)]
pub struct VirtualTreeNode {
    name: String,
    display_name: String,
    #[serde(skip)]
    parent: Option<NodeId>,
    #[serde(skip)]
    children: BTreeMap<String, NodeId>,
    metadata: BTreeMap<String, MetaValue>,
}

impl VirtualTreeNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.children.iter().map(|(name, id)| (name.as_str(), *id))
    }

    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.children.get(name).copied()
    }

    pub fn metadata(&self, key: &str) -> Option<&MetaValue> {
        self.metadata.get(key)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.metadata.get(META_LEAF), Some(MetaValue::Flag(true)))
    }

    pub fn is_root(&self) -> bool {
        matches!(self.metadata.get(META_ROOT), Some(MetaValue::Flag(true)))
    }

    /// Full, un-compacted path of this node inside its artifact.
    pub fn path(&self) -> Option<&str> {
        match self.metadata.get(META_PATH) {
            Some(MetaValue::Text(path)) => Some(path),
            _ => None,
        }
    }

    pub fn artifact(&self) -> Option<ArtifactId> {
        match self.metadata.get(META_ARTIFACT) {
            Some(MetaValue::Artifact(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: MetaValue) {
        self.metadata.insert(key.into(), value);
    }
}

/// Arena-backed display tree; node 0 is the root.
#[derive(Debug, Clone, Serialize)]
pub struct VirtualTree {
    nodes: Vec<VirtualTreeNode>,
}

#[derive(Debug)]
struct TrieNode {
    name: String,
    path: String,
    parent: Option<usize>,
    children: BTreeMap<String, usize>,
    /// Original flat key when an entry ends at this node.
    entry_key: Option<String>,
    detached: bool,
}

const TRIE_ROOT: usize = 0;

impl VirtualTree {
    /// Build the compacted tree for the given flat entry paths.
    pub fn build<'a, I>(artifact: ArtifactId, root_name: &str, paths: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut trie = expand(root_name, paths);
        compact(&mut trie);
        materialize(&trie, artifact, root_name)
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &VirtualTreeNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut VirtualTreeNode {
        &mut self.nodes[id.0]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Follow display names from the root, e.g. `["com/example", "Foo.class"]`.
    pub fn find(&self, names: &[&str]) -> Option<NodeId> {
        names.iter().try_fold(self.root(), |id, name| self.node(id).child(name))
    }

    /// Every leaf in breadth-first order.
    pub fn leaves(&self) -> impl Iterator<Item = (NodeId, &VirtualTreeNode)> {
        self.nodes.iter().enumerate().filter(|(_, n)| n.is_leaf()).map(|(i, n)| (NodeId(i), n))
    }

    /// Indented text rendering, one node per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(self.root(), 0, &mut out);
        out
    }

    fn render_into(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = self.node(id);
        let marker = if node.is_leaf() { "" } else { "/" };
        let _ = writeln!(out, "{}{}{}", "  ".repeat(depth), node.display_name, marker);
        for (_, child) in node.children() {
            self.render_into(child, depth + 1, out);
        }
    }
}

/// Phase 1: expand flat paths into a trie.
fn expand<'a, I>(root_name: &str, paths: I) -> Vec<TrieNode>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut trie = vec![TrieNode {
        name: String::new(),
        path: String::new(),
        parent: None,
        children: BTreeMap::new(),
        entry_key: None,
        detached: false,
    }];

    for key in paths {
        let segments: Vec<&str> = if key.is_empty() {
            vec![root_name]
        } else if key.ends_with('/') {
            continue;
        } else {
            key.split('/').filter(|s| !s.is_empty()).collect()
        };
        if segments.is_empty() {
            continue;
        }

        let mut current = TRIE_ROOT;
        for (depth, segment) in segments.iter().enumerate() {
            current = match trie[current].children.get(*segment) {
                Some(&existing) => existing,
                None => {
                    let id = trie.len();
                    let path = if key.is_empty() { String::new() } else { segments[..=depth].join("/") };
                    trie.push(TrieNode {
                        name: segment.to_string(),
                        path,
                        parent: Some(current),
                        children: BTreeMap::new(),
                        entry_key: None,
                        detached: false,
                    });
                    trie[current].children.insert(segment.to_string(), id);
                    id
                }
            };
        }
        trie[current].entry_key.get_or_insert_with(|| key.to_string());
    }
    trie
}

/// Phase 2: merge single-child directory chains, working upward from leaves.
fn compact(trie: &mut [TrieNode]) {
    let mut queue: VecDeque<usize> = VecDeque::new();
    let mut visited: HashSet<usize> = HashSet::new();
    for node in trie.iter() {
        if node.entry_key.is_some() && node.children.is_empty() {
            if let Some(parent) = node.parent {
                if visited.insert(parent) {
                    queue.push_back(parent);
                }
            }
        }
    }

    while let Some(id) = queue.pop_front() {
        if id == TRIE_ROOT || trie[id].detached {
            continue;
        }
        while let Some(child) = mergeable_child(trie, id) {
            absorb(trie, id, child);
        }
        if let Some(parent) = trie[id].parent {
            if visited.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
}

/// The only child of `id`, if it is a directory and neither node carries an entry.
fn mergeable_child(trie: &[TrieNode], id: usize) -> Option<usize> {
    let node = &trie[id];
    if node.children.len() != 1 || node.entry_key.is_some() {
        return None;
    }
    let child = *node.children.values().next()?;
    let child_node = &trie[child];
    if child_node.children.is_empty() || child_node.entry_key.is_some() {
        return None;
    }
    Some(child)
}

fn absorb(trie: &mut [TrieNode], id: usize, child: usize) {
    let old_name = trie[id].name.clone();
    let merged_name = format!("{}/{}", old_name, trie[child].name);
    let grandchildren = std::mem::take(&mut trie[child].children);
    for &grandchild in grandchildren.values() {
        trie[grandchild].parent = Some(id);
    }
    trie[child].detached = true;
    trie[id].path = trie[child].path.clone();
    trie[id].children = grandchildren;
    trie[id].name = merged_name.clone();

    if let Some(parent) = trie[id].parent {
        trie[parent].children.remove(&old_name);
        trie[parent].children.insert(merged_name, id);
    }
}

/// Phase 3: breadth-first materialization into display nodes.
fn materialize(trie: &[TrieNode], artifact: ArtifactId, root_name: &str) -> VirtualTree {
    let mut nodes = Vec::new();
    let mut queue: VecDeque<(usize, Option<NodeId>)> = VecDeque::new();
    queue.push_back((TRIE_ROOT, None));

    while let Some((trie_id, parent)) = queue.pop_front() {
        let source = &trie[trie_id];
        let id = NodeId(nodes.len());
        let is_root = parent.is_none();
        let is_leaf = !is_root && source.children.is_empty();

        let mut metadata = BTreeMap::new();
        metadata.insert(META_ROOT.to_string(), MetaValue::Flag(is_root));
        metadata.insert(META_LEAF.to_string(), MetaValue::Flag(is_leaf));
        let path = if is_leaf {
            source.entry_key.clone().unwrap_or_else(|| source.path.clone())
        } else {
            source.path.clone()
        };
        metadata.insert(META_PATH.to_string(), MetaValue::Text(path));
        metadata.insert(META_ARTIFACT.to_string(), MetaValue::Artifact(artifact));

        let display_name = if is_root || source.name.is_empty() {
            root_name.to_string()
        } else {
            source.name.clone()
        };
        nodes.push(VirtualTreeNode {
            name: source.name.clone(),
            display_name,
            parent,
            children: BTreeMap::new(),
            metadata,
        });
        if let Some(parent) = parent {
            nodes[parent.0].children.insert(source.name.clone(), id);
        }

        for &child in source.children.values() {
            queue.push_back((child, Some(id)));
        }
    }

    VirtualTree { nodes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(paths: &[&str]) -> VirtualTree {
        VirtualTree::build(ArtifactId(7), "test.jar", paths.iter().copied())
    }

    #[test]
    fn sibling_leaves_share_one_compacted_directory() {
        let tree = build(&["a/b/c/D.class", "a/b/c/E.class"]);
        let root = tree.node(tree.root());
        let top: Vec<&str> = root.children().map(|(name, _)| name).collect();
        assert_eq!(top, vec!["a/b/c"]);

        let dir = tree.node(root.child("a/b/c").unwrap());
        assert_eq!(dir.display_name(), "a/b/c");
        assert_eq!(dir.path(), Some("a/b/c"));
        let leaves: Vec<&str> = dir.children().map(|(name, _)| name).collect();
        assert_eq!(leaves, vec!["D.class", "E.class"]);
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn single_path_compacts_down_to_parent_and_leaf() {
        let tree = build(&["x/y/Z.class"]);
        let leaf = tree.find(&["x/y", "Z.class"]).expect("compacted path");
        let leaf = tree.node(leaf);
        assert!(leaf.is_leaf());
        assert_eq!(leaf.path(), Some("x/y/Z.class"));
        assert_eq!(leaf.artifact(), Some(ArtifactId(7)));
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn branching_points_stop_compaction_but_chains_above_merge() {
        let tree = build(&["a/b/x/One.class", "a/b/y/Two.class", "a/Three.class"]);
        let a = tree.find(&["a"]).expect("a stays: it has two children");
        assert!(tree.node(a).child("b").is_some());
        assert!(tree.find(&["a", "b", "x", "One.class"]).is_some());

        let tree = build(&["p/q/x/One.class", "p/q/y/Two.class"]);
        assert!(tree.find(&["p/q", "x", "One.class"]).is_some());
        assert!(tree.find(&["p/q", "y", "Two.class"]).is_some());
    }

    #[test]
    fn directory_with_single_leaf_is_not_merged_into_the_leaf() {
        let tree = build(&["META-INF/MANIFEST.MF", "Main.class"]);
        assert!(tree.find(&["META-INF", "MANIFEST.MF"]).is_some());
        assert!(tree.node(tree.find(&["Main.class"]).unwrap()).is_leaf());
    }

    #[test]
    fn directory_only_entries_never_become_leaves() {
        let tree = build(&["com/", "com/example/", "com/example/A.class"]);
        let leaves: Vec<&str> = tree.leaves().map(|(_, n)| n.display_name()).collect();
        assert_eq!(leaves, vec!["A.class"]);
        assert!(tree.find(&["com/example", "A.class"]).is_some());
    }

    #[test]
    fn degenerate_paths_resolve_to_valid_leaves() {
        let tree = build(&["", "/lead//Slash.class"]);
        let empty = tree.node(tree.find(&["test.jar"]).expect("empty path leaf"));
        assert!(empty.is_leaf());
        assert_eq!(empty.path(), Some(""));

        let slash = tree.node(tree.find(&["lead", "Slash.class"]).expect("normalized"));
        assert_eq!(slash.path(), Some("/lead//Slash.class"));
    }

    #[test]
    fn every_leaf_keeps_its_full_original_path() {
        let paths = ["org/a/b/One.class", "org/a/b/c/Two.class", "org/z/Three.class", "README"];
        let tree = build(&paths);
        let mut recorded: Vec<&str> = tree.leaves().filter_map(|(_, n)| n.path()).collect();
        recorded.sort();
        let mut expected = paths.to_vec();
        expected.sort();
        assert_eq!(recorded, expected);
    }

    #[test]
    fn compaction_is_stable_across_rebuilds() {
        let paths = ["a/b/c/D.class", "a/b/c/E.class", "f/G.class"];
        assert_eq!(build(&paths).render(), build(&paths).render());
        assert_eq!(build(&paths).render(), "test.jar/\n  a/b/c/\n    D.class\n    E.class\n  f/\n    G.class\n");
    }
}
