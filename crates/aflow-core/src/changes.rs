//! Structural diff between two hash tree snapshots.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::hashtree::{HashNode, NodeKind, ScanOptions};

/// Function-level detail for one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FunctionChanges {
    pub added: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl FunctionChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Names whose current definition must be (re)registered.
    pub fn touched(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(self.modified.iter())
    }
}

/// Classified difference between two snapshots.
///
/// The three top-level sets are disjoint and hold only tracked source files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub added: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    /// Per-file function detail, keyed by file identity.
    pub functions: BTreeMap<String, FunctionChanges>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Total number of changed files.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    pub fn functions_of(&self, file: &str) -> Option<&FunctionChanges> {
        self.functions.get(file)
    }

    /// Files whose current contents need synchronizing, in path order.
    pub fn touched_files(&self) -> impl Iterator<Item = &String> {
        let mut all: Vec<&String> = self.added.iter().chain(self.modified.iter()).collect();
        all.sort();
        all.into_iter()
    }
}

/// Diff `current` against `previous`, reporting only files with the tracked
/// extension from `options`.
pub fn diff(current: &HashNode, previous: Option<&HashNode>, options: &ScanOptions) -> ChangeSet {
    let mut changes = ChangeSet::default();
    walk(Some(current), previous, &mut changes);

    changes.added.retain(|id| options.is_source(id));
    changes.modified.retain(|id| options.is_source(id));
    changes.removed.retain(|id| options.is_source(id));
    changes.functions.retain(|id, detail| options.is_source(id) && !detail.is_empty());
    changes
}

fn walk(current: Option<&HashNode>, previous: Option<&HashNode>, out: &mut ChangeSet) {
    match (current, previous) {
        (None, None) => {}
        (Some(cur), None) => match cur.kind {
            NodeKind::File => {
                out.added.insert(cur.identity.clone());
                let detail = out.functions.entry(cur.identity.clone()).or_default();
                detail.added.extend(cur.functions().map(function_name));
            }
            NodeKind::Directory => {
                for child in cur.children.values() {
                    walk(Some(child), None, out);
                }
            }
            NodeKind::Function => {}
        },
        (None, Some(prev)) => match prev.kind {
            NodeKind::File => {
                out.removed.insert(prev.identity.clone());
                let detail = out.functions.entry(prev.identity.clone()).or_default();
                detail.removed.extend(prev.functions().map(function_name));
            }
            NodeKind::Directory => {
                for child in prev.children.values() {
                    walk(None, Some(child), out);
                }
            }
            NodeKind::Function => {}
        },
        (Some(cur), Some(prev)) if cur.kind != prev.kind => {
            // A path that switched between file and directory is a removal
            // of the old shape followed by an addition of the new one.
            walk(None, Some(prev), out);
            walk(Some(cur), None, out);
        }
        (Some(cur), Some(prev)) => match cur.kind {
            NodeKind::File => diff_files(cur, prev, out),
            // Directory digests ignore child names, so equal hashes do not
            // rule out renames or swapped contents.
            NodeKind::Directory => {
                let names: BTreeSet<&String> =
                    cur.children.keys().chain(prev.children.keys()).collect();
                for name in names {
                    walk(cur.children.get(name), prev.children.get(name), out);
                }
            }
            NodeKind::Function => {}
        },
    }
}

fn diff_files(cur: &HashNode, prev: &HashNode, out: &mut ChangeSet) {
    if cur.hash == prev.hash {
        return;
    }
    out.modified.insert(cur.identity.clone());

    let mut detail = FunctionChanges::default();
    for (name, node) in cur.children.iter().filter(|(_, n)| n.kind == NodeKind::Function) {
        match prev.children.get(name) {
            None => {
                detail.added.insert(name.clone());
            }
            Some(old) if old.hash != node.hash => {
                detail.modified.insert(name.clone());
            }
            Some(_) => {}
        }
    }
    for name in prev
        .children
        .iter()
        .filter(|(_, n)| n.kind == NodeKind::Function)
        .map(|(name, _)| name)
    {
        if !cur.children.contains_key(name) {
            detail.removed.insert(name.clone());
        }
    }

    if !detail.is_empty() {
        out.functions.insert(cur.identity.clone(), detail);
    }
}

fn function_name(node: &HashNode) -> String {
    node.function
        .as_ref()
        .map(|f| f.display_name.clone())
        .unwrap_or_else(|| {
            node.identity
                .rsplit_once(crate::hashtree::FUNCTION_SEPARATOR)
                .map(|(_, name)| name.to_string())
                .unwrap_or_default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashtree::build_tree;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn snapshot(root: &Path) -> HashNode {
        build_tree(root, &ScanOptions::default())
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.py", "def a():\n    pass\n");
        write(dir.path(), "sub/b.py", "def b():\n    pass\n");
        let tree = snapshot(dir.path());
        let changes = diff(&tree, Some(&tree), &ScanOptions::default());
        assert!(changes.is_empty());
        assert!(changes.functions.is_empty());
    }

    #[test]
    fn test_diff_without_previous_adds_sources_only() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.py", "def a():\n    pass\n");
        write(dir.path(), "sub/b.py", "def b():\n    pass\n");
        write(dir.path(), "sub/readme.md", "docs");
        let tree = snapshot(dir.path());
        let changes = diff(&tree, None, &ScanOptions::default());
        assert_eq!(changes.added, set(&["a.py", "sub/b.py"]));
        assert!(changes.modified.is_empty());
        assert!(changes.removed.is_empty());
        assert_eq!(changes.functions_of("sub/b.py").unwrap().added, set(&["b"]));
    }

    #[test]
    fn test_diff_function_rename() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "tools.py", "def old_name():\n    pass\n\ndef keep():\n    pass\n");
        let before = snapshot(dir.path());
        write(dir.path(), "tools.py", "def new_name():\n    pass\n\ndef keep():\n    pass\n");
        let after = snapshot(dir.path());

        let changes = diff(&after, Some(&before), &ScanOptions::default());
        assert_eq!(changes.modified, set(&["tools.py"]));
        let detail = changes.functions_of("tools.py").unwrap();
        assert_eq!(detail.added, set(&["new_name"]));
        assert_eq!(detail.removed, set(&["old_name"]));
        assert!(detail.modified.is_empty());
    }

    #[test]
    fn test_diff_function_body_change() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "tools.py", "def f():\n    return 1\n\ndef g():\n    return 2\n");
        let before = snapshot(dir.path());
        write(dir.path(), "tools.py", "def f():\n    return 10\n\ndef g():\n    return 2\n");
        let after = snapshot(dir.path());

        let changes = diff(&after, Some(&before), &ScanOptions::default());
        let detail = changes.functions_of("tools.py").unwrap();
        assert_eq!(detail.modified, set(&["f"]));
        assert!(detail.added.is_empty());
        assert!(detail.removed.is_empty());
    }

    #[test]
    fn test_diff_removed_directory() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "keep.py", "def k():\n    pass\n");
        write(dir.path(), "gone/x.py", "def x():\n    pass\n");
        let before = snapshot(dir.path());
        std::fs::remove_dir_all(dir.path().join("gone")).unwrap();
        let after = snapshot(dir.path());

        let changes = diff(&after, Some(&before), &ScanOptions::default());
        assert_eq!(changes.removed, set(&["gone/x.py"]));
        assert!(changes.added.is_empty());
        assert!(changes.modified.is_empty());
        assert_eq!(changes.functions_of("gone/x.py").unwrap().removed, set(&["x"]));
    }

    #[test]
    fn test_non_source_changes_filtered() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.py", "def a():\n    pass\n");
        write(dir.path(), "notes.txt", "one");
        let before = snapshot(dir.path());
        write(dir.path(), "notes.txt", "two");
        let after = snapshot(dir.path());

        assert_ne!(before.hash, after.hash);
        let changes = diff(&after, Some(&before), &ScanOptions::default());
        assert!(changes.is_empty());
    }

    #[test]
    fn test_diff_detects_file_rename() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "tools.py", "def run():\n    pass\n");
        let before = snapshot(dir.path());
        std::fs::rename(dir.path().join("tools.py"), dir.path().join("utils.py")).unwrap();
        let after = snapshot(dir.path());

        assert_eq!(before.hash, after.hash);
        let changes = diff(&after, Some(&before), &ScanOptions::default());
        assert_eq!(changes.added, set(&["utils.py"]));
        assert_eq!(changes.removed, set(&["tools.py"]));
        assert_eq!(changes.functions_of("utils.py").unwrap().added, set(&["run"]));
        assert_eq!(changes.functions_of("tools.py").unwrap().removed, set(&["run"]));
    }

    #[test]
    fn test_diff_detects_swapped_contents() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "pkg/a.py", "def first():\n    pass\n");
        write(dir.path(), "pkg/b.py", "def second():\n    pass\n");
        let before = snapshot(dir.path());
        write(dir.path(), "pkg/a.py", "def second():\n    pass\n");
        write(dir.path(), "pkg/b.py", "def first():\n    pass\n");
        let after = snapshot(dir.path());

        assert_eq!(before.hash, after.hash);
        let changes = diff(&after, Some(&before), &ScanOptions::default());
        assert_eq!(changes.modified, set(&["pkg/a.py", "pkg/b.py"]));
        let a = changes.functions_of("pkg/a.py").unwrap();
        assert_eq!(a.added, set(&["second"]));
        assert_eq!(a.removed, set(&["first"]));
    }
}
