//! The `rescan()` driver: rebuild, diff, sync, retain, persist.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::changes::{ChangeSet, diff};
use crate::engine::ModuleCache;
use crate::hashtree::{HashNode, HashTree, ScanOptions, build_tree};
use crate::registry::sync::category_for;
use crate::registry::{Catalog, SyncReport};

/// Outcome of one rescan.
#[derive(Debug, Clone, Serialize)]
pub struct RescanReport {
    pub root_hash: String,
    pub changes: ChangeSet,
    pub sync: SyncReport,
    /// Module categories dropped from the implementation cache.
    pub invalidated: Vec<String>,
}

/// Serializes rescans of one source directory.
pub struct Rescanner {
    tree: Mutex<HashTree>,
    catalog: Arc<Catalog>,
    modules: Arc<ModuleCache>,
    state_path: Option<PathBuf>,
}

impl Rescanner {
    pub fn new(
        root: impl Into<PathBuf>,
        options: ScanOptions,
        catalog: Arc<Catalog>,
        modules: Arc<ModuleCache>,
    ) -> Self {
        Self {
            tree: Mutex::new(HashTree::new(root, options)),
            catalog,
            modules,
            state_path: None,
        }
    }

    /// Persist the snapshot to `path` after every rescan.
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Load the persisted snapshot as the previous state. Returns whether one
    /// was restored.
    pub async fn restore_state(&self) -> bool {
        let Some(path) = &self.state_path else {
            return false;
        };
        let mut tree = self.tree.lock().await;
        match tree.load(path).await {
            Ok(restored) => {
                if restored {
                    info!(path = %path.display(), "Restored snapshot state");
                }
                restored
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load snapshot state, starting fresh");
                false
            }
        }
    }

    /// The most recent snapshot, if any scan has run or state was restored.
    pub async fn snapshot(&self) -> Option<HashNode> {
        self.tree.lock().await.latest().cloned()
    }

    /// Rebuild the tree, apply the diff against the previous snapshot to the
    /// catalog and retain the new snapshot. Concurrent calls run one at a time.
    pub async fn rescan(&self) -> RescanReport {
        let mut tree = self.tree.lock().await;

        let root = tree.root().to_path_buf();
        let options = tree.options().clone();
        let current = match tokio::task::spawn_blocking({
            let root = root.clone();
            let options = options.clone();
            move || build_tree(&root, &options)
        })
        .await
        {
            Ok(node) => node,
            Err(e) => {
                warn!(error = %e, "Background scan failed, scanning inline");
                build_tree(&root, &options)
            }
        };

        let changes = diff(&current, tree.previous(), &options);
        let sync = if changes.is_empty() {
            SyncReport::default()
        } else {
            self.catalog.sync(&changes, &current).await
        };

        let mut invalidated = Vec::new();
        for path in changes
            .added
            .iter()
            .chain(&changes.modified)
            .chain(&changes.removed)
        {
            let category = category_for(path);
            if self.modules.invalidate(&category).await {
                invalidated.push(category);
            }
        }

        // Files that failed to sync keep their previous version in the
        // retained snapshot so the next rescan sees them as changed again.
        let root_hash = current.hash.clone();
        let mut retained = current;
        let failed: BTreeSet<&str> = sync.failures.iter().map(|f| f.path.as_str()).collect();
        for path in failed {
            let previous = tree
                .previous()
                .and_then(|prev| prev.find(path))
                .filter(|node| node.is_file())
                .cloned();
            warn!(path, "File will be synchronized again on the next rescan");
            retained.replace(path, previous);
        }
        tree.set_current(retained);
        tree.retain_as_previous();

        if let Some(path) = &self.state_path
            && let Err(e) = tree.save(path).await
        {
            warn!(path = %path.display(), error = %e, "Failed to persist snapshot state");
        }

        info!(
            root = %root.display(),
            %root_hash,
            added = changes.added.len(),
            modified = changes.modified.len(),
            removed = changes.removed.len(),
            "Rescan complete"
        );
        RescanReport {
            root_hash,
            changes,
            sync,
            invalidated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoxFuture;
    use crate::embedding::{EmbedError, Embedder, HashingEmbedder};
    use crate::engine::{StaticLoader, ToolSpec};
    use crate::store::MemoryGraphStore;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    /// Fails its first call, then delegates to a hashing embedder.
    struct FlakyEmbedder {
        calls: AtomicUsize,
        inner: HashingEmbedder,
    }

    impl Embedder for FlakyEmbedder {
        fn name(&self) -> &str {
            "flaky"
        }

        fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, EmbedError>> {
            Box::pin(async move {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(EmbedError::Network("transient".to_string()));
                }
                self.inner.embed(text).await
            })
        }
    }

    fn rescanner(root: &Path) -> Rescanner {
        rescanner_with(root, Arc::new(HashingEmbedder::new(32)))
    }

    fn rescanner_with(root: &Path, embedder: Arc<dyn Embedder>) -> Rescanner {
        let catalog = Arc::new(Catalog::new(Arc::new(MemoryGraphStore::new()), embedder));
        let loader = StaticLoader::new().with_tool(
            "math",
            ToolSpec::sync_handler("double", |_| Ok(serde_json::Value::Null)),
        );
        let modules = Arc::new(ModuleCache::new(Arc::new(loader)));
        Rescanner::new(root, ScanOptions::default(), catalog, modules)
    }

    #[tokio::test]
    async fn test_rescan_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "math.py", "def double(n):\n    return {'n': n * 2}\n");
        let rescanner = rescanner(dir.path());

        let first = rescanner.rescan().await;
        assert_eq!(first.sync.created, vec!["double".to_string()]);

        let second = rescanner.rescan().await;
        assert!(second.changes.is_empty());
        assert!(!second.sync.changed());
        assert_eq!(first.root_hash, second.root_hash);
    }

    #[tokio::test]
    async fn test_rescan_invalidates_loaded_module() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "math.py", "def double(n):\n    return {'n': n * 2}\n");
        let rescanner = rescanner(dir.path());
        rescanner.rescan().await;

        rescanner.modules.module("math").await.unwrap();
        write(dir.path(), "math.py", "def double(n):\n    return {'n': n + n}\n");
        let report = rescanner.rescan().await;
        assert_eq!(report.invalidated, vec!["math".to_string()]);
        assert!(rescanner.modules.loaded().await.is_empty());
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let state_path = state.path().join("snapshot.json");
        write(dir.path(), "math.py", "def double(n):\n    return n\n");

        rescanner(dir.path())
            .with_state_path(&state_path)
            .rescan()
            .await;

        let restarted = rescanner(dir.path()).with_state_path(&state_path);
        assert!(restarted.restore_state().await);
        let report = restarted.rescan().await;
        assert!(report.changes.is_empty());
    }

    #[tokio::test]
    async fn test_failed_file_is_retried() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "math.py", "def double(n):\n    return n\n");
        write(dir.path(), "text.py", "def greet(name):\n    return name\n");
        let rescanner = rescanner_with(
            dir.path(),
            Arc::new(FlakyEmbedder {
                calls: AtomicUsize::new(0),
                inner: HashingEmbedder::new(32),
            }),
        );

        let first = rescanner.rescan().await;
        assert_eq!(first.sync.failures.len(), 1);
        assert_eq!(first.sync.failures[0].path, "math.py");
        assert_eq!(first.sync.created, vec!["greet".to_string()]);
        assert!(rescanner.catalog.find_tool("double").await.unwrap().is_none());

        let second = rescanner.rescan().await;
        assert_eq!(
            second.changes.added.iter().cloned().collect::<Vec<_>>(),
            vec!["math.py".to_string()]
        );
        assert_eq!(second.sync.created, vec!["double".to_string()]);
        assert!(second.sync.failures.is_empty());
        assert_eq!(first.root_hash, second.root_hash);

        let third = rescanner.rescan().await;
        assert!(third.changes.is_empty());
        assert!(rescanner.catalog.find_tool("double").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_modification_is_retried() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "math.py", "def double(n):\n    return n\n");
        let flaky = Arc::new(FlakyEmbedder {
            calls: AtomicUsize::new(1),
            inner: HashingEmbedder::new(32),
        });
        let rescanner = rescanner_with(dir.path(), flaky.clone());
        rescanner.rescan().await;

        flaky.calls.store(0, Ordering::SeqCst);
        write(dir.path(), "math.py", "def double(n):\n    \"\"\"Twice n.\"\"\"\n    return n\n");
        let failed = rescanner.rescan().await;
        assert_eq!(failed.sync.failures.len(), 1);

        let retried = rescanner.rescan().await;
        assert_eq!(retried.sync.updated, vec!["double".to_string()]);
        let tool = rescanner.catalog.find_tool("double").await.unwrap().unwrap();
        assert_eq!(tool.description, "Twice n.");
    }
}
