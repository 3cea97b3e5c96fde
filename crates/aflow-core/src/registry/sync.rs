//! Applying a [`ChangeSet`] to the catalog.
//!
//! Sync runs in two passes over files in path order. The first registers the
//! functions of every added or modified file; the second retires tools whose
//! source function disappeared. Splitting the passes lets a function that
//! moved between files be adopted by its new file before the old file's
//! removal is considered.
//!
//! When a retired name is still defined by another file (a bare-name
//! conflict loser), that file takes the tool over instead. A tool kept
//! because a task uses it is detached from its vanished source.
//!
//! A failure while syncing one file is logged and recorded in the report;
//! the remaining files are still processed.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::changes::ChangeSet;
use crate::error::AflowError;
use crate::hashtree::{FunctionInfo, HashNode, NodeKind};
use crate::store::{Record, RecordKind, Relation};

use super::{Catalog, ToolDraft};

/// Two files defining the same tool name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncConflict {
    pub name: String,
    /// File that keeps the name.
    pub owner: String,
    /// File whose definition was skipped.
    pub skipped: String,
}

/// A file that could not be synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub path: String,
    pub error: String,
}

/// What one sync changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    /// Tools already matching their source.
    pub unchanged: usize,
    /// Tools whose source vanished but are still used by a task.
    pub retained: Vec<String>,
    pub conflicts: Vec<SyncConflict>,
    pub failures: Vec<SyncFailure>,
}

impl SyncReport {
    /// Whether any record was written.
    pub fn changed(&self) -> bool {
        !(self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty())
    }
}

/// Dotted module path for a source file: `api_tools/weather_api.py` →
/// `api_tools.weather_api`. Package entry files (`__init__.py`, `mod.rs`)
/// map to their directory.
pub fn category_for(path: &str) -> String {
    let stem = path.rsplit_once('.').map_or(path, |(stem, _)| stem);
    let mut parts: Vec<&str> = stem.split('/').filter(|p| !p.is_empty()).collect();
    if matches!(parts.last(), Some(&"__init__") | Some(&"mod")) && parts.len() > 1 {
        parts.pop();
    }
    parts.join(".")
}

impl Catalog {
    /// Apply `changes`, computed against `current`, to the store.
    pub async fn sync(&self, changes: &ChangeSet, current: &HashNode) -> SyncReport {
        let mut report = SyncReport::default();

        for path in changes.touched_files() {
            if let Err(e) = self.register_file(path, changes, current, &mut report).await {
                warn!(path = %path, error = %e, "Failed to sync file");
                report.failures.push(SyncFailure {
                    path: path.clone(),
                    error: e.to_string(),
                });
            }
        }

        for (path, detail) in &changes.functions {
            for function in &detail.removed {
                if let Err(e) = self.retire(path, function, current, &mut report).await {
                    warn!(path = %path, function = %function, error = %e, "Failed to retire tool");
                    report.failures.push(SyncFailure {
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            created = report.created.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len(),
            unchanged = report.unchanged,
            conflicts = report.conflicts.len(),
            failures = report.failures.len(),
            "Registry synchronized"
        );
        report
    }

    async fn register_file(
        &self,
        path: &str,
        changes: &ChangeSet,
        current: &HashNode,
        report: &mut SyncReport,
    ) -> Result<(), AflowError> {
        let Some(file) = current.find(path).filter(|n| n.is_file()) else {
            warn!(path, "Changed file missing from current snapshot");
            return Ok(());
        };
        let category = self.category_or_default(path);

        let changed_only = match changes.functions_of(path) {
            Some(detail) if !changes.added.contains(path) => Some(detail),
            _ => None,
        };

        for (function, node) in &file.children {
            if node.kind != NodeKind::Function {
                continue;
            }
            if let Some(detail) = changed_only
                && !detail.touched().any(|n| n == function)
            {
                continue;
            }
            let Some(info) = &node.function else {
                continue;
            };

            let name = self.tool_name(&category, function);
            let description = info.doc.clone().unwrap_or_default();

            let Some(existing) = self.find_tool(&name).await? else {
                self.create_tool(source_draft(&name, &category, path, node, info))
                    .await?;
                report.created.push(name);
                continue;
            };

            if let Some(owner) = existing.source_path.as_deref()
                && owner != path
                && defines(current, owner, function)
            {
                warn!(
                    tool = %name,
                    owner,
                    skipped = path,
                    "Tool name already defined by another file, skipping"
                );
                report.conflicts.push(SyncConflict {
                    name,
                    owner: owner.to_string(),
                    skipped: path.to_string(),
                });
                continue;
            }

            let unchanged = existing.description == description
                && existing.category == category
                && existing.parameters == info.params
                && existing.source_path.as_deref() == Some(path)
                && existing.source_hash.as_deref() == Some(node.hash.as_str());
            if unchanged {
                report.unchanged += 1;
                continue;
            }

            self.update_tool(source_draft(&name, &category, path, node, info))
                .await?;
            report.updated.push(name);
        }
        Ok(())
    }

    /// Delete the tool registered from `function` in `path`, unless another
    /// file owns it now, another file in `current` defines the same name or
    /// a task still uses it.
    async fn retire(
        &self,
        path: &str,
        function: &str,
        current: &HashNode,
        report: &mut SyncReport,
    ) -> Result<(), AflowError> {
        let name = self.tool_name(&self.category_or_default(path), function);
        let Some(mut record) = self.find_tool(&name).await? else {
            return Ok(());
        };
        if record.source_path.as_deref() != Some(path) {
            debug!(tool = %name, path, "Tool owned by another source, not retiring");
            return Ok(());
        }

        if let Some(heir) = self.successor(current, path, &name, function)
            && let Some(node) = heir.children.get(function)
            && let Some(info) = &node.function
        {
            let category = self.category_or_default(&heir.identity);
            self.update_tool(source_draft(&name, &category, &heir.identity, node, info))
                .await?;
            info!(tool = %name, from = path, to = %heir.identity, "Tool handed over to another source");
            report.updated.push(name);
            return Ok(());
        }

        let users = self.referrers(RecordKind::Tool, &name, Relation::Uses).await?;
        if !users.is_empty() {
            warn!(tool = %name, tasks = ?users, "Source removed but tool still in use, keeping");
            record.source_path = None;
            record.source_hash = None;
            self.store().upsert(Record::Tool(record)).await?;
            report.retained.push(name);
            return Ok(());
        }

        self.store().delete(RecordKind::Tool, &name).await?;
        info!(tool = %name, path, "Tool retired");
        report.deleted.push(name);
        Ok(())
    }

    /// First file in path order, other than `path`, whose `function` maps
    /// to the tool `name`.
    fn successor<'t>(
        &self,
        current: &'t HashNode,
        path: &str,
        name: &str,
        function: &str,
    ) -> Option<&'t HashNode> {
        current
            .files()
            .into_iter()
            .filter(|file| file.identity != path && defines(current, &file.identity, function))
            .filter(|file| self.tool_name(&self.category_or_default(&file.identity), function) == name)
            .min_by(|a, b| a.identity.cmp(&b.identity))
    }

    fn category_or_default(&self, path: &str) -> String {
        let category = category_for(path);
        if category.is_empty() {
            self.default_category.clone()
        } else {
            category
        }
    }
}

fn source_draft(
    name: &str,
    category: &str,
    path: &str,
    node: &HashNode,
    info: &FunctionInfo,
) -> ToolDraft {
    ToolDraft::new(name)
        .description(info.doc.clone().unwrap_or_default())
        .category(category)
        .parameters(info.params.clone())
        .source(path, &node.hash)
}

/// Whether `path` in `tree` still defines a function named `function`.
fn defines(tree: &HashNode, path: &str, function: &str) -> bool {
    tree.find(path)
        .and_then(|file| file.children.get(function))
        .is_some_and(|node| node.kind == NodeKind::Function)
}
