//! In-process graph store with optional JSON-file persistence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::BoxFuture;

use super::{Edge, GraphStore, Record, RecordKind, Relation, StoreError};

#[derive(Debug, Default)]
struct Graph {
    nodes: BTreeMap<(RecordKind, String), Record>,
    edges: Vec<Edge>,
}

#[derive(Serialize, Deserialize)]
struct GraphFile {
    #[serde(default)]
    records: Vec<Record>,
    #[serde(default)]
    edges: Vec<Edge>,
}

/// [`GraphStore`] kept in memory, written through to `path` when set.
pub struct MemoryGraphStore {
    graph: RwLock<Graph>,
    path: Option<PathBuf>,
    writes: AtomicU64,
}

impl MemoryGraphStore {
    /// Create an empty, non-persistent store.
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(Graph::default()),
            path: None,
            writes: AtomicU64::new(0),
        }
    }

    /// Open a store persisted at `path`, loading it if the file exists.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let graph = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let file: GraphFile = serde_json::from_slice(&bytes)?;
                let nodes = file
                    .records
                    .into_iter()
                    .map(|r| ((r.kind(), r.name().to_string()), r))
                    .collect();
                Graph {
                    nodes,
                    edges: file.edges,
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Graph::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), records = graph.nodes.len(), "Graph store opened");
        Ok(Self {
            graph: RwLock::new(graph),
            path: Some(path),
            writes: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of mutating operations applied since creation.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    async fn persist(&self, graph: &Graph) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = GraphFile {
            records: graph.nodes.values().cloned().collect(),
            edges: graph.edges.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore for MemoryGraphStore {
    fn find_by_name<'a>(
        &'a self,
        kind: RecordKind,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<Record>, StoreError>> {
        Box::pin(async move {
            let graph = self.graph.read().await;
            Ok(graph.nodes.get(&(kind, name.to_string())).cloned())
        })
    }

    fn upsert(&self, record: Record) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut graph = self.graph.write().await;
            graph
                .nodes
                .insert((record.kind(), record.name().to_string()), record);
            self.persist(&graph).await
        })
    }

    fn delete<'a>(
        &'a self,
        kind: RecordKind,
        name: &'a str,
    ) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut graph = self.graph.write().await;
            if graph.nodes.remove(&(kind, name.to_string())).is_none() {
                return Ok(false);
            }
            graph.edges.retain(|e| {
                !((e.from_kind == kind && e.from == name) || (e.to_kind == kind && e.to == name))
            });
            self.persist(&graph).await?;
            Ok(true)
        })
    }

    fn list_by_kind(&self, kind: RecordKind) -> BoxFuture<'_, Result<Vec<Record>, StoreError>> {
        Box::pin(async move {
            let graph = self.graph.read().await;
            Ok(graph
                .nodes
                .iter()
                .filter(|((k, _), _)| *k == kind)
                .map(|(_, r)| r.clone())
                .collect())
        })
    }

    fn relate(&self, edge: Edge) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let (from_kind, to_kind) = edge.relation.endpoints();
            if edge.from_kind != from_kind || edge.to_kind != to_kind {
                return Err(StoreError::InvalidRelation {
                    relation: edge.relation,
                    from_kind: edge.from_kind,
                    to_kind: edge.to_kind,
                });
            }

            let mut graph = self.graph.write().await;
            for (kind, name) in [(edge.from_kind, &edge.from), (edge.to_kind, &edge.to)] {
                if !graph.nodes.contains_key(&(kind, name.clone())) {
                    return Err(StoreError::MissingEndpoint {
                        kind,
                        name: name.clone(),
                    });
                }
            }

            if graph.edges.contains(&edge) {
                return Ok(());
            }
            graph.edges.push(edge);
            self.persist(&graph).await
        })
    }

    fn unrelate<'a>(&'a self, edge: &'a Edge) -> BoxFuture<'a, Result<bool, StoreError>> {
        Box::pin(async move {
            let mut graph = self.graph.write().await;
            let before = graph.edges.len();
            graph.edges.retain(|e| e != edge);
            if graph.edges.len() == before {
                return Ok(false);
            }
            self.persist(&graph).await?;
            Ok(true)
        })
    }

    fn outgoing<'a>(
        &'a self,
        kind: RecordKind,
        name: &'a str,
        relation: Relation,
    ) -> BoxFuture<'a, Result<Vec<Edge>, StoreError>> {
        Box::pin(async move {
            let graph = self.graph.read().await;
            let mut edges: Vec<Edge> = graph
                .edges
                .iter()
                .filter(|e| e.relation == relation && e.from_kind == kind && e.from == name)
                .cloned()
                .collect();
            edges.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.to.cmp(&b.to)));
            Ok(edges)
        })
    }

    fn incoming<'a>(
        &'a self,
        kind: RecordKind,
        name: &'a str,
        relation: Relation,
    ) -> BoxFuture<'a, Result<Vec<Edge>, StoreError>> {
        Box::pin(async move {
            let graph = self.graph.read().await;
            let mut edges: Vec<Edge> = graph
                .edges
                .iter()
                .filter(|e| e.relation == relation && e.to_kind == kind && e.to == name)
                .cloned()
                .collect();
            edges.sort_by(|a, b| a.from.cmp(&b.from).then_with(|| a.order.cmp(&b.order)));
            Ok(edges)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{TaskRecord, ToolRecord};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn tool(name: &str) -> Record {
        Record::Tool(ToolRecord {
            name: name.to_string(),
            description: format!("{name} tool"),
            category: "math".to_string(),
            embedding: vec![],
            source_path: None,
            source_hash: None,
            parameters: vec![],
        })
    }

    fn task(name: &str) -> Record {
        Record::Task(TaskRecord {
            name: name.to_string(),
            description: String::new(),
            tools: vec![],
            input_params: vec![],
            output_params: vec![],
            embedding: vec![],
        })
    }

    #[tokio::test]
    async fn test_upsert_and_find() {
        let store = MemoryGraphStore::new();
        store.upsert(tool("double")).await.unwrap();
        let found = store.find_by_name(RecordKind::Tool, "double").await.unwrap();
        assert_eq!(found, Some(tool("double")));
        assert!(store.find_by_name(RecordKind::Task, "double").await.unwrap().is_none());
        assert_eq!(store.writes(), 1);
    }

    #[tokio::test]
    async fn test_relate_requires_endpoints() {
        let store = MemoryGraphStore::new();
        store.upsert(task("t")).await.unwrap();
        let err = store.relate(Edge::uses("t", "missing", 0)).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingEndpoint { kind: RecordKind::Tool, .. }));
    }

    #[tokio::test]
    async fn test_relate_rejects_wrong_kinds() {
        let store = MemoryGraphStore::new();
        let mut edge = Edge::uses("t", "x", 0);
        edge.from_kind = RecordKind::Workflow;
        let err = store.relate(edge).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidRelation { .. }));
    }

    #[tokio::test]
    async fn test_outgoing_sorted_by_order() {
        let store = MemoryGraphStore::new();
        store.upsert(task("t")).await.unwrap();
        store.upsert(tool("a")).await.unwrap();
        store.upsert(tool("b")).await.unwrap();
        store.relate(Edge::uses("t", "a", 1)).await.unwrap();
        store.relate(Edge::uses("t", "b", 0)).await.unwrap();

        let edges = store.outgoing(RecordKind::Task, "t", Relation::Uses).await.unwrap();
        let names: Vec<_> = edges.iter().map(|e| e.to.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);

        let incoming = store.incoming(RecordKind::Tool, "a", Relation::Uses).await.unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].from, "t");
    }

    #[tokio::test]
    async fn test_delete_drops_incident_edges() {
        let store = MemoryGraphStore::new();
        store.upsert(task("t")).await.unwrap();
        store.upsert(tool("a")).await.unwrap();
        store.relate(Edge::uses("t", "a", 0)).await.unwrap();

        assert!(store.delete(RecordKind::Tool, "a").await.unwrap());
        assert!(!store.delete(RecordKind::Tool, "a").await.unwrap());
        let edges = store.outgoing(RecordKind::Task, "t", Relation::Uses).await.unwrap();
        assert!(edges.is_empty());
    }

    #[tokio::test]
    async fn test_unrelate() {
        let store = MemoryGraphStore::new();
        store.upsert(task("t")).await.unwrap();
        store.upsert(tool("a")).await.unwrap();
        store.relate(Edge::uses("t", "a", 0)).await.unwrap();
        store.relate(Edge::uses("t", "a", 2)).await.unwrap();
        store.relate(Edge::uses("t", "a", 2)).await.unwrap();
        assert_eq!(
            store.outgoing(RecordKind::Task, "t", Relation::Uses).await.unwrap().len(),
            2
        );
        assert!(store.unrelate(&Edge::uses("t", "a", 2)).await.unwrap());
        assert!(!store.unrelate(&Edge::uses("t", "a", 2)).await.unwrap());
        let left = store.outgoing(RecordKind::Task, "t", Relation::Uses).await.unwrap();
        assert_eq!(left, vec![Edge::uses("t", "a", 0)]);
    }

    #[tokio::test]
    async fn test_persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("graph.json");
        {
            let store = MemoryGraphStore::open(&path).await.unwrap();
            store.upsert(task("t")).await.unwrap();
            store.upsert(tool("a")).await.unwrap();
            store.relate(Edge::uses("t", "a", 0)).await.unwrap();
        }

        let reopened = MemoryGraphStore::open(&path).await.unwrap();
        let tools = reopened.list_by_kind(RecordKind::Tool).await.unwrap();
        assert_eq!(tools, vec![tool("a")]);
        let edges = reopened
            .outgoing(RecordKind::Task, "t", Relation::Uses)
            .await
            .unwrap();
        assert_eq!(edges, vec![Edge::uses("t", "a", 0)]);
    }
}
