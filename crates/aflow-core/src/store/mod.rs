//! Graph storage for tool, task and workflow records.
//!
//! The registry and engine only see the [`GraphStore`] trait: named nodes of
//! three kinds plus ordered `uses` (task → tool) and `contains`
//! (workflow → task) edges. [`MemoryGraphStore`] is the bundled
//! implementation, optionally persisted to a JSON file.

pub mod memory;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::BoxFuture;
use crate::schema::Param;

pub use memory::MemoryGraphStore;

/// Node kinds held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Tool,
    Task,
    Workflow,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Tool => write!(f, "tool"),
            RecordKind::Task => write!(f, "task"),
            RecordKind::Workflow => write!(f, "workflow"),
        }
    }
}

/// Edge labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// Task → Tool.
    Uses,
    /// Workflow → Task.
    Contains,
}

impl Relation {
    /// The `(from, to)` kinds this relation connects.
    pub fn endpoints(self) -> (RecordKind, RecordKind) {
        match self {
            Relation::Uses => (RecordKind::Task, RecordKind::Tool),
            Relation::Contains => (RecordKind::Workflow, RecordKind::Task),
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Uses => write!(f, "USES"),
            Relation::Contains => write!(f, "CONTAINS"),
        }
    }
}

/// A directed, ordered relationship between two records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from_kind: RecordKind,
    pub from: String,
    pub relation: Relation,
    pub to_kind: RecordKind,
    pub to: String,
    pub order: u32,
}

impl Edge {
    pub fn uses(task: impl Into<String>, tool: impl Into<String>, order: u32) -> Self {
        Self {
            from_kind: RecordKind::Task,
            from: task.into(),
            relation: Relation::Uses,
            to_kind: RecordKind::Tool,
            to: tool.into(),
            order,
        }
    }

    pub fn contains(workflow: impl Into<String>, task: impl Into<String>, order: u32) -> Self {
        Self {
            from_kind: RecordKind::Workflow,
            from: workflow.into(),
            relation: Relation::Contains,
            to_kind: RecordKind::Task,
            to: task.into(),
            order,
        }
    }
}

/// Reference to a step of a task or workflow. Steps sort by execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRef {
    pub name: String,
    pub order: u32,
}

impl Ord for StepRef {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.order
            .cmp(&other.order)
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for StepRef {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl StepRef {
    pub fn new(name: impl Into<String>, order: u32) -> Self {
        Self {
            name: name.into(),
            order,
        }
    }
}

/// A registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Dotted module path the implementation is loaded from.
    pub category: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    /// Source file the tool was discovered in, relative to the scan root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// Hash of the function the record was last synchronized from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Param>,
}

/// A named, ordered chain of tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Ordered tool references. Hydrated from `uses` edges on read.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<StepRef>,
    #[serde(default)]
    pub input_params: Vec<String>,
    #[serde(default)]
    pub output_params: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

/// A named, ordered chain of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Ordered task references. Hydrated from `contains` edges on read.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<StepRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
}

/// Any stored node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Tool(ToolRecord),
    Task(TaskRecord),
    Workflow(WorkflowRecord),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Tool(_) => RecordKind::Tool,
            Record::Task(_) => RecordKind::Task,
            Record::Workflow(_) => RecordKind::Workflow,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Record::Tool(r) => &r.name,
            Record::Task(r) => &r.name,
            Record::Workflow(r) => &r.name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Record::Tool(r) => &r.description,
            Record::Task(r) => &r.description,
            Record::Workflow(r) => &r.description,
        }
    }

    pub fn embedding(&self) -> &[f32] {
        match self {
            Record::Tool(r) => &r.embedding,
            Record::Task(r) => &r.embedding,
            Record::Workflow(r) => &r.embedding,
        }
    }

    pub fn into_tool(self) -> Option<ToolRecord> {
        match self {
            Record::Tool(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_task(self) -> Option<TaskRecord> {
        match self {
            Record::Task(r) => Some(r),
            _ => None,
        }
    }

    pub fn into_workflow(self) -> Option<WorkflowRecord> {
        match self {
            Record::Workflow(r) => Some(r),
            _ => None,
        }
    }
}

/// Errors from graph store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{relation} cannot connect {from_kind} to {to_kind}")]
    InvalidRelation {
        relation: Relation,
        from_kind: RecordKind,
        to_kind: RecordKind,
    },

    #[error("{kind} {name} does not exist")]
    MissingEndpoint { kind: RecordKind, name: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Key/graph query interface over records and their relationships.
///
/// Implementations serialize their own writes. Uses `BoxFuture` so the store
/// can be shared as `Arc<dyn GraphStore>`.
pub trait GraphStore: Send + Sync {
    fn find_by_name<'a>(
        &'a self,
        kind: RecordKind,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<Record>, StoreError>>;

    /// Insert or replace the record with the same kind and name.
    fn upsert(&self, record: Record) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Delete a record together with every edge touching it. Returns whether
    /// the record existed.
    fn delete<'a>(
        &'a self,
        kind: RecordKind,
        name: &'a str,
    ) -> BoxFuture<'a, Result<bool, StoreError>>;

    /// All records of a kind, ordered by name.
    fn list_by_kind(&self, kind: RecordKind) -> BoxFuture<'_, Result<Vec<Record>, StoreError>>;

    /// Create a relationship. Both endpoints must exist. The same pair may be
    /// linked several times at different orders; relating an identical edge
    /// again is a no-op.
    fn relate(&self, edge: Edge) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Remove the identical relationship. Returns whether it existed.
    fn unrelate<'a>(&'a self, edge: &'a Edge) -> BoxFuture<'a, Result<bool, StoreError>>;

    /// Edges leaving `(kind, name)` with `relation`, ascending by order.
    fn outgoing<'a>(
        &'a self,
        kind: RecordKind,
        name: &'a str,
        relation: Relation,
    ) -> BoxFuture<'a, Result<Vec<Edge>, StoreError>>;

    /// Edges arriving at `(kind, name)` with `relation`, ordered by source
    /// name then order.
    fn incoming<'a>(
        &'a self,
        kind: RecordKind,
        name: &'a str,
        relation: Relation,
    ) -> BoxFuture<'a, Result<Vec<Edge>, StoreError>>;
}
