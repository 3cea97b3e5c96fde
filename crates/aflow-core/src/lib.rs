#![deny(unsafe_code)]

//! aflow core runtime.
//!
//! Keeps a registry of tools discovered from a source tree synchronized with
//! on-disk changes at function granularity, and executes ordered chains of
//! those tools (tasks and workflows) over a shared variable context.
//!
//! ```text
//! trigger ─▶ rescan() ─▶ HashTree ─▶ diff ─▶ Catalog::sync ─▶ GraphStore
//!                                                                 │
//! execute_task / execute_workflow ─▶ ExecutionEngine ◀────────────┘
//!                                         │
//!                                   ModuleCache ─▶ ModuleLoader
//! ```

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future. Return type of async trait
/// methods that are used through `dyn Trait`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Assembled facade over every operation.
pub mod aflow;
/// Snapshot diffing into file- and function-level change sets.
pub mod changes;
/// Text embedding providers.
pub mod embedding;
/// Task and workflow execution, tool implementations and module loading.
pub mod engine;
/// Error taxonomy returned by registry, engine and facade calls.
pub mod error;
/// Content-addressed hash tree over the tool source directory.
pub mod hashtree;
/// Tool, task and workflow catalog plus change-set synchronization.
pub mod registry;
/// Serialized rebuild → diff → sync → retain driver.
pub mod rescan;
/// Declared tool parameter schema.
pub mod schema;
/// Hybrid vector and full-text search.
pub mod search;
/// Graph store interface and bundled implementation.
pub mod store;
/// Debounced filesystem watcher.
pub mod watch;

pub use aflow::Aflow;
pub use changes::{ChangeSet, FunctionChanges, diff};
pub use embedding::{Embedder, HashingEmbedder, OpenAiEmbedder, create_embedder};
pub use engine::{
    ExecutionContext, ExecutionEngine, LoadError, ModuleCache, ModuleLoader, StaticLoader, TaskOutcome,
    ToolArgs, ToolFailure, ToolModule, ToolSpec, WorkflowOutcome,
};
pub use error::AflowError;
pub use hashtree::{FunctionInfo, HashNode, HashTree, NodeKind, ScanOptions, SourceLanguage};
pub use registry::{Catalog, SyncReport, TaskDraft, ToolDraft, WorkflowDraft};
pub use rescan::{RescanReport, Rescanner};
pub use schema::Param;
pub use search::{HybridSearch, SearchHit, StoreSearch};
pub use store::{
    Edge, GraphStore, MemoryGraphStore, Record, RecordKind, Relation, StepRef, TaskRecord,
    ToolRecord, WorkflowRecord,
};
pub use watch::{Debouncer, spawn_watcher};
