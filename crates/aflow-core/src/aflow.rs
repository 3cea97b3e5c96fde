//! The assembled system: catalog, search, engine and rescan driver behind one
//! handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use aflow_config::AppConfig;

use crate::embedding::{Embedder, create_embedder};
use crate::engine::{
    ExecutionContext, ExecutionEngine, ModuleCache, ModuleLoader, TaskOutcome, WorkflowOutcome,
};
use crate::error::AflowError;
use crate::hashtree::{HashNode, ScanOptions};
use crate::registry::{Catalog, TaskDraft, ToolDraft, WorkflowDraft};
use crate::rescan::{RescanReport, Rescanner};
use crate::search::{HybridSearch, SearchHit, StoreSearch};
use crate::store::{GraphStore, MemoryGraphStore, RecordKind, TaskRecord, ToolRecord, WorkflowRecord};

/// Entry point for every registry, search, execution and rescan call.
pub struct Aflow {
    config: AppConfig,
    catalog: Arc<Catalog>,
    search: Arc<dyn HybridSearch>,
    engine: ExecutionEngine,
    rescanner: Arc<Rescanner>,
    shutdown_tx: watch::Sender<bool>,
}

impl Aflow {
    /// Assemble from config: opens the configured store, builds the
    /// configured embedder and restores persisted snapshot state.
    ///
    /// Snapshot state is only restored alongside a persistent store. An
    /// in-memory store starts empty, so every source file must be seen as
    /// added on the first rescan.
    pub async fn open(
        config: AppConfig,
        loader: Arc<dyn ModuleLoader>,
    ) -> Result<Self, AflowError> {
        let store: Arc<dyn GraphStore> = match &config.store.path {
            Some(path) => Arc::new(MemoryGraphStore::open(path).await?),
            None => Arc::new(MemoryGraphStore::new()),
        };
        let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedder));
        let persistent = config.store.path.is_some();
        let aflow = Self::with_parts(config, store, embedder, loader);
        if persistent {
            aflow.rescanner.restore_state().await;
        } else if aflow.config.scan.state_path.is_some() {
            warn!("Graph store is not persistent, ignoring saved snapshot state");
        }
        Ok(aflow)
    }

    /// Assemble from explicit collaborators.
    pub fn with_parts(
        config: AppConfig,
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        let catalog = Arc::new(Catalog::from_config(store, embedder, &config.registry));
        let modules = Arc::new(ModuleCache::new(loader));
        let engine = ExecutionEngine::new(Arc::clone(&catalog), Arc::clone(&modules))
            .with_output_inference(config.execution.infer_outputs_from_docs);

        let mut rescanner = Rescanner::new(
            &config.scan.root,
            ScanOptions::from_config(&config.scan),
            Arc::clone(&catalog),
            modules,
        );
        if let Some(path) = &config.scan.state_path {
            rescanner = rescanner.with_state_path(path);
        }

        let (shutdown_tx, _) = watch::channel(false);
        info!(
            root = %config.scan.root.display(),
            extension = %config.scan.extension,
            naming = %config.registry.naming,
            "aflow assembled"
        );

        Self {
            search: Arc::new(StoreSearch::new(Arc::clone(&catalog))),
            catalog,
            engine,
            rescanner: Arc::new(rescanner),
            shutdown_tx,
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn modules(&self) -> &Arc<ModuleCache> {
        self.engine.modules()
    }

    // ── Rescan ──────────────────────────────────────────────────────────

    pub async fn rescan(&self) -> RescanReport {
        self.rescanner.rescan().await
    }

    pub async fn snapshot(&self) -> Option<HashNode> {
        self.rescanner.snapshot().await
    }

    /// Start the debounced filesystem watcher. It stops on [`Aflow::shutdown`].
    pub fn watch(&self) -> Result<JoinHandle<()>, notify::Error> {
        crate::watch::spawn_watcher(
            &self.config.scan.root,
            ScanOptions::from_config(&self.config.scan),
            Arc::clone(&self.rescanner),
            Duration::from_millis(self.config.scan.debounce_ms),
            self.shutdown_tx.subscribe(),
        )
    }

    /// Stop background watchers.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    // ── Tools ───────────────────────────────────────────────────────────

    pub async fn create_tool(&self, draft: ToolDraft) -> Result<ToolRecord, AflowError> {
        self.catalog.create_tool(draft).await
    }

    pub async fn update_tool(&self, draft: ToolDraft) -> Result<ToolRecord, AflowError> {
        self.catalog.update_tool(draft).await
    }

    pub async fn get_tool(&self, name: &str) -> Result<ToolRecord, AflowError> {
        self.catalog.get_tool(name).await
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolRecord>, AflowError> {
        self.catalog.list_tools().await
    }

    pub async fn delete_tool(&self, name: &str) -> Result<(), AflowError> {
        self.catalog.delete_tool(name).await
    }

    // ── Tasks ───────────────────────────────────────────────────────────

    pub async fn create_task(&self, draft: TaskDraft) -> Result<TaskRecord, AflowError> {
        self.catalog.create_task(draft).await
    }

    pub async fn update_task(&self, draft: TaskDraft) -> Result<TaskRecord, AflowError> {
        self.catalog.update_task(draft).await
    }

    pub async fn get_task(&self, name: &str) -> Result<TaskRecord, AflowError> {
        self.catalog.get_task(name).await
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>, AflowError> {
        self.catalog.list_tasks().await
    }

    pub async fn delete_task(&self, name: &str) -> Result<(), AflowError> {
        self.catalog.delete_task(name).await
    }

    pub async fn execute_task(
        &self,
        name: &str,
        context: ExecutionContext,
    ) -> Result<TaskOutcome, AflowError> {
        self.engine.execute_task(name, context).await
    }

    // ── Workflows ───────────────────────────────────────────────────────

    pub async fn create_workflow(&self, draft: WorkflowDraft) -> Result<WorkflowRecord, AflowError> {
        self.catalog.create_workflow(draft).await
    }

    pub async fn update_workflow(&self, draft: WorkflowDraft) -> Result<WorkflowRecord, AflowError> {
        self.catalog.update_workflow(draft).await
    }

    pub async fn get_workflow(&self, name: &str) -> Result<WorkflowRecord, AflowError> {
        self.catalog.get_workflow(name).await
    }

    pub async fn list_workflows(&self) -> Result<Vec<WorkflowRecord>, AflowError> {
        self.catalog.list_workflows().await
    }

    pub async fn delete_workflow(&self, name: &str) -> Result<(), AflowError> {
        self.catalog.delete_workflow(name).await
    }

    pub async fn execute_workflow(
        &self,
        name: &str,
        context: ExecutionContext,
    ) -> Result<WorkflowOutcome, AflowError> {
        self.engine.execute_workflow(name, context).await
    }

    // ── Search ──────────────────────────────────────────────────────────

    pub async fn hybrid_search(
        &self,
        query: &str,
        kind: RecordKind,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, AflowError> {
        self.search.hybrid_search(query, kind, top_k).await
    }

    pub async fn search_tools(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, AflowError> {
        self.hybrid_search(query, RecordKind::Tool, top_k).await
    }

    pub async fn search_tasks(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, AflowError> {
        self.hybrid_search(query, RecordKind::Task, top_k).await
    }

    pub async fn search_workflows(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, AflowError> {
        self.hybrid_search(query, RecordKind::Workflow, top_k).await
    }
}
