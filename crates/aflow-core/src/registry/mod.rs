//! Tool, task and workflow catalog over a [`GraphStore`].
//!
//! Creates are idempotent: creating a name that already exists returns the
//! stored record without writing. Updates fail with `NotFound` when the name
//! is absent. Every create and update recomputes the record's embedding from
//! `name + description` before the write.
//!
//! Step lists of tasks and workflows live in the store as ordered `uses` and
//! `contains` edges; records returned from here are hydrated from them.

pub mod sync;

use std::sync::Arc;

use tracing::info;

use crate::embedding::{Embedder, record_text};
use crate::error::AflowError;
use crate::schema::Param;
use crate::store::{
    Edge, GraphStore, Record, RecordKind, Relation, StepRef, TaskRecord, ToolRecord,
    WorkflowRecord,
};

pub use sync::{SyncConflict, SyncFailure, SyncReport};

/// Fields for creating or updating a tool. `None` keeps the stored value on
/// update and falls back to a default on create.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolDraft {
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub parameters: Option<Vec<Param>>,
    pub source_path: Option<String>,
    pub source_hash: Option<String>,
}

impl ToolDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn parameters(mut self, parameters: impl IntoIterator<Item = Param>) -> Self {
        self.parameters = Some(parameters.into_iter().collect());
        self
    }

    pub fn source(mut self, path: impl Into<String>, hash: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self.source_hash = Some(hash.into());
        self
    }
}

/// Fields for creating or updating a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskDraft {
    pub name: String,
    pub description: Option<String>,
    /// Tool names in execution order.
    pub tools: Option<Vec<String>>,
    pub input_params: Option<Vec<String>>,
    pub output_params: Option<Vec<String>>,
}

impl TaskDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tools<S: Into<String>>(mut self, tools: impl IntoIterator<Item = S>) -> Self {
        self.tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    pub fn inputs<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.input_params = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn outputs<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.output_params = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

/// Fields for creating or updating a workflow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowDraft {
    pub name: String,
    pub description: Option<String>,
    /// Task names in execution order.
    pub tasks: Option<Vec<String>>,
}

impl WorkflowDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tasks<S: Into<String>>(mut self, tasks: impl IntoIterator<Item = S>) -> Self {
        self.tasks = Some(tasks.into_iter().map(Into::into).collect());
        self
    }
}

/// Record-level operations shared by the facade, sync and the engine.
pub struct Catalog {
    store: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    default_category: String,
    qualified_names: bool,
}

impl Catalog {
    pub fn new(store: Arc<dyn GraphStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            default_category: "uncategorized".to_string(),
            qualified_names: false,
        }
    }

    pub fn from_config(
        store: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        config: &aflow_config::RegistryConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            default_category: config.default_category.clone(),
            qualified_names: config.naming == "qualified",
        }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Tool identity for a function discovered in `category`.
    pub fn tool_name(&self, category: &str, function: &str) -> String {
        if self.qualified_names {
            format!("{category}.{function}")
        } else {
            function.to_string()
        }
    }

    /// Symbol a tool's implementation is exported as inside its module.
    pub fn symbol_of<'a>(&self, record: &'a ToolRecord) -> &'a str {
        record
            .name
            .strip_prefix(record.category.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(&record.name)
    }

    async fn embed(&self, name: &str, description: &str) -> Result<Vec<f32>, AflowError> {
        Ok(self.embedder.embed(&record_text(name, description)).await?)
    }

    // ── Tools ───────────────────────────────────────────────────────────

    pub async fn create_tool(&self, draft: ToolDraft) -> Result<ToolRecord, AflowError> {
        if let Some(existing) = self.find_tool(&draft.name).await? {
            return Ok(existing);
        }

        let description = draft.description.unwrap_or_default();
        let record = ToolRecord {
            embedding: self.embed(&draft.name, &description).await?,
            name: draft.name,
            description,
            category: draft
                .category
                .unwrap_or_else(|| self.default_category.clone()),
            source_path: draft.source_path,
            source_hash: draft.source_hash,
            parameters: draft.parameters.unwrap_or_default(),
        };
        self.store.upsert(Record::Tool(record.clone())).await?;
        info!(tool = %record.name, category = %record.category, "Tool created");
        Ok(record)
    }

    pub async fn update_tool(&self, draft: ToolDraft) -> Result<ToolRecord, AflowError> {
        let mut record = self
            .find_tool(&draft.name)
            .await?
            .ok_or_else(|| AflowError::not_found(RecordKind::Tool, &draft.name))?;

        if let Some(description) = draft.description {
            record.description = description;
        }
        if let Some(category) = draft.category {
            record.category = category;
        }
        if let Some(parameters) = draft.parameters {
            record.parameters = parameters;
        }
        if draft.source_path.is_some() {
            record.source_path = draft.source_path;
        }
        if draft.source_hash.is_some() {
            record.source_hash = draft.source_hash;
        }
        record.embedding = self.embed(&record.name, &record.description).await?;

        self.store.upsert(Record::Tool(record.clone())).await?;
        info!(tool = %record.name, category = %record.category, "Tool updated");
        Ok(record)
    }

    pub async fn get_tool(&self, name: &str) -> Result<ToolRecord, AflowError> {
        self.find_tool(name)
            .await?
            .ok_or_else(|| AflowError::not_found(RecordKind::Tool, name))
    }

    pub async fn find_tool(&self, name: &str) -> Result<Option<ToolRecord>, AflowError> {
        Ok(self
            .store
            .find_by_name(RecordKind::Tool, name)
            .await?
            .and_then(Record::into_tool))
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolRecord>, AflowError> {
        Ok(self
            .store
            .list_by_kind(RecordKind::Tool)
            .await?
            .into_iter()
            .filter_map(Record::into_tool)
            .collect())
    }

    /// Delete a tool no task uses.
    pub async fn delete_tool(&self, name: &str) -> Result<(), AflowError> {
        self.get_tool(name).await?;
        let users = self.referrers(RecordKind::Tool, name, Relation::Uses).await?;
        if !users.is_empty() {
            return Err(AflowError::InUse {
                kind: RecordKind::Tool,
                name: name.to_string(),
                dependent_kind: RecordKind::Task,
                dependents: users,
            });
        }
        self.store.delete(RecordKind::Tool, name).await?;
        info!(tool = %name, "Tool deleted");
        Ok(())
    }

    // ── Tasks ───────────────────────────────────────────────────────────

    pub async fn create_task(&self, draft: TaskDraft) -> Result<TaskRecord, AflowError> {
        if let Some(existing) = self.find_task(&draft.name).await? {
            return Ok(existing);
        }

        let tools = draft.tools.unwrap_or_default();
        self.require_existing(RecordKind::Task, &draft.name, RecordKind::Tool, &tools)
            .await?;

        let description = draft.description.unwrap_or_default();
        let record = TaskRecord {
            embedding: self.embed(&draft.name, &description).await?,
            name: draft.name,
            description,
            tools: Vec::new(),
            input_params: draft.input_params.unwrap_or_default(),
            output_params: draft.output_params.unwrap_or_default(),
        };
        self.store.upsert(Record::Task(record.clone())).await?;
        self.link_steps(Relation::Uses, &record.name, &tools).await?;
        info!(task = %record.name, tools = tools.len(), "Task created");
        self.get_task(&record.name).await
    }

    pub async fn update_task(&self, draft: TaskDraft) -> Result<TaskRecord, AflowError> {
        let mut record = self
            .find_task(&draft.name)
            .await?
            .ok_or_else(|| AflowError::not_found(RecordKind::Task, &draft.name))?;

        if let Some(tools) = &draft.tools {
            self.require_existing(RecordKind::Task, &draft.name, RecordKind::Tool, tools)
                .await?;
        }
        if let Some(description) = draft.description {
            record.description = description;
        }
        if let Some(inputs) = draft.input_params {
            record.input_params = inputs;
        }
        if let Some(outputs) = draft.output_params {
            record.output_params = outputs;
        }
        record.embedding = self.embed(&record.name, &record.description).await?;
        record.tools = Vec::new();

        self.store.upsert(Record::Task(record.clone())).await?;
        if let Some(tools) = &draft.tools {
            self.unlink_steps(Relation::Uses, &record.name).await?;
            self.link_steps(Relation::Uses, &record.name, tools).await?;
        }
        info!(task = %record.name, "Task updated");
        self.get_task(&record.name).await
    }

    pub async fn get_task(&self, name: &str) -> Result<TaskRecord, AflowError> {
        self.find_task(name)
            .await?
            .ok_or_else(|| AflowError::not_found(RecordKind::Task, name))
    }

    pub async fn find_task(&self, name: &str) -> Result<Option<TaskRecord>, AflowError> {
        match self
            .store
            .find_by_name(RecordKind::Task, name)
            .await?
            .and_then(Record::into_task)
        {
            Some(record) => Ok(Some(self.hydrate_task(record).await?)),
            None => Ok(None),
        }
    }

    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>, AflowError> {
        let records = self.store.list_by_kind(RecordKind::Task).await?;
        let mut out = Vec::with_capacity(records.len());
        for record in records.into_iter().filter_map(Record::into_task) {
            out.push(self.hydrate_task(record).await?);
        }
        Ok(out)
    }

    /// Delete a task no workflow contains.
    pub async fn delete_task(&self, name: &str) -> Result<(), AflowError> {
        self.get_task(name).await?;
        let workflows = self
            .referrers(RecordKind::Task, name, Relation::Contains)
            .await?;
        if !workflows.is_empty() {
            return Err(AflowError::InUse {
                kind: RecordKind::Task,
                name: name.to_string(),
                dependent_kind: RecordKind::Workflow,
                dependents: workflows,
            });
        }
        self.store.delete(RecordKind::Task, name).await?;
        info!(task = %name, "Task deleted");
        Ok(())
    }

    // ── Workflows ───────────────────────────────────────────────────────

    pub async fn create_workflow(&self, draft: WorkflowDraft) -> Result<WorkflowRecord, AflowError> {
        if let Some(existing) = self.find_workflow(&draft.name).await? {
            return Ok(existing);
        }

        let tasks = draft.tasks.unwrap_or_default();
        self.require_existing(RecordKind::Workflow, &draft.name, RecordKind::Task, &tasks)
            .await?;

        let description = draft.description.unwrap_or_default();
        let record = WorkflowRecord {
            embedding: self.embed(&draft.name, &description).await?,
            name: draft.name,
            description,
            tasks: Vec::new(),
        };
        self.store.upsert(Record::Workflow(record.clone())).await?;
        self.link_steps(Relation::Contains, &record.name, &tasks)
            .await?;
        info!(workflow = %record.name, tasks = tasks.len(), "Workflow created");
        self.get_workflow(&record.name).await
    }

    pub async fn update_workflow(&self, draft: WorkflowDraft) -> Result<WorkflowRecord, AflowError> {
        let mut record = self
            .find_workflow(&draft.name)
            .await?
            .ok_or_else(|| AflowError::not_found(RecordKind::Workflow, &draft.name))?;

        if let Some(tasks) = &draft.tasks {
            self.require_existing(RecordKind::Workflow, &draft.name, RecordKind::Task, tasks)
                .await?;
        }
        if let Some(description) = draft.description {
            record.description = description;
        }
        record.embedding = self.embed(&record.name, &record.description).await?;
        record.tasks = Vec::new();

        self.store.upsert(Record::Workflow(record.clone())).await?;
        if let Some(tasks) = &draft.tasks {
            self.unlink_steps(Relation::Contains, &record.name).await?;
            self.link_steps(Relation::Contains, &record.name, tasks)
                .await?;
        }
        info!(workflow = %record.name, "Workflow updated");
        self.get_workflow(&record.name).await
    }

    pub async fn get_workflow(&self, name: &str) -> Result<WorkflowRecord, AflowError> {
        self.find_workflow(name)
            .await?
            .ok_or_else(|| AflowError::not_found(RecordKind::Workflow, name))
    }

    pub async fn find_workflow(&self, name: &str) -> Result<Option<WorkflowRecord>, AflowError> {
        match self
            .store
            .find_by_name(RecordKind::Workflow, name)
            .await?
            .and_then(Record::into_workflow)
        {
            Some(record) => Ok(Some(self.hydrate_workflow(record).await?)),
            None => Ok(None),
        }
    }

    pub async fn list_workflows(&self) -> Result<Vec<WorkflowRecord>, AflowError> {
        let records = self.store.list_by_kind(RecordKind::Workflow).await?;
        let mut out = Vec::with_capacity(records.len());
        for record in records.into_iter().filter_map(Record::into_workflow) {
            out.push(self.hydrate_workflow(record).await?);
        }
        Ok(out)
    }

    /// Delete a workflow. Nothing depends on workflows, so this only fails
    /// when the name is unknown.
    pub async fn delete_workflow(&self, name: &str) -> Result<(), AflowError> {
        if !self.store.delete(RecordKind::Workflow, name).await? {
            return Err(AflowError::not_found(RecordKind::Workflow, name));
        }
        info!(workflow = %name, "Workflow deleted");
        Ok(())
    }

    // ── Relationships ───────────────────────────────────────────────────

    /// Names of records pointing at `(kind, name)` via `relation`.
    pub async fn referrers(
        &self,
        kind: RecordKind,
        name: &str,
        relation: Relation,
    ) -> Result<Vec<String>, AflowError> {
        let mut names: Vec<String> = self
            .store
            .incoming(kind, name, relation)
            .await?
            .into_iter()
            .map(|e| e.from)
            .collect();
        names.dedup();
        Ok(names)
    }

    async fn hydrate_task(&self, mut record: TaskRecord) -> Result<TaskRecord, AflowError> {
        record.tools = self.steps(RecordKind::Task, &record.name, Relation::Uses).await?;
        Ok(record)
    }

    async fn hydrate_workflow(
        &self,
        mut record: WorkflowRecord,
    ) -> Result<WorkflowRecord, AflowError> {
        record.tasks = self
            .steps(RecordKind::Workflow, &record.name, Relation::Contains)
            .await?;
        Ok(record)
    }

    async fn steps(
        &self,
        kind: RecordKind,
        name: &str,
        relation: Relation,
    ) -> Result<Vec<StepRef>, AflowError> {
        Ok(self
            .store
            .outgoing(kind, name, relation)
            .await?
            .into_iter()
            .map(|e| StepRef::new(e.to, e.order))
            .collect())
    }

    async fn link_steps(
        &self,
        relation: Relation,
        from: &str,
        names: &[String],
    ) -> Result<(), AflowError> {
        for (order, to) in (0u32..).zip(names) {
            let edge = match relation {
                Relation::Uses => Edge::uses(from, to, order),
                Relation::Contains => Edge::contains(from, to, order),
            };
            self.store.relate(edge).await?;
        }
        Ok(())
    }

    async fn unlink_steps(&self, relation: Relation, from: &str) -> Result<(), AflowError> {
        let (from_kind, _) = relation.endpoints();
        for edge in self.store.outgoing(from_kind, from, relation).await? {
            self.store.unrelate(&edge).await?;
        }
        Ok(())
    }

    /// Fail with one `Validation` error naming every absent reference.
    async fn require_existing(
        &self,
        kind: RecordKind,
        name: &str,
        target: RecordKind,
        names: &[String],
    ) -> Result<(), AflowError> {
        let mut missing = Vec::new();
        for candidate in names {
            if self.store.find_by_name(target, candidate).await?.is_none()
                && !missing.contains(candidate)
            {
                missing.push(candidate.clone());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AflowError::Validation {
                kind,
                name: name.to_string(),
                missing_kind: target,
                missing,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::store::MemoryGraphStore;
    use pretty_assertions::assert_eq;

    fn catalog() -> (Arc<MemoryGraphStore>, Catalog) {
        let store = Arc::new(MemoryGraphStore::new());
        let catalog = Catalog::new(store.clone(), Arc::new(HashingEmbedder::new(32)));
        (store, catalog)
    }

    #[tokio::test]
    async fn test_create_tool_idempotent() {
        let (store, catalog) = catalog();
        let first = catalog
            .create_tool(ToolDraft::new("double").description("Doubles n.").category("math"))
            .await
            .unwrap();
        let writes = store.writes();
        let second = catalog
            .create_tool(ToolDraft::new("double").description("Something else."))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(store.writes(), writes);
        assert_eq!(second.description, "Doubles n.");
        assert!(!second.embedding.is_empty());
    }

    #[tokio::test]
    async fn test_create_tool_defaults_category() {
        let (_, catalog) = catalog();
        let tool = catalog.create_tool(ToolDraft::new("ping")).await.unwrap();
        assert_eq!(tool.category, "uncategorized");
        assert_eq!(tool.description, "");
    }

    #[tokio::test]
    async fn test_update_missing_tool_not_found() {
        let (_, catalog) = catalog();
        let err = catalog
            .update_tool(ToolDraft::new("ghost").description("x"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_tool_recomputes_embedding() {
        let (_, catalog) = catalog();
        let before = catalog
            .create_tool(ToolDraft::new("fetch").description("fetch a page"))
            .await
            .unwrap();
        let after = catalog
            .update_tool(ToolDraft::new("fetch").description("download weather report"))
            .await
            .unwrap();
        assert_eq!(after.category, before.category);
        assert_ne!(after.embedding, before.embedding);
    }

    #[tokio::test]
    async fn test_create_task_lists_all_missing_tools() {
        let (_, catalog) = catalog();
        catalog.create_tool(ToolDraft::new("a")).await.unwrap();
        let err = catalog
            .create_task(TaskDraft::new("T").tools(["a", "b", "c", "b"]))
            .await
            .unwrap_err();
        match err {
            AflowError::Validation { missing, missing_kind, .. } => {
                assert_eq!(missing_kind, RecordKind::Tool);
                assert_eq!(missing, vec!["b".to_string(), "c".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(catalog.find_task("T").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_task_steps_hydrated_in_order() {
        let (_, catalog) = catalog();
        for name in ["b", "a"] {
            catalog.create_tool(ToolDraft::new(name)).await.unwrap();
        }
        let task = catalog
            .create_task(TaskDraft::new("T").tools(["b", "a"]).inputs(["x"]))
            .await
            .unwrap();
        assert_eq!(task.tools, vec![StepRef::new("b", 0), StepRef::new("a", 1)]);
        assert_eq!(task.input_params, vec!["x".to_string()]);

        let updated = catalog
            .update_task(TaskDraft::new("T").tools(["a"]))
            .await
            .unwrap();
        assert_eq!(updated.tools, vec![StepRef::new("a", 0)]);
        assert_eq!(updated.input_params, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_tool_in_use() {
        let (_, catalog) = catalog();
        catalog.create_tool(ToolDraft::new("a")).await.unwrap();
        catalog
            .create_task(TaskDraft::new("T").tools(["a"]))
            .await
            .unwrap();
        let err = catalog.delete_tool("a").await.unwrap_err();
        assert!(matches!(err, AflowError::InUse { ref dependents, .. } if dependents == &["T".to_string()]));
        assert!(catalog.find_tool("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_task_in_use_then_free() {
        let (_, catalog) = catalog();
        catalog.create_tool(ToolDraft::new("a")).await.unwrap();
        catalog
            .create_task(TaskDraft::new("T").tools(["a"]))
            .await
            .unwrap();
        catalog
            .create_workflow(WorkflowDraft::new("W").tasks(["T"]))
            .await
            .unwrap();

        assert!(matches!(
            catalog.delete_task("T").await.unwrap_err(),
            AflowError::InUse { .. }
        ));
        catalog.delete_workflow("W").await.unwrap();
        catalog.delete_task("T").await.unwrap();
        catalog.delete_tool("a").await.unwrap();
        assert!(catalog.list_tools().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_workflow() {
        let (_, catalog) = catalog();
        assert!(catalog.delete_workflow("W").await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_symbol_of_strips_category() {
        let (_, catalog) = catalog();
        let mut record = ToolRecord {
            name: "math.double".to_string(),
            description: String::new(),
            category: "math".to_string(),
            embedding: vec![],
            source_path: None,
            source_hash: None,
            parameters: vec![],
        };
        assert_eq!(catalog.symbol_of(&record), "double");
        record.name = "double".to_string();
        assert_eq!(catalog.symbol_of(&record), "double");
    }
}
