//! Task and workflow execution.
//!
//! A task runs its tools in ascending step order against one
//! [`ExecutionContext`]. For each step the engine resolves the tool record,
//! loads the implementation through the [`ModuleCache`], binds declared
//! parameters from the context by name and merges the result back:
//!
//! - a JSON object result merges all of its keys into the context
//! - any other result is stored under the tool's name and bound to the
//!   tool's single declared output, if it has one
//!
//! Workflows run their tasks in order over the same context. The first
//! failure aborts the run and is returned unchanged; nothing is rolled back.

pub mod context;
pub mod loader;
pub mod tool;

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::AflowError;
use crate::registry::Catalog;
use crate::store::{RecordKind, ToolRecord};

pub use crate::schema::Param;
pub use context::ExecutionContext;
pub use loader::{LoadError, ModuleCache, ModuleLoader, StaticLoader};
pub use tool::{ToolArgs, ToolFailure, ToolHandler, ToolModule, ToolSpec};

static RETURNS_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"Returns:\s*\n?\s*([A-Za-z_][A-Za-z0-9_]*)").ok());

/// Result of a successful task run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    /// Raw result of each tool, by tool name.
    pub results: BTreeMap<String, Value>,
    /// Context restricted to the task's declared outputs.
    pub outputs: ExecutionContext,
    pub context: ExecutionContext,
}

/// Result of a successful workflow run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowOutcome {
    /// Each task's outcome, in execution order.
    pub tasks: Vec<(String, TaskOutcome)>,
    pub context: ExecutionContext,
}

/// Runs tasks and workflows read from the catalog.
pub struct ExecutionEngine {
    catalog: Arc<Catalog>,
    modules: Arc<ModuleCache>,
    infer_outputs_from_docs: bool,
}

impl ExecutionEngine {
    pub fn new(catalog: Arc<Catalog>, modules: Arc<ModuleCache>) -> Self {
        Self {
            catalog,
            modules,
            infer_outputs_from_docs: false,
        }
    }

    /// Bind scalar results of tools without declared outputs to the name
    /// following `Returns:` in their documentation.
    pub fn with_output_inference(mut self, enabled: bool) -> Self {
        self.infer_outputs_from_docs = enabled;
        self
    }

    pub fn modules(&self) -> &Arc<ModuleCache> {
        &self.modules
    }

    pub async fn execute_task(
        &self,
        name: &str,
        mut context: ExecutionContext,
    ) -> Result<TaskOutcome, AflowError> {
        let task = self.catalog.get_task(name).await?;
        if task.tools.is_empty() {
            return Err(AflowError::not_found(RecordKind::Task, name));
        }

        let missing = context.missing(&task.input_params);
        if !missing.is_empty() {
            return Err(AflowError::MissingInput {
                task: task.name,
                missing,
            });
        }

        info!(task = %task.name, steps = task.tools.len(), "Executing task");
        let mut steps = task.tools.clone();
        steps.sort();

        let mut results = BTreeMap::new();
        for step in &steps {
            let record = self.catalog.get_tool(&step.name).await?;
            let spec = self
                .modules
                .resolve(&record.category, self.catalog.symbol_of(&record))
                .await?;

            let args = bind_arguments(&record, &spec, &context)?;
            debug!(tool = %record.name, order = step.order, args = args.len(), "Invoking tool");

            let result = spec
                .invoke(args)
                .await
                .map_err(|source| AflowError::StepExecution {
                    tool: record.name.clone(),
                    source,
                    context: context.clone(),
                })?;

            self.merge_result(&record, &spec, result.clone(), &mut context);
            results.insert(record.name, result);
        }

        let missing = context.missing(&task.output_params);
        if !missing.is_empty() {
            return Err(AflowError::MissingOutput {
                task: task.name,
                missing,
            });
        }

        Ok(TaskOutcome {
            results,
            outputs: context.restrict(&task.output_params),
            context,
        })
    }

    pub async fn execute_workflow(
        &self,
        name: &str,
        mut context: ExecutionContext,
    ) -> Result<WorkflowOutcome, AflowError> {
        let workflow = self.catalog.get_workflow(name).await?;
        if workflow.tasks.is_empty() {
            return Err(AflowError::not_found(RecordKind::Workflow, name));
        }

        info!(workflow = %workflow.name, tasks = workflow.tasks.len(), "Executing workflow");
        let mut steps = workflow.tasks.clone();
        steps.sort();

        let mut tasks = Vec::with_capacity(steps.len());
        for step in steps {
            let outcome = self.execute_task(&step.name, context).await?;
            context = outcome.context.clone();
            tasks.push((step.name, outcome));
        }

        Ok(WorkflowOutcome { tasks, context })
    }

    fn merge_result(
        &self,
        record: &ToolRecord,
        spec: &ToolSpec,
        result: Value,
        context: &mut ExecutionContext,
    ) {
        let value = match result {
            Value::Object(map) => {
                context.merge_object(map);
                return;
            }
            other => other,
        };

        context.insert(record.name.clone(), value.clone());
        if let [output] = spec.outputs.as_slice() {
            context.insert(output.clone(), value);
        } else if spec.outputs.is_empty() && self.infer_outputs_from_docs {
            let doc = spec.doc.as_deref().unwrap_or(&record.description);
            if let Some(name) = returns_name(doc) {
                context.insert(name, value);
            }
        }
    }
}

/// Bind every declared parameter found in the context. All missing required
/// parameters are reported together before anything is invoked.
fn bind_arguments(
    record: &ToolRecord,
    spec: &ToolSpec,
    context: &ExecutionContext,
) -> Result<ToolArgs, AflowError> {
    let params = if spec.params.is_empty() {
        &record.parameters
    } else {
        &spec.params
    };

    let mut args = ToolArgs::new();
    let mut missing = Vec::new();
    for param in params {
        match context.get(&param.name) {
            Some(value) => args.insert(param.name.clone(), value.clone()),
            None if param.required => missing.push(param.name.clone()),
            None => {}
        }
    }

    if missing.is_empty() {
        Ok(args)
    } else {
        Err(AflowError::MissingArguments {
            tool: record.name.clone(),
            missing,
        })
    }
}

/// Variable name documented after `Returns:`, if any.
fn returns_name(doc: &str) -> Option<String> {
    RETURNS_PATTERN
        .as_ref()?
        .captures(doc)
        .map(|c| c[1].to_string())
}
