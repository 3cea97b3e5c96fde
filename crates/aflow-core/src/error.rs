//! Error taxonomy surfaced by the registry, engine and facade.

use crate::embedding::EmbedError;
use crate::engine::{ExecutionContext, LoadError, ToolFailure};
use crate::store::{RecordKind, StoreError};

/// Errors returned to callers of [`Aflow`](crate::Aflow) operations.
#[derive(Debug, thiserror::Error)]
pub enum AflowError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: RecordKind, name: String },

    #[error("{kind} {name} references missing {missing_kind}s: {}", missing.join(", "))]
    Validation {
        kind: RecordKind,
        name: String,
        missing_kind: RecordKind,
        missing: Vec<String>,
    },

    #[error("{kind} {name} is in use by {dependent_kind}s: {}", dependents.join(", "))]
    InUse {
        kind: RecordKind,
        name: String,
        dependent_kind: RecordKind,
        dependents: Vec<String>,
    },

    #[error("task {task} is missing inputs: {}", missing.join(", "))]
    MissingInput { task: String, missing: Vec<String> },

    #[error("task {task} did not produce outputs: {}", missing.join(", "))]
    MissingOutput { task: String, missing: Vec<String> },

    #[error("tool {tool} is missing arguments: {}", missing.join(", "))]
    MissingArguments { tool: String, missing: Vec<String> },

    #[error("tool {tool} failed: {source}")]
    StepExecution {
        tool: String,
        #[source]
        source: ToolFailure,
        /// Context as it was when the tool was invoked.
        context: ExecutionContext,
    },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embedding(#[from] EmbedError),
}

impl AflowError {
    pub(crate) fn not_found(kind: RecordKind, name: impl Into<String>) -> Self {
        AflowError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Whether this error means the named record does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AflowError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_messages_list_every_name() {
        let err = AflowError::MissingInput {
            task: "T".to_string(),
            missing: vec!["x".to_string(), "y".to_string()],
        };
        assert_eq!(err.to_string(), "task T is missing inputs: x, y");

        let err = AflowError::InUse {
            kind: RecordKind::Tool,
            name: "double".to_string(),
            dependent_kind: RecordKind::Task,
            dependents: vec!["T".to_string()],
        };
        assert_eq!(err.to_string(), "tool double is in use by tasks: T");
    }

    #[test]
    fn test_validation_message() {
        let err = AflowError::Validation {
            kind: RecordKind::Task,
            name: "T".to_string(),
            missing_kind: RecordKind::Tool,
            missing: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "task T references missing tools: a, b");
    }
}
