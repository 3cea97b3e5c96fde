//! Declared parameter schema shared by source extraction, tool records and
//! tool implementations.

use serde::{Deserialize, Serialize};

/// A named formal parameter of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name, matched against context variable names.
    pub name: String,
    /// Whether the call must not proceed without a value.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Type annotation as written in the source, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
}

fn default_required() -> bool {
    true
}

impl Param {
    /// A parameter that must be bound before invocation.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            annotation: None,
        }
    }

    /// A parameter bound only when the context happens to hold it.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            annotation: None,
        }
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = Some(annotation.into());
        self
    }
}
