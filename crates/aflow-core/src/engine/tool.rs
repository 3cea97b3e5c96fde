//! Callable tool implementations and their declared signatures.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::BoxFuture;
use crate::schema::Param;

/// Failure raised by a tool implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolFailure {
    #[error("invalid argument {name}: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("{0}")]
    Failed(String),
}

impl ToolFailure {
    pub fn failed(message: impl Into<String>) -> Self {
        ToolFailure::Failed(message.into())
    }
}

/// Arguments bound by name for one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs(BTreeMap<String, Value>);

impl ToolArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Deserialize a required argument.
    pub fn require<T: DeserializeOwned>(&self, name: &str) -> Result<T, ToolFailure> {
        let value = self.0.get(name).ok_or_else(|| ToolFailure::InvalidArgument {
            name: name.to_string(),
            reason: "not bound".to_string(),
        })?;
        serde_json::from_value(value.clone()).map_err(|e| ToolFailure::InvalidArgument {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Deserialize an optional argument; unbound or `null` yields `None`.
    pub fn optional<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ToolFailure> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.require(name).map(Some),
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Type-erased async tool body.
pub type ToolHandler =
    Arc<dyn Fn(ToolArgs) -> BoxFuture<'static, Result<Value, ToolFailure>> + Send + Sync>;

/// A tool implementation plus its declared parameter and output schema.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub params: Vec<Param>,
    /// Variables a non-mapping result is bound to. Only a single declared
    /// output is bound; mapping results bind their own keys.
    pub outputs: Vec<String>,
    pub doc: Option<String>,
    handler: ToolHandler,
}

impl ToolSpec {
    /// Wrap an async function.
    pub fn handler<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ToolArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolFailure>> + Send + 'static,
    {
        Self {
            name: name.into(),
            params: Vec::new(),
            outputs: Vec::new(),
            doc: None,
            handler: Arc::new(
                move |args| -> BoxFuture<'static, Result<Value, ToolFailure>> { Box::pin(f(args)) },
            ),
        }
    }

    /// Wrap a synchronous function.
    pub fn sync_handler<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ToolArgs) -> Result<Value, ToolFailure> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self::handler(name, move |args| {
            let f = Arc::clone(&f);
            async move { f(args) }
        })
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_params(mut self, params: impl IntoIterator<Item = Param>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn invoke(&self, args: ToolArgs) -> BoxFuture<'static, Result<Value, ToolFailure>> {
        (self.handler)(args)
    }
}

impl fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

/// The tools one category (module) provides.
#[derive(Debug, Clone, Default)]
pub struct ToolModule {
    pub category: String,
    tools: HashMap<String, Arc<ToolSpec>>,
}

impl ToolModule {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            tools: HashMap::new(),
        }
    }

    pub fn with_tool(mut self, spec: ToolSpec) -> Self {
        self.insert(spec);
        self
    }

    pub fn insert(&mut self, spec: ToolSpec) {
        self.tools.insert(spec.name.clone(), Arc::new(spec));
    }

    pub fn get(&self, name: &str) -> Option<Arc<ToolSpec>> {
        self.tools.get(name).cloned()
    }

    /// Tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_require_and_optional() {
        let mut args = ToolArgs::new();
        args.insert("n", json!(3));
        args.insert("label", Value::Null);
        assert_eq!(args.require::<i64>("n").unwrap(), 3);
        assert_eq!(args.optional::<String>("label").unwrap(), None);
        assert!(matches!(
            args.require::<String>("n"),
            Err(ToolFailure::InvalidArgument { .. })
        ));
        assert!(matches!(
            args.require::<i64>("absent"),
            Err(ToolFailure::InvalidArgument { .. })
        ));
    }

    #[tokio::test]
    async fn test_sync_handler_invokes() {
        let spec = ToolSpec::sync_handler("double", |args| {
            let n: i64 = args.require("n")?;
            Ok(json!({"n": n * 2}))
        })
        .param(Param::required("n"));

        let mut args = ToolArgs::new();
        args.insert("n", json!(21));
        assert_eq!(spec.invoke(args).await.unwrap(), json!({"n": 42}));
        assert_eq!(spec.params, vec![Param::required("n")]);
    }

    #[test]
    fn test_module_lookup() {
        let module = ToolModule::new("math")
            .with_tool(ToolSpec::sync_handler("b", |_| Ok(Value::Null)))
            .with_tool(ToolSpec::sync_handler("a", |_| Ok(Value::Null)));
        assert_eq!(module.names(), vec!["a", "b"]);
        assert!(module.get("a").is_some());
        assert!(module.get("c").is_none());
    }
}
