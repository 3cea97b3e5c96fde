//! Resolution of tool implementations by category and name.
//!
//! A [`ModuleLoader`] produces the [`ToolModule`] for a category. The
//! [`ModuleCache`] memoizes loaded modules per category: concurrent first
//! lookups of the same category share one load, and a rescan invalidates the
//! categories whose source changed so the next lookup reloads them.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::BoxFuture;

use super::tool::{ToolModule, ToolSpec};

/// Failure to resolve an implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("module not found: {category}")]
    ModuleNotFound { category: String },

    #[error("symbol {name} not found in module {category}")]
    SymbolNotFound { category: String, name: String },

    #[error("failed to load module {category}: {message}")]
    Failed { category: String, message: String },
}

/// Source of tool modules.
pub trait ModuleLoader: Send + Sync {
    fn load<'a>(&'a self, category: &'a str) -> BoxFuture<'a, Result<ToolModule, LoadError>>;
}

/// Loader over modules registered in-process.
#[derive(Debug, Default, Clone)]
pub struct StaticLoader {
    modules: HashMap<String, ToolModule>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under `category`, creating the module on first use.
    pub fn register(&mut self, category: impl Into<String>, spec: ToolSpec) {
        let category = category.into();
        self.modules
            .entry(category.clone())
            .or_insert_with(|| ToolModule::new(category))
            .insert(spec);
    }

    pub fn with_tool(mut self, category: impl Into<String>, spec: ToolSpec) -> Self {
        self.register(category, spec);
        self
    }

    pub fn with_module(mut self, module: ToolModule) -> Self {
        self.modules.insert(module.category.clone(), module);
        self
    }

    pub fn categories(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl ModuleLoader for StaticLoader {
    fn load<'a>(&'a self, category: &'a str) -> BoxFuture<'a, Result<ToolModule, LoadError>> {
        Box::pin(async move {
            self.modules
                .get(category)
                .cloned()
                .ok_or_else(|| LoadError::ModuleNotFound {
                    category: category.to_string(),
                })
        })
    }
}

type Slot = Arc<OnceCell<Arc<ToolModule>>>;

/// Per-category memo of loaded modules.
pub struct ModuleCache {
    loader: Arc<dyn ModuleLoader>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ModuleCache {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// The module for `category`, loading it on first use.
    ///
    /// A failed load leaves the slot empty so the next call retries.
    pub async fn module(&self, category: &str) -> Result<Arc<ToolModule>, LoadError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(category.to_string()).or_default())
        };
        let module = slot
            .get_or_try_init(|| async {
                debug!(category, "Loading tool module");
                self.loader.load(category).await.map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(module))
    }

    /// Resolve one tool implementation.
    pub async fn resolve(&self, category: &str, name: &str) -> Result<Arc<ToolSpec>, LoadError> {
        self.module(category)
            .await?
            .get(name)
            .ok_or_else(|| LoadError::SymbolNotFound {
                category: category.to_string(),
                name: name.to_string(),
            })
    }

    /// Drop the cached module for `category`. Returns whether one was loaded.
    pub async fn invalidate(&self, category: &str) -> bool {
        let removed = self.slots.lock().await.remove(category);
        let was_loaded = removed.is_some_and(|slot| slot.initialized());
        if was_loaded {
            debug!(category, "Tool module invalidated");
        }
        was_loaded
    }

    pub async fn invalidate_all(&self) {
        self.slots.lock().await.clear();
    }

    /// Categories currently loaded, sorted.
    pub async fn loaded(&self) -> Vec<String> {
        let slots = self.slots.lock().await;
        let mut names: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_unstable();
        names
    }
}
