//! Configuration builders for tests.

use std::path::Path;

use aflow_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .scan_root(dir.path())
///     .naming("qualified")
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn scan_root(mut self, root: &Path) -> Self {
        self.config.scan.root = root.to_path_buf();
        self
    }

    pub fn extension(mut self, extension: &str) -> Self {
        self.config.scan.extension = extension.to_string();
        self
    }

    pub fn state_path(mut self, path: &Path) -> Self {
        self.config.scan.state_path = Some(path.to_path_buf());
        self
    }

    pub fn store_path(mut self, path: &Path) -> Self {
        self.config.store.path = Some(path.to_path_buf());
        self
    }

    pub fn naming(mut self, naming: &str) -> Self {
        self.config.registry.naming = naming.to_string();
        self
    }

    pub fn infer_outputs_from_docs(mut self, enabled: bool) -> Self {
        self.config.execution.infer_outputs_from_docs = enabled;
        self
    }

    pub fn debounce_ms(mut self, ms: u64) -> Self {
        self.config.scan.debounce_ms = ms;
        self
    }

    pub fn embedding_dimensions(mut self, dimensions: usize) -> Self {
        self.config.embedder.dimensions = dimensions;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
