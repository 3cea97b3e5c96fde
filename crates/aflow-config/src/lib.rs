#![deny(unsafe_code)]

//! Configuration loading and validation for aflow.
//!
//! Loads TOML configuration files and validates them. [`AppConfig`] is the
//! central configuration structure; every section has defaults so an empty
//! file (or no file at all) yields a working setup that scans `./tools` for
//! Python sources and keeps the registry in memory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Environment variable overriding `embedder.api_key`.
pub const ENV_EMBEDDER_API_KEY: &str = "AFLOW_EMBEDDER_API_KEY";
/// Environment variable overriding `embedder.base_url`.
pub const ENV_EMBEDDER_BASE_URL: &str = "AFLOW_EMBEDDER_BASE_URL";
/// Environment variable overriding `embedder.model`.
pub const ENV_EMBEDDER_MODEL: &str = "AFLOW_EMBEDDER_MODEL";

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Source tree scanning.
    #[serde(default)]
    pub scan: ScanConfig,

    /// Bundled graph store.
    #[serde(default)]
    pub store: StoreConfig,

    /// Tool registry behaviour.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Task and workflow execution.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Embedding provider used for search vectors.
    #[serde(default)]
    pub embedder: EmbedderConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Source tree scanning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Root directory holding tool sources.
    #[serde(default = "default_scan_root")]
    pub root: PathBuf,

    /// Tracked source extension: "py" or "rs".
    #[serde(default = "default_scan_extension")]
    pub extension: String,

    /// Directory names skipped during traversal (hidden entries are always skipped).
    #[serde(default = "default_ignore_dirs")]
    pub ignore_dirs: Vec<String>,

    /// Where the last hash tree snapshot is persisted between runs.
    #[serde(default)]
    pub state_path: Option<PathBuf>,

    /// Minimum interval between two watcher-triggered rescans.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root: default_scan_root(),
            extension: default_scan_extension(),
            ignore_dirs: default_ignore_dirs(),
            state_path: None,
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_scan_root() -> PathBuf {
    PathBuf::from("tools")
}

fn default_scan_extension() -> String {
    "py".to_string()
}

fn default_ignore_dirs() -> Vec<String> {
    ["__pycache__", "target", "node_modules", "build", "dist"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_debounce_ms() -> u64 {
    500
}

/// Graph store configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON file backing the bundled store. In-memory only when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Tool registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Tool identity scheme: "bare" (function name) or "qualified" (`category.name`).
    #[serde(default = "default_naming")]
    pub naming: String,

    /// Category assigned to tools registered without one.
    #[serde(default = "default_category")]
    pub default_category: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            naming: default_naming(),
            default_category: default_category(),
        }
    }
}

fn default_naming() -> String {
    "bare".to_string()
}

fn default_category() -> String {
    "uncategorized".to_string()
}

/// Execution configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Compatibility mode: bind scalar results to the variable named after
    /// `Returns:` in the tool's documentation when it declares no outputs.
    #[serde(default)]
    pub infer_outputs_from_docs: bool,
}

/// Embedding provider configuration.
///
/// ## TOML Example
///
/// ```toml
/// [embedder]
/// provider = "openai"
/// base_url = "http://localhost:11434/v1"
/// model = "nomic-embed-text:v1.5"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// Provider: "hashing" (local, deterministic) or "openai" (any compatible endpoint).
    #[serde(default = "default_embedder_provider")]
    pub provider: String,

    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_embedder_base_url")]
    pub base_url: String,

    /// API key sent as a bearer token.
    #[serde(default)]
    pub api_key: String,

    /// Embedding model name.
    #[serde(default = "default_embedder_model")]
    pub model: String,

    /// Vector dimensions produced by the hashing provider.
    #[serde(default = "default_embedder_dimensions")]
    pub dimensions: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            provider: default_embedder_provider(),
            base_url: default_embedder_base_url(),
            api_key: String::new(),
            model: default_embedder_model(),
            dimensions: default_embedder_dimensions(),
        }
    }
}

fn default_embedder_provider() -> String {
    "hashing".to_string()
}

fn default_embedder_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedder_model() -> String {
    "text-embedding-ada-002".to_string()
}

fn default_embedder_dimensions() -> usize {
    256
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay embedder settings from the environment.
    ///
    /// `lookup` is injected so callers (and tests) control where values come from.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(ENV_EMBEDDER_API_KEY) {
            debug!("embedder.api_key overridden from environment");
            self.embedder.api_key = key;
        }
        if let Some(url) = lookup(ENV_EMBEDDER_BASE_URL) {
            debug!(%url, "embedder.base_url overridden from environment");
            self.embedder.base_url = url;
        }
        if let Some(model) = lookup(ENV_EMBEDDER_MODEL) {
            debug!(%model, "embedder.model overridden from environment");
            self.embedder.model = model;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_extensions = ["py", "rs"];
        if !valid_extensions.contains(&self.scan.extension.as_str()) {
            return Err(ConfigError::Validation(format!(
                "scan.extension must be one of {:?}, got {:?}",
                valid_extensions, self.scan.extension
            )));
        }
        if self.scan.root.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "scan.root must not be empty".to_string(),
            ));
        }
        for (i, dir) in self.scan.ignore_dirs.iter().enumerate() {
            if dir.is_empty() || dir.contains('/') {
                return Err(ConfigError::Validation(format!(
                    "scan.ignore_dirs[{i}] must be a bare directory name, got {dir:?}"
                )));
            }
        }

        let valid_naming = ["bare", "qualified"];
        if !valid_naming.contains(&self.registry.naming.as_str()) {
            return Err(ConfigError::Validation(format!(
                "registry.naming must be one of {:?}, got {:?}",
                valid_naming, self.registry.naming
            )));
        }
        if self.registry.default_category.is_empty() {
            return Err(ConfigError::Validation(
                "registry.default_category must not be empty".to_string(),
            ));
        }

        let valid_providers = ["hashing", "openai"];
        if !valid_providers.contains(&self.embedder.provider.as_str()) {
            return Err(ConfigError::Validation(format!(
                "embedder.provider must be one of {:?}, got {:?}",
                valid_providers, self.embedder.provider
            )));
        }
        if self.embedder.dimensions == 0 {
            return Err(ConfigError::Validation(
                "embedder.dimensions must be non-zero".to_string(),
            ));
        }
        if self.embedder.provider == "openai" && self.embedder.base_url.is_empty() {
            return Err(ConfigError::Validation(
                "embedder.base_url is required when provider is \"openai\"".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether tool identities are namespaced by category.
    pub fn qualified_names(&self) -> bool {
        self.registry.naming == "qualified"
    }
}
