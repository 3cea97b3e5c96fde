//! A fully assembled [`Aflow`] over temporary directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aflow_core::{Aflow, ToolDraft, ToolRecord};
use tempfile::TempDir;

use crate::config::TestConfigBuilder;
use crate::tools::sample_loader;

/// An [`Aflow`] scanning a temporary source tree, with snapshot state in a
/// second temporary directory and the sample tool loader installed.
///
/// Both directories are deleted when this value is dropped.
pub struct TestAflow {
    pub aflow: Aflow,
    sources: TempDir,
    data: TempDir,
}

impl TestAflow {
    /// Default configuration: Python sources, bare names, hashing embedder.
    pub async fn new() -> Self {
        Self::with_config(|builder| builder).await
    }

    /// Customise the configuration before assembly. Scan root and state path
    /// are always pointed at the temporary directories.
    pub async fn with_config(
        customize: impl FnOnce(TestConfigBuilder) -> TestConfigBuilder,
    ) -> Self {
        let sources = TempDir::new().expect("failed to create source dir");
        let data = TempDir::new().expect("failed to create data dir");
        let config = customize(TestConfigBuilder::new().embedding_dimensions(64))
            .scan_root(sources.path())
            .state_path(&data.path().join("snapshot.json"))
            .build();
        let aflow = Aflow::open(config, Arc::new(sample_loader()))
            .await
            .expect("failed to assemble aflow");
        Self {
            aflow,
            sources,
            data,
        }
    }

    pub fn root(&self) -> &Path {
        self.sources.path()
    }

    pub fn data_dir(&self) -> &Path {
        self.data.path()
    }

    /// Write `content` to `relative` under the source root, creating parents.
    pub fn write_source(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.sources.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create source parent");
        }
        std::fs::write(&path, content).expect("failed to write source file");
        path
    }

    pub fn remove_source(&self, relative: &str) {
        std::fs::remove_file(self.sources.path().join(relative))
            .expect("failed to remove source file");
    }

    /// Register the sample `math` tools (`double`, `stringify`, `square`)
    /// explicitly, without scanning.
    pub async fn register_math(&self) -> Vec<ToolRecord> {
        let mut records = Vec::new();
        for (name, params) in [("double", "n"), ("stringify", "n"), ("square", "x")] {
            let record = self
                .aflow
                .create_tool(
                    ToolDraft::new(name)
                        .category("math")
                        .parameters([aflow_core::Param::required(params)]),
                )
                .await
                .expect("failed to register math tool");
            records.push(record);
        }
        records
    }

    /// Register one explicit tool record.
    pub async fn register(&self, name: &str, category: &str) -> ToolRecord {
        self.aflow
            .create_tool(ToolDraft::new(name).category(category))
            .await
            .expect("failed to register tool")
    }
}
