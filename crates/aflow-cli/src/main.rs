#![deny(unsafe_code)]

//! aflow CLI: scan a tool source tree, inspect the registry and search it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use aflow_config::AppConfig;
use aflow_core::{Aflow, Record, RecordKind, StaticLoader};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// aflow: a tool registry kept in sync with its source tree.
#[derive(Parser)]
#[command(name = "aflow", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "aflow.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rescan the source tree once and sync the registry.
    Scan,

    /// Rescan, then keep watching the source tree until Ctrl-C.
    Watch,

    /// List registered tools.
    Tools,

    /// List registered tasks.
    Tasks,

    /// List registered workflows.
    Workflows,

    /// Print one record as JSON.
    Show {
        #[arg(value_enum)]
        kind: KindArg,
        name: String,
    },

    /// Hybrid search over one record kind.
    Search {
        query: String,
        #[arg(long, value_enum, default_value = "tool")]
        kind: KindArg,
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
    },

    /// Delete a record. Tools used by tasks and tasks contained in workflows
    /// are refused.
    Delete {
        #[arg(value_enum)]
        kind: KindArg,
        name: String,
    },

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Tool,
    Task,
    Workflow,
}

impl From<KindArg> for RecordKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Tool => RecordKind::Tool,
            KindArg::Task => RecordKind::Task,
            KindArg::Workflow => RecordKind::Workflow,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = load_config(&cli.config).await;

    let filter = match cli.verbose {
        0 => loaded
            .as_ref()
            .map(|c| c.logging.level.clone())
            .unwrap_or_else(|_| "info".to_string()),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config = loaded?;
    if !cli.config.exists() {
        info!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
        command => {
            let aflow = Aflow::open(config, Arc::new(StaticLoader::new())).await?;
            run(&aflow, command).await?;
        }
    }

    Ok(())
}

async fn run(aflow: &Aflow, command: Commands) -> Result<()> {
    match command {
        Commands::Scan => cmd_scan(aflow).await,
        Commands::Watch => cmd_watch(aflow).await,
        Commands::Tools => cmd_tools(aflow).await,
        Commands::Tasks => cmd_tasks(aflow).await,
        Commands::Workflows => cmd_workflows(aflow).await,
        Commands::Show { kind, name } => cmd_show(aflow, kind.into(), &name).await,
        Commands::Search { query, kind, top_k } => {
            cmd_search(aflow, &query, kind.into(), top_k).await
        }
        Commands::Delete { kind, name } => cmd_delete(aflow, kind.into(), &name).await,
        Commands::Config { .. } => Ok(()),
    }
}

async fn cmd_scan(aflow: &Aflow) -> Result<()> {
    let report = aflow.rescan().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_watch(aflow: &Aflow) -> Result<()> {
    let report = aflow.rescan().await;
    info!(
        root_hash = %report.root_hash,
        changed = report.changes.len(),
        "Initial scan finished"
    );
    let handle = aflow.watch().context("failed to start file watcher")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Received Ctrl-C, shutting down");
    aflow.shutdown();
    handle.await?;
    Ok(())
}

async fn cmd_tools(aflow: &Aflow) -> Result<()> {
    for tool in aflow.list_tools().await? {
        let params: Vec<String> = tool
            .parameters
            .iter()
            .map(|p| {
                if p.required {
                    p.name.clone()
                } else {
                    format!("{}?", p.name)
                }
            })
            .collect();
        println!(
            "{:<32} {:<32} ({})",
            tool.name,
            tool.category,
            params.join(", ")
        );
    }
    Ok(())
}

async fn cmd_tasks(aflow: &Aflow) -> Result<()> {
    for task in aflow.list_tasks().await? {
        let tools: Vec<&str> = task.tools.iter().map(|s| s.name.as_str()).collect();
        println!("{:<32} {}", task.name, tools.join(" -> "));
    }
    Ok(())
}

async fn cmd_workflows(aflow: &Aflow) -> Result<()> {
    for workflow in aflow.list_workflows().await? {
        let tasks: Vec<&str> = workflow.tasks.iter().map(|s| s.name.as_str()).collect();
        println!("{:<32} {}", workflow.name, tasks.join(" -> "));
    }
    Ok(())
}

async fn cmd_show(aflow: &Aflow, kind: RecordKind, name: &str) -> Result<()> {
    let record = match kind {
        RecordKind::Tool => Record::Tool(aflow.get_tool(name).await?),
        RecordKind::Task => Record::Task(aflow.get_task(name).await?),
        RecordKind::Workflow => Record::Workflow(aflow.get_workflow(name).await?),
    };
    println!("{}", serde_json::to_string_pretty(&without_embedding(record))?);
    Ok(())
}

async fn cmd_search(aflow: &Aflow, query: &str, kind: RecordKind, top_k: usize) -> Result<()> {
    let hits = aflow.hybrid_search(query, kind, top_k).await?;
    if hits.is_empty() {
        println!("No matches.");
    }
    for hit in hits {
        let used_by = if hit.referenced_by.is_empty() {
            String::new()
        } else {
            format!("  [{}]", hit.referenced_by.join(", "))
        };
        println!(
            "{:.3}  {:<32} {}{}",
            hit.score,
            hit.record.name(),
            hit.record.description(),
            used_by
        );
    }
    Ok(())
}

async fn cmd_delete(aflow: &Aflow, kind: RecordKind, name: &str) -> Result<()> {
    match kind {
        RecordKind::Tool => aflow.delete_tool(name).await?,
        RecordKind::Task => aflow.delete_task(name).await?,
        RecordKind::Workflow => aflow.delete_workflow(name).await?,
    }
    println!("Deleted {kind} '{name}'.");
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str =
            toml::to_string_pretty(config).map_err(|e| anyhow::anyhow!("TOML error: {e}"))?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path).await.map_err(|e| anyhow::anyhow!(e))
    } else {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }
}

/// Drop the embedding vector before printing a record.
fn without_embedding(record: Record) -> Record {
    match record {
        Record::Tool(mut tool) => {
            tool.embedding.clear();
            Record::Tool(tool)
        }
        Record::Task(mut task) => {
            task.embedding.clear();
            Record::Task(task)
        }
        Record::Workflow(mut workflow) => {
            workflow.embedding.clear();
            Record::Workflow(workflow)
        }
    }
}
