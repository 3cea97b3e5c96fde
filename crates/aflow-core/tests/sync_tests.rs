//! Source tree → registry synchronization through the assembled facade.

use std::sync::Arc;

use aflow_core::{Aflow, AflowError, ExecutionContext, RecordKind, TaskDraft};
use aflow_test_utils::tools::sample_loader;
use aflow_test_utils::{TestAflow, TestConfigBuilder};
use pretty_assertions::assert_eq;
use serde_json::json;

const WEATHER: &str = r#"def get_weather(city, units="metric"):
    """Current weather for a city."""
    return {"city": city, "units": units}


def get_forecast(city, days=3):
    """Multi-day forecast."""
    return []
"#;

#[test_log::test(tokio::test)]
async fn test_initial_scan_registers_tools() {
    let harness = TestAflow::new().await;
    harness.write_source("api_tools/weather_api.py", WEATHER);
    harness.write_source("text.py", "def greet(name, title=None):\n    return name\n");

    let report = harness.aflow.rescan().await;
    assert_eq!(
        report.changes.added.iter().cloned().collect::<Vec<_>>(),
        vec!["api_tools/weather_api.py".to_string(), "text.py".to_string()]
    );
    assert_eq!(report.sync.created.len(), 3);
    assert!(report.sync.failures.is_empty());

    let weather = harness.aflow.get_tool("get_weather").await.unwrap();
    assert_eq!(weather.category, "api_tools.weather_api");
    assert_eq!(weather.description, "Current weather for a city.");
    assert_eq!(weather.source_path.as_deref(), Some("api_tools/weather_api.py"));
    let params: Vec<(&str, bool)> = weather
        .parameters
        .iter()
        .map(|p| (p.name.as_str(), p.required))
        .collect();
    assert_eq!(params, vec![("city", true), ("units", false)]);
    assert_eq!(harness.aflow.get_tool("greet").await.unwrap().category, "text");
}

#[tokio::test]
async fn test_second_rescan_is_a_no_op() {
    let harness = TestAflow::new().await;
    harness.write_source("api_tools/weather_api.py", WEATHER);
    let first = harness.aflow.rescan().await;
    let second = harness.aflow.rescan().await;

    assert!(second.changes.is_empty());
    assert!(!second.sync.changed());
    assert_eq!(first.root_hash, second.root_hash);
}

#[tokio::test]
async fn test_rename_is_remove_plus_add() {
    let harness = TestAflow::new().await;
    harness.write_source("api_tools/weather_api.py", WEATHER);
    harness.aflow.rescan().await;

    harness.write_source(
        "api_tools/weather_api.py",
        &WEATHER.replace("get_forecast", "get_outlook"),
    );
    let report = harness.aflow.rescan().await;

    assert!(report.changes.modified.contains("api_tools/weather_api.py"));
    let detail = report
        .changes
        .functions_of("api_tools/weather_api.py")
        .unwrap();
    assert!(detail.added.contains("get_outlook"));
    assert!(detail.removed.contains("get_forecast"));
    assert!(detail.modified.is_empty());

    assert_eq!(report.sync.created, vec!["get_outlook".to_string()]);
    assert_eq!(report.sync.deleted, vec!["get_forecast".to_string()]);
    assert!(harness.aflow.get_tool("get_forecast").await.unwrap_err().is_not_found());
    assert!(harness.aflow.get_tool("get_weather").await.is_ok());
}

#[tokio::test]
async fn test_renamed_file_moves_tool() {
    let harness = TestAflow::new().await;
    harness.write_source("tools.py", "def run(job):\n    return job\n");
    harness.aflow.rescan().await;

    std::fs::rename(harness.root().join("tools.py"), harness.root().join("utils.py")).unwrap();
    let report = harness.aflow.rescan().await;

    assert!(report.changes.added.contains("utils.py"));
    assert!(report.changes.removed.contains("tools.py"));
    assert_eq!(report.sync.updated, vec!["run".to_string()]);
    assert!(report.sync.deleted.is_empty());
    let tool = harness.aflow.get_tool("run").await.unwrap();
    assert_eq!(tool.category, "utils");
    assert_eq!(tool.source_path.as_deref(), Some("utils.py"));
}

#[tokio::test]
async fn test_body_edit_updates_only_that_tool() {
    let harness = TestAflow::new().await;
    harness.write_source("api_tools/weather_api.py", WEATHER);
    harness.aflow.rescan().await;
    let before = harness.aflow.get_tool("get_weather").await.unwrap();

    harness.write_source(
        "api_tools/weather_api.py",
        &WEATHER.replace("return []", "return [city] * days"),
    );
    let report = harness.aflow.rescan().await;

    assert_eq!(report.sync.updated, vec!["get_forecast".to_string()]);
    assert!(report.sync.created.is_empty());
    let after = harness.aflow.get_tool("get_weather").await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_removed_file_keeps_tool_in_use() {
    let harness = TestAflow::new().await;
    harness.write_source("api_tools/weather_api.py", WEATHER);
    harness.aflow.rescan().await;
    harness
        .aflow
        .create_task(TaskDraft::new("report").tools(["get_weather"]).inputs(["city"]))
        .await
        .unwrap();

    let err = harness.aflow.delete_tool("get_weather").await.unwrap_err();
    match err {
        AflowError::InUse {
            kind, dependents, ..
        } => {
            assert_eq!(kind, RecordKind::Tool);
            assert_eq!(dependents, vec!["report".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    harness.remove_source("api_tools/weather_api.py");
    let report = harness.aflow.rescan().await;
    assert!(report.changes.removed.contains("api_tools/weather_api.py"));
    assert_eq!(report.sync.retained, vec!["get_weather".to_string()]);
    assert_eq!(report.sync.deleted, vec!["get_forecast".to_string()]);
    assert!(harness.aflow.get_tool("get_weather").await.is_ok());
}

#[tokio::test]
async fn test_rescan_invalidates_loaded_module() {
    let harness = TestAflow::new().await;
    harness.write_source("math.py", "def double(n):\n    return n * 2\n");
    harness.aflow.rescan().await;
    harness
        .aflow
        .create_task(TaskDraft::new("D").tools(["double"]))
        .await
        .unwrap();
    harness
        .aflow
        .execute_task("D", ExecutionContext::from_json(json!({"n": 1})))
        .await
        .unwrap();
    assert_eq!(harness.aflow.modules().loaded().await, vec!["math".to_string()]);

    harness.write_source("math.py", "def double(n):\n    return n + n\n");
    let report = harness.aflow.rescan().await;
    assert_eq!(report.invalidated, vec!["math".to_string()]);
    assert!(harness.aflow.modules().loaded().await.is_empty());
}

#[tokio::test]
async fn test_conflicting_bare_names_first_path_wins() {
    let harness = TestAflow::new().await;
    harness.write_source("a.py", "def shared():\n    pass\n");
    harness.write_source("b.py", "def shared():\n    return 1\n");

    let report = harness.aflow.rescan().await;
    assert_eq!(report.sync.created, vec!["shared".to_string()]);
    assert_eq!(report.sync.conflicts.len(), 1);
    assert_eq!(report.sync.conflicts[0].owner, "a.py");
    assert_eq!(report.sync.conflicts[0].skipped, "b.py");
    assert_eq!(
        harness.aflow.get_tool("shared").await.unwrap().category,
        "a"
    );
}

#[tokio::test]
async fn test_qualified_naming_keeps_both() {
    let harness = TestAflow::with_config(|b| b.naming("qualified")).await;
    harness.write_source("a.py", "def shared():\n    pass\n");
    harness.write_source("b.py", "def shared():\n    return 1\n");

    let report = harness.aflow.rescan().await;
    assert!(report.sync.conflicts.is_empty());
    let names: Vec<String> = harness
        .aflow
        .list_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["a.shared".to_string(), "b.shared".to_string()]);
}

#[tokio::test]
async fn test_rust_sources() {
    let harness = TestAflow::with_config(|b| b.extension("rs")).await;
    harness.write_source(
        "net/mod.rs",
        "/// Fetch a URL.\npub fn fetch(url: String, timeout: Option<u64>) -> String { url }\nfn helper() {}\n",
    );
    harness.write_source("ignored.py", "def nope():\n    pass\n");

    let report = harness.aflow.rescan().await;
    assert_eq!(report.sync.created, vec!["fetch".to_string()]);
    let fetch = harness.aflow.get_tool("fetch").await.unwrap();
    assert_eq!(fetch.category, "net");
    assert_eq!(fetch.description, "Fetch a URL.");
    assert_eq!(fetch.parameters.len(), 2);
    assert!(!fetch.parameters[1].required);
}

#[tokio::test]
async fn test_search_tools_reports_users() {
    let harness = TestAflow::new().await;
    harness.write_source("api_tools/weather_api.py", WEATHER);
    harness.write_source(
        "finance.py",
        "def convert_currency(amount, rate):\n    \"\"\"Convert money between currencies.\"\"\"\n    return amount * rate\n",
    );
    harness.aflow.rescan().await;
    harness
        .aflow
        .create_task(TaskDraft::new("morning").tools(["get_weather", "get_forecast"]))
        .await
        .unwrap();

    let hits = harness.aflow.search_tools("weather city", 2).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].record.name(), "get_weather");
    assert_eq!(hits[0].referenced_by, vec!["morning".to_string()]);
    assert!(hits.iter().all(|h| h.record.kind() == RecordKind::Tool));

    let tasks = harness.aflow.search_tasks("morning", 5).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].referenced_by.is_empty());
}

#[tokio::test]
async fn test_snapshot_state_survives_reopen() {
    let harness = TestAflow::new().await;
    harness.write_source("math.py", "def double(n):\n    return n * 2\n");
    harness.aflow.rescan().await;
    let state = harness.data_dir().join("snapshot.json");
    assert!(state.exists());

    let saved = harness.aflow.snapshot().await.unwrap();
    let bytes = std::fs::read(&state).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["root"]["hash"], json!(saved.hash));
}

#[tokio::test]
async fn test_watcher_picks_up_new_file() {
    aflow_test_utils::init_test_tracing();
    let harness = TestAflow::with_config(|b| b.debounce_ms(50)).await;
    harness.aflow.rescan().await;
    let handle = harness.aflow.watch().unwrap();

    harness.write_source("late.py", "def arrived():\n    pass\n");
    let mut found = false;
    for _ in 0..100 {
        if harness.aflow.get_tool("arrived").await.is_ok() {
            found = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert!(found, "watcher never registered the new tool");

    harness.aflow.shutdown();
    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_registry_and_snapshot_survive_reopen() {
    let sources = tempfile::TempDir::new().unwrap();
    let data = tempfile::TempDir::new().unwrap();
    std::fs::write(
        sources.path().join("math.py"),
        "def double(n):\n    return n * 2\n",
    )
    .unwrap();
    let config = TestConfigBuilder::new()
        .scan_root(sources.path())
        .store_path(&data.path().join("graph.json"))
        .state_path(&data.path().join("snapshot.json"))
        .log_level("debug")
        .build();

    {
        let aflow = Aflow::open(config.clone(), Arc::new(sample_loader()))
            .await
            .unwrap();
        aflow.rescan().await;
        aflow
            .create_task(TaskDraft::new("D").tools(["double"]).outputs(["n"]))
            .await
            .unwrap();
    }

    std::fs::write(
        sources.path().join("math.py"),
        "def double(n):\n    return n * 2\n\n\ndef halve(n):\n    return n / 2\n",
    )
    .unwrap();

    let aflow = Aflow::open(config, Arc::new(sample_loader()))
        .await
        .unwrap();
    let report = aflow.rescan().await;
    assert_eq!(report.changes.modified.len(), 1);
    assert!(report.changes.added.is_empty());
    assert_eq!(report.sync.created, vec!["halve".to_string()]);
    assert_eq!(aflow.get_task("D").await.unwrap().tools.len(), 1);

    let outcome = aflow
        .execute_task("D", ExecutionContext::from_json(json!({"n": 5})))
        .await
        .unwrap();
    assert_eq!(outcome.outputs.to_json(), json!({"n": 10}));
}
