//! Integration tests for configuration management
//!
//! Loading from disk, validation and path processing.

use luna_engine::config::Config;
use sdk::EngineError;
use tempfile::TempDir;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let workspace = dir.path().join("workspace");
    let data_dir = dir.path().join("data");
    let contents = format!(
        "[core]\nworkspace = '{}'\ndata_dir = '{}'\nlog_level = \"debug\"\n\n{}",
        workspace.display(),
        data_dir.display(),
        body
    );
    let path = dir.path().join("config.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_load_creates_workspace_and_data_dir() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");

    let config = Config::load_from_path(&path).unwrap();

    assert!(config.core.workspace.is_dir());
    assert!(config.core.data_dir.is_dir());
    assert_eq!(config.core.log_level, "debug");
    assert_eq!(config.database_path(), config.core.data_dir.join("luna.db"));
}

#[test]
fn test_full_config_parsing() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[llm]
base_url = "http://localhost:8080/v1"
model = "local-model"
api_key_env = "LOCAL_KEY"
timeout_secs = 30
temperature = 0.0

[agent]
max_iterations = 6
max_repair_attempts = 2
stagnation_threshold = 2
confirmation_timeout_secs = 0
completion_markers = ["DONE"]
max_context_tokens = 2048

[risk]
medium_requires_confirmation = true

[execution]
command_timeout_secs = 10
launch_verify_attempts = 3
launch_verify_backoff_ms = 100
probe_timeout_ms = 500
kill_verify_attempts = 2
script_interpreter = "python"
"#,
    );

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(config.llm.base_url, "http://localhost:8080/v1");
    assert_eq!(config.llm.api_key_env, "LOCAL_KEY");
    assert_eq!(config.agent.max_iterations, 6);
    assert_eq!(config.agent.completion_markers, vec!["DONE".to_string()]);
    assert_eq!(config.agent.confirmation_timeout_secs, 0);
    assert!(config.risk.medium_requires_confirmation);
    assert!(!config.risk.rules.is_empty());
    assert_eq!(config.execution.command_timeout_secs, 10);
    assert_eq!(config.execution.script_interpreter, "python");
}

#[test]
fn test_invalid_log_level_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[core]\nlog_level = \"loud\"\n").unwrap();

    let err = Config::load_from_path(&path).unwrap_err();
    assert!(matches!(err, EngineError::Config(ref m) if m.contains("Invalid log level")));
}

#[test]
fn test_zero_limits_rejected() {
    for body in [
        "[agent]\nmax_iterations = 0\n",
        "[agent]\nmax_repair_attempts = 0\n",
        "[agent]\nstagnation_threshold = 0\n",
    ] {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, body);
        assert!(Config::load_from_path(&path).is_err(), "{}", body);
    }
}

#[test]
fn test_bad_risk_rule_rejected_at_load() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[[risk.rules]]
name = "broken"
category = "system"
pattern = "(unclosed"
weight = 10
"#,
    );

    let err = Config::load_from_path(&path).unwrap_err();
    assert!(err.to_string().contains("broken"));
}

#[test]
fn test_unordered_thresholds_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[risk.thresholds]\nmedium = 60\nhigh = 50\n");
    assert!(Config::load_from_path(&path).is_err());
}

#[test]
fn test_missing_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let err = Config::load_from_path(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn test_malformed_toml_is_config_error() {
    let err = Config::from_toml_str("[agent\nmax_iterations = ").unwrap_err();
    assert!(err.to_string().contains("Failed to parse config"));
}

#[test]
fn test_written_config_reloads() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[agent]\nmax_iterations = 7\n");
    let config = Config::load_from_path(&path).unwrap();

    let copy = dir.path().join("copy.toml");
    std::fs::write(&copy, config.to_toml().unwrap()).unwrap();
    let reloaded = Config::load_from_path(&copy).unwrap();

    assert_eq!(reloaded.agent.max_iterations, 7);
    assert_eq!(reloaded.core.workspace, config.core.workspace);
    assert_eq!(reloaded.risk.rules, config.risk.rules);
}
