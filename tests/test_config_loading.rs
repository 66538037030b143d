//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading from disk: format
//! detection by extension, defaults, and whole-file validation.

use agent_router::config::{ConfigError, RouterConfig, RoutingMode};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn write_config(dir: &TempDir, file_name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(file_name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_config_loads_successfully_from_valid_yaml() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "agents.yaml",
        r#"
agents:
  jira:
    host: jira.internal
    port: 2024
    name: Jira Assistant
    keywords: [ticket, sprint]
  gitlab:
    port: 2025
    name: GitLab Assistant
routing:
  default_agent: jira
"#,
    );

    let config = RouterConfig::load_from_file(&path).unwrap();

    assert_eq!(config.agents.len(), 2);
    let jira = &config.agents["jira"];
    assert_eq!(jira.key, "jira");
    assert_eq!(jira.host, "jira.internal");
    assert_eq!(jira.port, 2024);
    assert_eq!(jira.keywords, vec!["ticket", "sprint"]);
    assert_eq!(config.agents["gitlab"].host, "127.0.0.1");
    assert_eq!(config.routing.default_agent.as_deref(), Some("jira"));
    assert_eq!(config.routing.mode, RoutingMode::Keywords);
}

#[test]
fn test_config_loads_agent_list_from_json() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "agents.json",
        r#"{
  "agents": [
    {"key": "jira", "port": 2024, "name": "Jira Assistant", "assistant_id": "a1"}
  ],
  "routing": {"retries": {"max_attempts": 5}}
}"#,
    );

    let config = RouterConfig::load_from_file(&path).unwrap();

    assert_eq!(config.agents["jira"].assistant_id.as_deref(), Some("a1"));
    assert_eq!(config.routing.retries.max_attempts, 5);
}

#[test]
fn test_config_loads_from_toml_with_registry() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        "agents.toml",
        r#"
[agents.jira]
port = 2024
name = "Jira Assistant"
registry_enabled = true

[registry]
port = 2026
assistant_id = "registry-1"

[routing]
cache_ttl_secs = 0
"#,
    );

    let config = RouterConfig::load_from_file(&path).unwrap();

    assert!(config.agents["jira"].registry_enabled);
    let registry = config.registry.unwrap();
    assert_eq!(registry.port, 2026);
    assert_eq!(registry.assistant_id, "registry-1");
    assert_eq!(config.routing.cache_ttl_secs, 0);
}

#[test]
fn test_missing_file_is_not_found() {
    let dir = TempDir::new().unwrap();
    let result = RouterConfig::load_from_file(&dir.path().join("missing.yaml"));

    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[test]
fn test_unknown_extension_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "agents.ini", "agents = nothing");

    let result = RouterConfig::load_from_file(&path);

    assert!(matches!(result, Err(ConfigError::UnsupportedFormat(ext)) if ext == "ini"));
}

#[test]
fn test_malformed_yaml_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "agents.yaml", "agents: [unterminated");

    assert!(matches!(
        RouterConfig::load_from_file(&path),
        Err(ConfigError::YamlParse(_))
    ));
}

#[test]
fn test_validation_rejects_inconsistent_files() {
    let dir = TempDir::new().unwrap();
    let cases = [
        ("empty.yaml", "agents: {}\n"),
        (
            "bad_default.yaml",
            "agents:\n  jira:\n    port: 2024\n    name: Jira\nrouting:\n  default_agent: gitlab\n",
        ),
        (
            "no_registry.yaml",
            "agents:\n  jira:\n    port: 2024\n    name: Jira\n    registry_enabled: true\n",
        ),
        (
            "zero_attempts.yaml",
            "agents:\n  jira:\n    port: 2024\n    name: Jira\nrouting:\n  retries:\n    max_attempts: 0\n",
        ),
        ("bad_key.yaml", "agents:\n  \"jira agent\":\n    port: 2024\n    name: Jira\n"),
    ];

    for (file_name, content) in cases {
        let path = write_config(&dir, file_name, content);
        let result = RouterConfig::load_from_file(&path);
        assert!(
            matches!(
                result,
                Err(ConfigError::InvalidConfig(_)) | Err(ConfigError::InvalidAgentKey(_))
            ),
            "{file_name} should fail validation, got {result:?}"
        );
    }
}
