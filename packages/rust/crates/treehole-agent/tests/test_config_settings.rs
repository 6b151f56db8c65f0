#![allow(missing_docs)]

use std::fs;

use treehole_agent::{
    AgentConfig, MemoryConfig, RuntimeSettings, load_runtime_settings_from_paths,
};

#[test]
fn user_settings_override_system_defaults_per_field() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let system = temp.path().join("system.yaml");
    let user = temp.path().join("user.yaml");
    fs::write(
        &system,
        r"
llm:
  model: system-model
  completion_timeout_secs: 30
memory:
  threshold: 50
  retention_cap: 10
",
    )?;
    fs::write(
        &user,
        r"
llm:
  model: user-model
memory:
  threshold: 20
  strict_startup: true
",
    )?;

    let settings = load_runtime_settings_from_paths(&system, &user);
    assert_eq!(settings.llm.model.as_deref(), Some("user-model"));
    assert_eq!(settings.llm.completion_timeout_secs, Some(30));
    assert_eq!(settings.memory.threshold, Some(20));
    assert_eq!(settings.memory.retention_cap, Some(10));
    assert_eq!(settings.memory.strict_startup, Some(true));
    Ok(())
}

#[test]
fn missing_and_invalid_files_are_ignored() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let system = temp.path().join("system.yaml");
    let user = temp.path().join("does-not-exist.yaml");
    fs::write(&system, "memory: [not, a, mapping")?;

    let settings = load_runtime_settings_from_paths(&system, &user);
    assert!(settings.llm.model.is_none());
    assert!(settings.memory.threshold.is_none());
    Ok(())
}

#[test]
fn memory_config_maps_onto_consolidation_config() {
    let config = MemoryConfig {
        threshold: 12,
        manual_window: 7,
        retention_cap: 3,
        summary_timeout_secs: 9,
        min_retry_interval_ms: 250,
        state_path: None,
        strict_startup: false,
    };
    let consolidation = config.consolidation();
    assert_eq!(consolidation.threshold, 12);
    assert_eq!(consolidation.manual_window, 7);
    assert_eq!(consolidation.retention_cap, 3);
    assert_eq!(consolidation.summary_timeout.as_secs(), 9);
    assert_eq!(consolidation.min_retry_interval.as_millis(), 250);
}

#[test]
fn default_agent_config_uses_documented_limits() {
    let config = AgentConfig::default();
    assert_eq!(config.window_turns(), 50);
    assert_eq!(config.memory.threshold, 50);
    assert_eq!(config.memory.retention_cap, 10);
    assert!(config.memory.state_path.is_none());
    assert!(!config.has_api_key());
}

#[test]
fn resolved_config_always_has_a_state_path() {
    let mut settings = RuntimeSettings::default();
    settings.memory.state_path = Some("state/treehole-test-conversation.json".to_string());
    let config = AgentConfig::resolve(&settings);
    let path = config.memory.state_path.expect("state path");
    assert!(path.ends_with("state/treehole-test-conversation.json"));
    assert!(!config.summary_model.is_empty());
}

#[test]
fn window_follows_resolved_threshold() {
    let mut settings = RuntimeSettings::default();
    settings.memory.threshold = Some(80);
    let config = AgentConfig::resolve(&settings);
    assert_eq!(config.memory.threshold, 80);
    assert_eq!(config.window_turns(), 80);

    let mut config = AgentConfig::default();
    config.memory.threshold = 4;
    assert_eq!(config.window_turns(), 4);
}
