//! # Configuration Loading Tests
//!
//! Verifies the layered configuration: file values, programmatic task
//! defaults, and the fatal-on-missing encryption key rule. Environment
//! overrides are exercised indirectly through file substitution to keep
//! the tests parallel-safe.

use tgrag_daemon::config::{get_config, ConfigError};

fn write_config(dir: &tempfile::TempDir, body: &str) -> String {
    let path = dir.path().join("config.yml");
    std::fs::write(&path, body).unwrap();
    path.to_string_lossy().to_string()
}

const BASE_CONFIG: &str = r#"
encryption_key: "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY="
telegram_api_id: "12345"
telegram_api_hash: "deadbeef"
embedding:
  api_url: "http://localhost:8080/v1/embeddings"
  model_name: "bge-m3"
  dimension: 1024
providers:
  primary:
    provider: "gemini"
    api_key: "test-key"
    model_name: "gemini-2.0-flash"
  fallback:
    provider: "local"
    api_url: "http://localhost:1234/v1/chat/completions"
    model_name: "qwen"
"#;

#[test]
fn loads_minimal_config_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, BASE_CONFIG);

    let config = get_config(Some(&path)).unwrap();

    assert_eq!(config.parser_interval_minutes, 30);
    assert_eq!(config.embedding.dimension, 1024);
    assert!(config.cleanup.enabled);
    assert_eq!(config.cleanup.schedule_time(), (3, 0));
    assert_eq!(config.features.query_expansion_max_terms, 3);
}

#[test]
fn task_defaults_resolve_with_temperatures() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, BASE_CONFIG);
    let config = get_config(Some(&path)).unwrap();

    let tagging = config.resolved_task("tagging").unwrap();
    assert_eq!(tagging.provider, "primary");
    // A configured "fallback" provider becomes the default failover.
    assert_eq!(tagging.fallback_provider.as_deref(), Some("fallback"));
    assert!((tagging.temperature - 0.2).abs() < f32::EPSILON);

    let topics = config.resolved_task("digest_topics").unwrap();
    assert!((topics.temperature - 0.1).abs() < f32::EPSILON);

    let emotions = config.resolved_task("digest_emotions").unwrap();
    assert!((emotions.temperature - 0.3).abs() < f32::EPSILON);
}

#[test]
fn task_overrides_from_file_win() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!(
        "{BASE_CONFIG}\ntasks:\n  tagging:\n    provider: \"fallback\"\n    temperature: 0.7\n"
    );
    let path = write_config(&dir, &body);
    let config = get_config(Some(&path)).unwrap();

    let tagging = config.resolved_task("tagging").unwrap();
    assert_eq!(tagging.provider, "fallback");
    assert!((tagging.temperature - 0.7).abs() < f32::EPSILON);
}

#[test]
fn missing_encryption_key_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let body = BASE_CONFIG.replace(
        "encryption_key: \"MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=\"",
        "",
    );
    let path = write_config(&dir, &body);

    match get_config(Some(&path)) {
        Err(ConfigError::Fatal(msg)) => assert!(msg.contains("ENCRYPTION_KEY")),
        other => panic!("expected fatal error, got {other:?}"),
    }
}

#[test]
fn malformed_cleanup_schedule_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!("{BASE_CONFIG}\ncleanup:\n  schedule: \"25:99\"\n");
    let path = write_config(&dir, &body);
    let config = get_config(Some(&path)).unwrap();

    assert_eq!(config.cleanup.schedule_time(), (3, 0));
}

#[test]
fn unknown_task_provider_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let body = format!("{BASE_CONFIG}\ntasks:\n  tagging:\n    provider: \"ghost\"\n");
    let path = write_config(&dir, &body);
    let config = get_config(Some(&path)).unwrap();

    assert!(config.resolved_task("tagging").is_err());
}
