//! Config Validation Tests
//!
//! Typo detection for unknown keys and structural validation of
//! `harvester.toml`, independent of the rest of the pipeline.

use log_harvester::config::validation::{known_config_keys, suggest_correction, validate_unknown_keys};
use log_harvester::config::{ConfigError, HarvestConfig};
use log_harvester::types::{Backend, Credentials, SuicideCategory};
use std::path::PathBuf;

fn example_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("harvester.example.toml")
}

fn validation_errors(toml_str: &str) -> Vec<String> {
    match HarvestConfig::from_toml_str(toml_str) {
        Err(ConfigError::Validation(errors)) => errors,
        other => panic!("expected validation error, got {other:?}"),
    }
}

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_interval_warns_with_suggestion() {
    let toml_str = r#"
[harvest]
csv_intervall_secs = 90
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("csv_intervall_secs"));
    assert_eq!(warnings[0].suggestion.as_deref(), Some("harvest.csv_interval_secs"));
}

#[test]
fn typo_inside_server_table_warns() {
    let toml_str = r#"
[[servers]]
server_id = "1"
host = "h"
usrename = "x"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field, "servers.usrename");
    assert_eq!(warnings[0].suggestion.as_deref(), Some("servers.username"));
}

#[test]
fn unrelated_key_has_no_suggestion() {
    let warnings = validate_unknown_keys("[completely_unrelated]\nzzz = 1\n");
    assert!(!warnings.is_empty());
    assert!(warnings.iter().all(|w| w.suggestion.is_none()));
}

#[test]
fn example_file_has_no_unknown_keys() {
    let raw = std::fs::read_to_string(example_path()).unwrap();
    let warnings = validate_unknown_keys(&raw);
    assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
}

#[test]
fn every_known_key_suggests_itself() {
    let known = known_config_keys();
    for key in &known {
        assert_eq!(suggest_correction(key, &known).as_deref(), Some(*key));
    }
}

// ============================================================================
// Loading and Structural Validation
// ============================================================================

#[test]
fn example_file_loads_and_validates() {
    let config = HarvestConfig::load_from_file(&example_path()).unwrap();
    assert_eq!(config.servers.len(), 2);

    let sftp = config.server("7020").unwrap();
    assert_eq!(sftp.backend, Backend::Sftp);
    assert_eq!(sftp.bare_host(), "203.0.113.10");
    assert_eq!(sftp.effective_port(), 8822);
    assert!(matches!(sftp.credentials, Credentials::KeyFile { .. }));

    let local = config.server("7021").unwrap();
    assert_eq!(local.backend, Backend::Local);
    assert_eq!(local.base_path_hint.as_deref(), Some("/srv/mirror/7021"));

    assert_eq!(config.suicide_categories[0].category, SuicideCategory::Menu);
    assert_eq!(config.game_events.len(), 6);
}

#[test]
fn empty_file_is_all_defaults() {
    let config = HarvestConfig::from_toml_str("").unwrap();
    assert_eq!(config.harvest.csv_interval_secs, 60);
    assert_eq!(config.harvest.log_interval_secs, 30);
    assert_eq!(config.harvest.cycle_ceiling_secs, 45);
    assert_eq!(config.transport.max_consecutive_timeouts, 3);
    assert_eq!(config.reader.fallback_line_estimate, 600);
    assert_eq!(config.rivalry.min_kills, 3);
    assert!(config.servers.is_empty());
}

#[test]
fn zero_intervals_are_rejected() {
    let errors = validation_errors("[harvest]\ncsv_interval_secs = 0\nlog_interval_secs = 0\n");
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().any(|e| e.contains("csv_interval_secs")));
}

#[test]
fn duplicate_server_ids_are_rejected() {
    let errors = validation_errors(
        r#"
[[servers]]
server_id = "7020"
host = "a"

[[servers]]
server_id = "7020"
host = "b"
"#,
    );
    assert!(errors.iter().any(|e| e.contains("duplicate server_id")));
}

#[test]
fn invalid_game_event_regex_is_rejected() {
    let errors = validation_errors(
        r#"
[[game_events]]
kind = "broken"
pattern = "Mission (started"
"#,
    );
    assert!(errors.iter().any(|e| e.contains("game_events.broken")));
}

#[test]
fn backoff_max_below_initial_is_rejected() {
    let errors = validation_errors("[transport]\nbackoff_initial_secs = 30\nbackoff_max_secs = 5\n");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("backoff_max_secs"));
}

#[test]
fn password_is_redacted_in_debug_output() {
    let config = HarvestConfig::from_toml_str(
        r#"
[[servers]]
server_id = "1"
host = "h"
credentials = { type = "password", password = "hunter2" }
"#,
    )
    .unwrap();
    let debug = format!("{:?}", config.servers[0]);
    assert!(!debug.contains("hunter2"));
    assert!(debug.contains("redacted"));
}

#[test]
fn toml_round_trip_preserves_servers() {
    let config = HarvestConfig::load_from_file(&example_path()).unwrap();
    let again = HarvestConfig::from_toml_str(&config.to_toml().unwrap()).unwrap();
    assert_eq!(again.servers, config.servers);
    assert_eq!(again.game_events, config.game_events);
}
