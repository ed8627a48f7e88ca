//! ---
//! psoak_section: "01-core-functionality"
//! psoak_subsection: "tests"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Configuration loading from disk."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::fs;
use std::time::Duration;

use psoak_common::HarnessConfig;
use tempfile::tempdir;

const SAMPLE: &str = r#"
[controller]
base_url = "http://127.0.0.1:1234"
node_restart_command = "neon_local pageserver restart --id {node_id}"
allowed_log_patterns = [".*Many shards are waiting to reconcile"]

[scenario]
resource_count = 200
api_concurrency = 8
mixed_ops_multiplier = 4
seed = 99

[lifecycle]
drain_poll = { max_attempts = 10, backoff = 0.5 }

[checks]
reject_double_attachment = false
"#;

#[test]
fn loads_first_existing_candidate() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.toml");
    let present = dir.path().join("psoak.toml");
    fs::write(&present, SAMPLE).unwrap();

    let loaded = HarnessConfig::load_with_source(&[missing, present.clone()]).unwrap();
    assert_eq!(loaded.source, present);
    let config = loaded.config;
    assert_eq!(config.scenario.resource_count, 200);
    assert_eq!(config.scenario.seed, 99);
    assert_eq!(config.lifecycle.drain_poll.backoff, Duration::from_millis(500));
    assert!(!config.checks.reject_double_attachment);
    assert_eq!(config.controller.allowed_log_patterns.len(), 1);
}

#[test]
fn reports_every_inspected_candidate() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.toml");
    let b = dir.path().join("b.toml");
    let err = HarnessConfig::from_path(&a).unwrap_err();
    assert!(err.to_string().contains("unable to read config file"));

    if std::env::var(HarnessConfig::ENV_CONFIG_PATH).is_err() {
        let err = HarnessConfig::load(&[a, b]).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("a.toml"));
        assert!(message.contains("b.toml"));
    }
}

#[test]
fn rejects_invalid_base_url() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[controller]\nbase_url = \"not a url\"\n").unwrap();
    let err = HarnessConfig::from_path(&path).unwrap_err();
    assert!(format!("{err:#}").contains("base_url"));
}
