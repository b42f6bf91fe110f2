//! Configuration and schema file loading.

use std::io::Write;

use spdash_core::config::env_vars;
use spdash_core::{BridgeConfig, ConfigError, ContractVersion, SpValue, StateSchema, ValidationError};

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn test_load_config_file_then_env() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
schema_path = "/etc/spdash/schema.toml"

[store]
host = "store.local"
key_pattern = "robot:*"

[store.backoff]
max_retries = 3
jitter = false

[sync]
staleness_window_secs = 10
heartbeat_key = "heartbeat"
contract = "envelope"

[server]
port = 9000
"#
    )
    .unwrap();

    let config = BridgeConfig::load_with(Some(file.path()), no_env).unwrap();
    assert_eq!(config.store.host, "store.local");
    assert_eq!(config.store.port, 6379);
    assert_eq!(config.store.key_pattern, "robot:*");
    assert_eq!(config.store.backoff.max_retries, Some(3));
    assert_eq!(config.sync.heartbeat_key.as_deref(), Some("heartbeat"));
    assert_eq!(config.sync.contract, ContractVersion::Envelope);
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.host, "0.0.0.0");

    let path = file.path().to_string_lossy().to_string();
    let config = BridgeConfig::load_with(None, |name| match name {
        n if n == env_vars::CONFIG => Some(path.clone()),
        n if n == env_vars::REDIS_HOST => Some("override".to_string()),
        _ => None,
    })
    .unwrap();
    assert_eq!(config.store.host, "override");
    assert_eq!(config.server.port, 9000);
}

#[test]
fn test_missing_config_file() {
    let err = BridgeConfig::load_with(Some(std::path::Path::new("/nonexistent/spdash.toml")), no_env).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("/nonexistent/spdash.toml"));
}

#[test]
fn test_load_schema_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schema.toml");
    std::fs::write(
        &path,
        r#"
version = 1
allow_undeclared = false

[variables.robot_mode]
type = "String"
allowed = ["idle", "running", "error"]

[variables.speed_scale]
type = "Float64"
min = 0.0
max = 1.0
"#,
    )
    .unwrap();

    let schema = StateSchema::load(&path).unwrap();
    assert!(schema
        .validate("robot_mode", &SpValue::string("running"), None)
        .is_ok());
    assert_eq!(
        schema.validate("gripper", &SpValue::bool(true), None),
        Err(ValidationError::Undeclared("gripper".into()))
    );
    assert!(matches!(
        schema.validate_input("speed_scale", "2", None),
        Err(ValidationError::OutOfRange { .. })
    ));
}
