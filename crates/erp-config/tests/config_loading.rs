//! Config file loading and resolution against real files on disk.
//!
//! Covers:
//! - Loading partial and complete JSON configs
//! - Parse and semantic validation failures
//! - Resolution order (CLI > ERP_CONFIG > ERP_CONFIG_DIR > defaults)

use erp_config::resolve::{resolve_config, ConfigSource, CONFIG_FILENAME, ENV_CONFIG_DIR, ENV_CONFIG_PATH};
use erp_config::{ConfigError, ErpConfig, ValidationError};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tempfile::TempDir;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

struct EnvGuard {
    keys: Vec<String>,
    saved: Vec<Option<String>>,
}

impl EnvGuard {
    fn new(keys: &[&str]) -> Self {
        let saved = keys.iter().map(|key| env::var(key).ok()).collect();
        for key in keys {
            env::remove_var(key);
        }
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            saved,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, saved) in self.keys.iter().zip(&self.saved) {
            match saved {
                Some(val) => env::set_var(key, val),
                None => env::remove_var(key),
            }
        }
    }
}

fn with_env_lock<T>(f: impl FnOnce() -> T) -> T {
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    f()
}

fn write_config(path: &Path, json: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create config parent");
    }
    fs::write(path, json).expect("write config");
}

#[test]
fn test_partial_file_keeps_defaults() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join(CONFIG_FILENAME);
    write_config(&path, r#"{"max_retries": 5, "request_timeout_ms": 2000}"#);

    let config = ErpConfig::from_file(&path).expect("valid config");
    assert_eq!(config.max_retries, 5);
    assert_eq!(config.request_timeout_ms, 2000);
    assert_eq!(config.memwait_ms, ErpConfig::default().memwait_ms);
}

#[test]
fn test_full_file_round_trips() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join(CONFIG_FILENAME);
    let written = ErpConfig::fast();
    write_config(&path, &serde_json::to_string_pretty(&written).unwrap());

    assert_eq!(ErpConfig::from_file(&path).expect("valid config"), written);
}

#[test]
fn test_malformed_json_is_parse_error() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join(CONFIG_FILENAME);
    write_config(&path, r#"{"max_retries": "#);

    let err = ErpConfig::from_file(&path).expect_err("truncated json");
    match err {
        ConfigError::Parse { path: p, .. } => assert_eq!(p, path),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn test_semantic_problem_is_validation_error() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join(CONFIG_FILENAME);
    write_config(&path, r#"{"max_retries": 0}"#);

    let err = ErpConfig::from_file(&path).expect_err("zero retries");
    assert!(matches!(
        err,
        ConfigError::Validation(ValidationError::InvalidValue { ref field, .. }) if field == "max_retries"
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    let tmp = TempDir::new().expect("tempdir");
    let err = ErpConfig::from_file(&tmp.path().join("absent.json")).expect_err("no file");
    assert!(matches!(err, ConfigError::Io { .. }));
}

#[test]
fn test_resolve_cli_over_env() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(&[ENV_CONFIG_PATH, ENV_CONFIG_DIR]);
        let tmp = TempDir::new().expect("tempdir");
        let cli = tmp.path().join("cli").join(CONFIG_FILENAME);
        let from_env = tmp.path().join("env").join(CONFIG_FILENAME);
        write_config(&cli, "{}");
        write_config(&from_env, "{}");
        env::set_var(ENV_CONFIG_PATH, &from_env);

        let resolved = resolve_config(Some(&cli));
        assert_eq!(resolved.source, ConfigSource::CliArgument);
        assert_eq!(resolved.path.as_deref(), Some(cli.as_path()));

        // a CLI path that does not exist falls through
        let resolved = resolve_config(Some(&tmp.path().join("missing.json")));
        assert_eq!(resolved.source, ConfigSource::Environment);
        assert_eq!(resolved.path.as_deref(), Some(from_env.as_path()));
    });
}

#[test]
fn test_resolve_env_path_over_env_dir() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(&[ENV_CONFIG_PATH, ENV_CONFIG_DIR]);
        let tmp = TempDir::new().expect("tempdir");
        let file = tmp.path().join("explicit.json");
        let dir = tmp.path().join("dir");
        write_config(&file, "{}");
        write_config(&dir.join(CONFIG_FILENAME), "{}");

        env::set_var(ENV_CONFIG_DIR, &dir);
        let resolved = resolve_config(None);
        assert_eq!(resolved.source, ConfigSource::Environment);
        assert_eq!(resolved.path, Some(dir.join(CONFIG_FILENAME)));

        env::set_var(ENV_CONFIG_PATH, &file);
        let resolved = resolve_config(None);
        assert_eq!(resolved.path, Some(file.clone()));
    });
}

#[test]
fn test_load_reads_resolved_file() {
    with_env_lock(|| {
        let _guard = EnvGuard::new(&[ENV_CONFIG_PATH, ENV_CONFIG_DIR]);
        let tmp = TempDir::new().expect("tempdir");
        let file = tmp.path().join(CONFIG_FILENAME);
        write_config(&file, r#"{"status_read_primers": 4}"#);
        env::set_var(ENV_CONFIG_PATH, &file);

        let (config, resolved) = ErpConfig::load(None).expect("load");
        assert_eq!(config.status_read_primers, 4);
        assert_eq!(resolved.source, ConfigSource::Environment);
    });
}

#[test]
fn test_load_surfaces_bad_cli_file() {
    let tmp = TempDir::new().expect("tempdir");
    let file = tmp.path().join(CONFIG_FILENAME);
    write_config(&file, r#"{"schema_version": "0.1.0"}"#);

    let err = ErpConfig::load(Some(&file)).expect_err("old schema");
    assert!(matches!(
        err,
        ConfigError::Validation(ValidationError::VersionMismatch { .. })
    ));
}
