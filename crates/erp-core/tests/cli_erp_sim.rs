//! CLI tests for the erp-sim binary.
//!
//! Each run gets its own config file so ambient ERP_CONFIG or XDG configs
//! cannot leak in.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn erp_sim(config: &str) -> (Command, TempDir) {
    let tmp = TempDir::new().expect("tempdir");
    let path: PathBuf = tmp.path().join("erp.json");
    fs::write(&path, config).expect("write config");

    let mut cmd = Command::cargo_bin("erp-sim").expect("erp-sim binary should exist");
    cmd.env_remove("ERP_LOG")
        .env_remove("RUST_LOG")
        .env_remove("ERP_LOG_FORMAT")
        .arg("--config")
        .arg(&path)
        .arg("--fast");
    (cmd, tmp)
}

fn report(stdout: &[u8]) -> Value {
    serde_json::from_slice(stdout).expect("stdout should be a JSON report")
}

#[test]
fn clean_run_exits_zero() {
    let (mut cmd, _tmp) = erp_sim("{}");
    let out = cmd
        .args(["--ports", "2", "--units", "3", "--compact"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let report = report(&out);
    assert_eq!(report["settled"], Value::Bool(true));
    assert_eq!(report["failed_targets"].as_array().map(Vec::len), Some(0));
    assert_eq!(report["adapter"], "adapter0");
    // two remote ports plus the nameserver
    let ports = report["snapshot"]["ports"].as_array().expect("ports");
    assert_eq!(ports.len(), 3);
    assert!(report["events"].as_array().is_some_and(|e| !e.is_empty()));
}

#[test]
fn invalid_wwpn_reports_failed_target() {
    let (mut cmd, _tmp) = erp_sim("{}");
    let out = cmd
        .args(["--ports", "2", "--units", "1", "--invalid-wwpn", "1"])
        .assert()
        .code(1)
        .get_output()
        .stdout
        .clone();

    let report = report(&out);
    assert_eq!(report["settled"], Value::Bool(true));
    let failed = report["failed_targets"].as_array().expect("failed targets");
    assert!(failed.iter().any(|t| t["kind"] == "port"));
}

#[test]
fn transient_faults_still_recover() {
    let (mut cmd, _tmp) = erp_sim("{}");
    cmd.args([
        "--fail-unit-opens",
        "1",
        "--fail-port-opens",
        "1",
        "--timeout-lookups",
        "1",
        "--nomem",
        "1",
        "--host-con-init",
        "2",
    ])
    .assert()
    .success();
}

#[test]
fn invalid_config_exits_config_error() {
    let (mut cmd, _tmp) = erp_sim(r#"{"max_retries": 0}"#);
    cmd.assert()
        .code(11)
        .stderr(predicate::str::contains("max_retries"));
}

#[test]
fn malformed_config_exits_config_error() {
    let (mut cmd, _tmp) = erp_sim("{ not json");
    cmd.assert().code(11);
}

#[test]
fn jsonl_logs_summary_line() {
    let (mut cmd, _tmp) = erp_sim("{}");
    cmd.args(["--log-format", "jsonl", "--ports", "1"])
        .assert()
        .success()
        .stderr(predicate::str::contains("sim.finished"));
}

#[test]
fn unknown_flag_fails() {
    let (mut cmd, _tmp) = erp_sim("{}");
    cmd.arg("--nonexistent-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn help_lists_fault_flags() {
    Command::cargo_bin("erp-sim")
        .expect("erp-sim binary should exist")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--fail-unit-opens"))
        .stdout(predicate::str::contains("--fail-port-opens"))
        .stdout(predicate::str::contains("--invalid-wwpn"));
}
