//! Integration tests for the wwanctl and wwanctld binaries
//!
//! Only paths that fail or exit before touching the modem or the network
//! are exercised here.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn wwanctl() -> Command {
    Command::cargo_bin("wwanctl").unwrap()
}

fn wwanctld() -> Command {
    Command::cargo_bin("wwanctld").unwrap()
}

fn write_config(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("wwanctl.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_help_command() {
    wwanctl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cellular modem connection manager"));
}

#[test]
fn test_version_command() {
    wwanctl()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_subcommand_help() {
    wwanctl()
        .args(["connect", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--apn"))
        .stdout(predicate::str::contains("--ip-type"));

    wwanctl()
        .args(["status", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--json"));

    wwanctl()
        .args(["monitor", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--host"))
        .stdout(predicate::str::contains("--duration"));
}

#[test]
fn test_missing_subcommand_fails() {
    wwanctl().assert().failure();
}

#[test]
fn test_invalid_ip_type_rejected() {
    wwanctl()
        .args(["connect", "--ip-type", "ipx"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ipx"));
}

#[test]
fn test_missing_config_file_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    wwanctl()
        .arg("--config")
        .arg(&path)
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_malformed_config_fails() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[interface\nname = ");
    wwanctl()
        .arg("--config")
        .arg(&path)
        .arg("status")
        .assert()
        .code(1);
}

#[test]
fn test_unsafe_interface_name_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");
    wwanctl()
        .arg("--config")
        .arg(&path)
        .args(["--interface", "wwan0;reboot", "status"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_invalid_apn_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");
    wwanctl()
        .arg("--config")
        .arg(&path)
        .args(["connect", "--apn", "bad apn'"])
        .assert()
        .code(1);
}

#[test]
fn test_monitor_zero_interval_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");
    wwanctl()
        .arg("--config")
        .arg(&path)
        .args(["monitor", "--interval", "0"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("interval"));
}

#[test]
fn test_daemon_help() {
    wwanctld()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cellular connection daemon"));
}

#[test]
fn test_daemon_rejects_zero_interval() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "");
    wwanctld()
        .arg("--config")
        .arg(&path)
        .arg("0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("check_interval_secs"));
}

#[test]
fn test_daemon_missing_config_fails() {
    let dir = TempDir::new().unwrap();
    wwanctld()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .assert()
        .failure();
}
