//! Integration tests for the `xsense` CLI binary.
//!
//! These cover argument parsing, help output and configuration errors;
//! none of them reach the X-Sense cloud.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a command for the `xsense` binary with env isolation.
///
/// Clears all `XSENSE_*` variables and points config directories at an
/// empty temp dir so tests never touch the user's real configuration.
fn xsense_cmd(home: &tempfile::TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("xsense");
    cmd.env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env_remove("XSENSE_PROFILE")
        .env_remove("XSENSE_EMAIL")
        .env_remove("XSENSE_PASSWORD")
        .env_remove("XSENSE_OUTPUT")
        .env_remove("XSENSE_TIMEOUT")
        .env_remove("RUST_LOG");
    cmd
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let home = tempfile::tempdir().unwrap();
    let output = xsense_cmd(&home).output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_commands() {
    let home = tempfile::tempdir().unwrap();
    xsense_cmd(&home).arg("--help").assert().success().stdout(
        predicate::str::contains("X-Sense")
            .and(predicate::str::contains("houses"))
            .and(predicate::str::contains("devices"))
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("station-config")),
    );
}

#[test]
fn test_version_flag() {
    let home = tempfile::tempdir().unwrap();
    xsense_cmd(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("xsense"));
}

// ── Argument validation ─────────────────────────────────────────────

#[test]
fn test_unknown_output_format_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    xsense_cmd(&home)
        .args(["houses", "--output", "xml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("json-compact"));
}

#[test]
fn test_station_config_requires_settings() {
    let home = tempfile::tempdir().unwrap();
    xsense_cmd(&home)
        .args(["station-config", "ST1"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("KEY=VALUE"));
}

#[test]
fn test_station_config_rejects_malformed_setting() {
    let home = tempfile::tempdir().unwrap();
    xsense_cmd(&home)
        .env("XSENSE_EMAIL", "user@example.com")
        .env("XSENSE_PASSWORD", "hunter2")
        .args(["station-config", "ST1", "alarmVol"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("KEY=VALUE"));
}

// ── Configuration errors ────────────────────────────────────────────

#[test]
fn test_missing_credentials_exit_code() {
    let home = tempfile::tempdir().unwrap();
    xsense_cmd(&home)
        .arg("houses")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("No credentials"));
}

#[test]
fn test_unknown_profile_exit_code() {
    let home = tempfile::tempdir().unwrap();
    xsense_cmd(&home)
        .args(["--profile", "office", "devices"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("office"));
}
