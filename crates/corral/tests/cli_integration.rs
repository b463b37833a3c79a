//! CLI integration tests for the Corral command-line interface.
//!
//! These tests verify help output, argument parsing and the commands that
//! work without a reachable control plane. Each test points
//! `CORRAL_CONFIG_DIR` at its own temporary directory.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

/// Get a command for the corral binary, isolated to `config_dir`.
fn corral(config_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("corral").unwrap();
    cmd.env("CORRAL_CONFIG_DIR", config_dir)
        .env_remove("CORRAL_SERVER_URL");
    cmd
}

fn write_tokens(config_dir: &Path, expires_at: &str) {
    let body = format!(
        r#"{{"access_token":"A1","refresh_token":"R1","expires_at":"{}"}}"#,
        expires_at
    );
    std::fs::write(config_dir.join("tokens.json"), body).unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_lists_subcommands() {
    let dir = tempfile::tempdir().unwrap();
    corral(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Corral"))
        .stdout(predicate::str::contains("auth"))
        .stdout(predicate::str::contains("get"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_displays() {
    let dir = tempfile::tempdir().unwrap();
    corral(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("corral"));
}

#[test]
fn test_auth_help_lists_actions() {
    let dir = tempfile::tempdir().unwrap();
    corral(dir.path())
        .args(["auth", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("login"))
        .stdout(predicate::str::contains("callback"))
        .stdout(predicate::str::contains("whoami"))
        .stdout(predicate::str::contains("refresh"))
        .stdout(predicate::str::contains("logout"));
}

#[test]
fn test_global_flags_accepted() {
    let dir = tempfile::tempdir().unwrap();
    corral(dir.path())
        .args([
            "--verbose",
            "--json",
            "--server",
            "http://localhost:9999",
            "--context",
            "prod",
            "--help",
        ])
        .assert()
        .success();
}

#[test]
fn test_callback_requires_code() {
    let dir = tempfile::tempdir().unwrap();
    corral(dir.path())
        .args(["auth", "callback"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("<CODE>"));
}

#[test]
fn test_unknown_subcommand_rejected() {
    let dir = tempfile::tempdir().unwrap();
    corral(dir.path()).arg("deploy").assert().failure();
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Commands
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_context_lifecycle() {
    let dir = tempfile::tempdir().unwrap();

    corral(dir.path())
        .args(["config", "get-contexts"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No contexts configured"));

    corral(dir.path())
        .args(["config", "set-context", "local", "--url", "http://localhost:8080"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Context \"local\" created."))
        .stdout(predicate::str::contains("set as current context"));

    corral(dir.path())
        .args([
            "config",
            "set-context",
            "prod",
            "--url",
            "https://corral.example.com",
            "--timeout",
            "60",
        ])
        .assert()
        .success();

    corral(dir.path())
        .args(["config", "use-context", "prod"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Switched to context \"prod\"."));

    corral(dir.path())
        .args(["config", "current-context"])
        .assert()
        .success()
        .stdout(predicate::str::diff("prod\n"));

    corral(dir.path())
        .args(["config", "delete-context", "prod"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No current context"));

    let saved = std::fs::read_to_string(dir.path().join("client.yaml")).unwrap();
    assert!(saved.contains("local"));
    assert!(!saved.contains("corral.example.com"));
}

#[test]
fn test_set_context_requires_url_when_new() {
    let dir = tempfile::tempdir().unwrap();
    corral(dir.path())
        .args(["config", "set-context", "local"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--url is required"));
}

#[test]
fn test_use_unknown_context_fails() {
    let dir = tempfile::tempdir().unwrap();
    corral(dir.path())
        .args(["config", "use-context", "staging"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("context 'staging' not found"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Commands (offline)
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_commands_need_a_server() {
    let dir = tempfile::tempdir().unwrap();
    corral(dir.path())
        .args(["get", "api/clusters"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no server configured"));
}

#[test]
fn test_status_when_signed_out() {
    let dir = tempfile::tempdir().unwrap();
    corral(dir.path())
        .args(["--server", "http://127.0.0.1:9", "auth", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not authenticated"));
}

#[test]
fn test_status_reads_stored_tokens() {
    let dir = tempfile::tempdir().unwrap();
    write_tokens(dir.path(), "2099-01-01T00:00:00Z");

    corral(dir.path())
        .args(["--json", "--server", "http://127.0.0.1:9", "auth", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""authenticated": true"#))
        .stdout(predicate::str::contains(r#""refreshable": true"#));
}

#[test]
fn test_status_reports_expired_session() {
    let dir = tempfile::tempdir().unwrap();
    write_tokens(dir.path(), "2001-01-01T00:00:00Z");

    corral(dir.path())
        .args(["--server", "http://127.0.0.1:9", "auth", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("expired"));
}

#[test]
fn test_whoami_without_session_suggests_login() {
    let dir = tempfile::tempdir().unwrap();
    corral(dir.path())
        .args(["--server", "http://127.0.0.1:9", "auth", "whoami"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("corral auth login"));
}

#[test]
fn test_callback_with_unreachable_server_keeps_store_empty() {
    let dir = tempfile::tempdir().unwrap();
    corral(dir.path())
        .args(["--server", "http://127.0.0.1:9", "auth", "callback", "abc123"])
        .assert()
        .failure();
    assert!(!dir.path().join("tokens.json").exists());
}
