//! Integration tests for tunnelcli's argument parsing and `--help` output.
//!
//! Mirrors the teacher's `nccli_integration_tests.rs` style: drive the real
//! compiled binary via `assert_cmd`, assert on stdout/stderr with
//! `predicates`. These tests only exercise argument parsing (`--help`,
//! missing subcommand) — anything that talks to a running daemon needs a
//! live `tunnelctld`, which is out of scope for a unit/integration run.

use assert_cmd::Command;
use predicates::prelude::*;

fn tunnelcli() -> Command {
    Command::cargo_bin("tunnelcli").unwrap()
}

#[test]
fn help_lists_every_subcommand() {
    tunnelcli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Control client for tunnelctld"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("set-server"))
        .stdout(predicate::str::contains("portforwarded"));
}

#[test]
fn missing_subcommand_is_a_usage_error() {
    tunnelcli()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn set_status_rejects_an_unknown_status_value() {
    tunnelcli()
        .arg("set-status")
        .arg("sideways")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn unreachable_daemon_reports_a_connection_error() {
    // No daemon listening on this port; the CLI should fail cleanly rather
    // than hang or panic.
    tunnelcli()
        .arg("--base-url")
        .arg("http://127.0.0.1:1")
        .arg("status")
        .assert()
        .failure();
}
