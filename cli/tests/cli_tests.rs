//! Integration tests for the roost CLI surface.
//!
//! These tests verify the CLI structure and argument parsing without
//! touching any backend.

#![allow(clippy::expect_used)]

use assert_cmd::Command;
use predicates::prelude::*;

fn roost() -> Command {
    Command::cargo_bin("roost").expect("roost binary should exist")
}

// --- Help and version tests ---

#[test]
fn no_args_shows_help_and_exits_two() {
    // clap with arg_required_else_help shows help on stderr and exits 2
    roost()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Provision and bootstrap remote agent hosts"));
}

#[test]
fn help_flag_shows_commands() {
    roost()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage:"))
        .stdout(predicate::str::contains("setup"))
        .stdout(predicate::str::contains("teardown"));
}

#[test]
fn version_command_shows_version() {
    roost()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("roost 0.1.0"));
}

#[test]
fn version_command_json_outputs_valid_json() {
    roost()
        .arg("version")
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#"{"version":"0.1.0"}"#));
}

#[test]
fn hidden_run_subcommand_is_not_listed() {
    roost()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("_run").not());
}

// --- Commands that need state or configuration ---

#[test]
fn setup_without_config_fails_with_guidance() {
    roost()
        .args(["setup", "my-agent"])
        .env("ROOST_CONFIG", "/nonexistent/roost-config.yaml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no configuration found"));
}

#[test]
fn status_for_unknown_host_fails() {
    let home = tempfile::tempdir().expect("tempdir");
    roost()
        .args(["status", "no-such-host"])
        .env("HOME", home.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no record"));
}

#[test]
fn setup_rejects_invalid_host_id() {
    roost()
        .args(["setup", "Bad_Id!"])
        .env("ROOST_CONFIG", "/nonexistent/roost-config.yaml")
        .assert()
        .failure();
}
