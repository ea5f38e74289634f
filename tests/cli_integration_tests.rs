//! Binary-level CLI checks: argument validation, exit codes, and the
//! offline subcommands.

use assert_cmd::Command;
use predicates::prelude::*;

fn loadtrace() -> Command {
    let mut cmd = Command::cargo_bin("loadtrace").unwrap();
    // Isolate from any user configuration.
    cmd.env("LOADTRACE_CONFIG_PATH", "/nonexistent/loadtrace.toml");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    loadtrace()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("dispatch"))
        .stdout(predicate::str::contains("schedule"))
        .stdout(predicate::str::contains("work"))
        .stdout(predicate::str::contains("normalize"))
        .stdout(predicate::str::contains("export"));
}

#[test]
fn test_version_flag() {
    loadtrace()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_unknown_weigher_exits_two() {
    loadtrace()
        .args(["schedule", "--weigher", "bogus"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_missing_export_input_exits_two() {
    loadtrace()
        .args([
            "export",
            "--input",
            "/definitely/missing/traces",
            "--output",
            "/tmp/loadtrace-test-out",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Path not found"));
}

#[test]
fn test_dispatch_missing_inputs_exits_two() {
    loadtrace()
        .args([
            "dispatch",
            "--inputs",
            "/definitely/missing/inputs",
            "--outputs",
            "/tmp/loadtrace-test-out",
            "--nodes",
            "n1",
        ])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_config_get_default_value() {
    loadtrace()
        .args(["config", "get", "scheduler.weigher"])
        .assert()
        .success()
        .stdout(predicate::str::contains("first-fit"));
}

#[test]
fn test_config_get_unknown_key_exits_two() {
    loadtrace()
        .args(["config", "get", "no.such.key"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_config_list_renders_sections() {
    loadtrace()
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[broker]"))
        .stdout(predicate::str::contains("[scheduler]"))
        .stdout(predicate::str::contains("[worker]"));
}

#[test]
fn test_generate_completion_bash() {
    loadtrace()
        .args(["generate-completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("loadtrace"));
}

#[cfg(unix)]
#[test]
fn test_wrap_runs_child_and_writes_span() {
    let dir = tempfile::tempdir().unwrap();
    loadtrace()
        .current_dir(dir.path())
        .env("RUN_ID", "cli-wrap")
        .env("NODE_ID", "cli-node")
        .args(["wrap", "--", "true"])
        .assert()
        .success();
    let events = dir.path().join("logs/cli-wrap/events.true.jsonl");
    let content = std::fs::read_to_string(events).unwrap();
    assert_eq!(content.lines().count(), 1);
    assert!(content.contains("\"node\":\"cli-node\""));
}

#[cfg(unix)]
#[test]
fn test_wrap_propagates_child_failure() {
    let dir = tempfile::tempdir().unwrap();
    loadtrace()
        .current_dir(dir.path())
        .env("RUN_ID", "cli-wrap-fail")
        .args(["wrap", "--", "false"])
        .assert()
        .failure()
        .code(1);
}
