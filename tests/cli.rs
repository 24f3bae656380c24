// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! End-to-end tests of the pipeflow binary
#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn workspace(pipeline: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join(".pipeflow.yaml"), pipeline).unwrap();
    dir
}

fn pipeflow(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("pipeflow").unwrap();
    cmd.current_dir(dir.path())
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("PIPEFLOW_EVENT")
        .env_remove("PIPEFLOW_REF")
        .env_remove("PIPEFLOW_MAX_PARALLEL");
    cmd
}

const RELEASE: &str = r#"
version: "1"
name: release
stages:
  - name: checkout
    run: echo checked out
  - name: bump-version
    run: echo "::set-output name=version::1.2.3"
    depends_on: [checkout]
    outputs: [version]
  - name: build
    run: echo "building $VERSION" > built.txt
    inputs:
      VERSION: bump-version.version
  - name: publish
    run: touch published.txt
    depends_on: [build]
    concurrency_group: release-lock
"#;

#[test]
fn test_validate_accepts_good_pipeline() {
    let dir = workspace(RELEASE);
    pipeflow(&dir)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Pipeline is valid"));
}

#[test]
fn test_cycle_exits_with_configuration_error() {
    let dir = workspace(
        r#"
version: "1"
name: loop
stages:
  - name: a
    run: "true"
    depends_on: [b]
  - name: b
    run: "true"
    depends_on: [a]
"#,
    );

    pipeflow(&dir)
        .arg("run")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Cyclic dependency"));
}

#[test]
fn test_run_writes_report_with_outputs() {
    let dir = workspace(RELEASE);
    pipeflow(&dir)
        .args(["run", "--report", "report.json", "--no-progress"])
        .assert()
        .success()
        .stdout(predicate::str::contains("succeeded"));

    assert_eq!(
        fs::read_to_string(dir.path().join("built.txt")).unwrap().trim(),
        "building 1.2.3"
    );
    assert!(dir.path().join("published.txt").exists());

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("report.json")).unwrap())
            .unwrap();
    assert_eq!(report["status"], "succeeded");
    assert_eq!(report["trigger"]["event"], "push");
    let bump = report["stages"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["name"] == "bump-version")
        .unwrap();
    assert_eq!(bump["outputs"]["version"], "1.2.3");
}

#[test]
fn test_failed_stage_skips_dependents_and_exits_1() {
    let dir = workspace(&RELEASE.replace(
        r#"run: echo "::set-output name=version::1.2.3""#,
        "run: exit 4",
    ));

    pipeflow(&dir)
        .args(["run", "--no-progress"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("skipped: 'bump-version' did not succeed"));

    assert!(!dir.path().join("published.txt").exists());
}

#[test]
fn test_optional_failure_exits_3() {
    let dir = workspace(
        r#"
version: "1"
name: audit
stages:
  - name: audit
    run: exit 1
    allow_failure: true
  - name: package
    run: "true"
    depends_on: [audit]
"#,
    );

    pipeflow(&dir)
        .args(["run", "--no-progress"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("allowed to fail"));
}

#[test]
fn test_dry_run_executes_nothing() {
    let dir = workspace(RELEASE);
    pipeflow(&dir)
        .args(["run", "--dry-run", "--event", "push", "--ref", "refs/heads/main"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Plan for 'release'"))
        .stdout(predicate::str::contains("would run"));

    assert!(!dir.path().join("published.txt").exists());
    assert!(!dir.path().join("built.txt").exists());
}

#[test]
fn test_event_filter_skips_stage() {
    let dir = workspace(
        r#"
version: "1"
name: nightly
stages:
  - name: nightly
    run: touch ran.txt
    when:
      events: [schedule]
"#,
    );

    pipeflow(&dir)
        .args(["run", "--no-progress", "--event", "pull_request"])
        .assert()
        .success()
        .stdout(predicate::str::contains("event not selected"));

    assert!(!dir.path().join("ran.txt").exists());
}

#[test]
fn test_graph_mermaid() {
    let dir = workspace(RELEASE);
    pipeflow(&dir)
        .args(["graph", "--format", "mermaid"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("graph TD"))
        .stdout(predicate::str::contains("-->"));
}

#[test]
fn test_init_writes_valid_pipeline() {
    let dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("pipeflow").unwrap();
    cmd.current_dir(dir.path())
        .env("NO_COLOR", "1")
        .args(["init", "demo", "--template", "release"])
        .assert()
        .success();

    let written = fs::read_to_string(dir.path().join(".pipeflow.yaml")).unwrap();
    assert!(written.contains("name: \"demo\""));

    pipeflow(&dir).arg("validate").assert().success();

    // a second init refuses to overwrite
    pipeflow(&dir).arg("init").assert().code(2);
}
