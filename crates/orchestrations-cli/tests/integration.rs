#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn orchestrations(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("orchestrations").unwrap();
    cmd.current_dir(dir.path())
        .env("ORCHESTRATIONS_ROOT", dir.path());
    cmd
}

fn init_project(dir: &TempDir) {
    orchestrations(dir).arg("init").assert().success();
}

fn synced_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    orchestrations(&dir).arg("sync").assert().success();
    dir
}

fn json_output(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.output().unwrap();
    assert!(output.status.success(), "command failed: {output:?}");
    serde_json::from_slice(&output.stdout).unwrap()
}

// ---------------------------------------------------------------------------
// orchestrations init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config() {
    let dir = TempDir::new().unwrap();
    orchestrations(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("created: .orchestrations/config.yaml"));

    assert!(dir.path().join(".orchestrations").is_dir());
    let config = std::fs::read_to_string(dir.path().join(".orchestrations/config.yaml")).unwrap();
    assert!(config.contains("silent_mode: false"));
    assert!(config.contains("port: 3142"));
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    orchestrations(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists:"));
}

#[test]
fn commands_before_init_fail() {
    let dir = TempDir::new().unwrap();
    orchestrations(&dir)
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

// ---------------------------------------------------------------------------
// orchestrations sync
// ---------------------------------------------------------------------------

#[test]
fn sync_inserts_then_reports_unchanged() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);

    orchestrations(&dir)
        .arg("sync")
        .assert()
        .success()
        .stdout(predicate::str::contains("inserted   Brs_045:1"));

    let report = json_output(orchestrations(&dir).args(["sync", "--json"]));
    assert!(report["inserted"].as_array().unwrap().is_empty());
    assert_eq!(report["unchanged"].as_array().unwrap().len(), 4);
    assert!(report["rejected"].as_array().unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// orchestrations description
// ---------------------------------------------------------------------------

#[test]
fn description_list_shows_catalog() {
    let dir = synced_project();
    orchestrations(&dir)
        .args(["description", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Brs_045:1"))
        .stdout(predicate::str::contains("0 2 * * 1-5"));

    let list = json_output(orchestrations(&dir).args(["description", "list", "--json"]));
    assert_eq!(list.as_array().unwrap().len(), 4);
}

#[test]
fn description_show_unknown_fails() {
    let dir = synced_project();
    orchestrations(&dir)
        .args(["description", "show", "Brs_999:1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

// ---------------------------------------------------------------------------
// orchestrations schedule / instance
// ---------------------------------------------------------------------------

#[test]
fn schedule_tick_runs_against_synced_catalog() {
    let dir = synced_project();
    let result = json_output(orchestrations(&dir).args(["schedule", "tick", "--json"]));
    assert!(result["created"].is_array());
}

#[test]
fn instance_list_is_empty_after_sync() {
    let dir = synced_project();
    orchestrations(&dir)
        .args(["instance", "list", "--orchestration", "Brs_026:1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No instances."));
}

#[test]
fn instance_list_unknown_orchestration_fails() {
    let dir = synced_project();
    orchestrations(&dir)
        .args(["instance", "list", "--orchestration", "Brs_999:1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("description not found"));
}

#[test]
fn instance_cancel_unknown_fails() {
    let dir = synced_project();
    orchestrations(&dir)
        .args([
            "instance",
            "cancel",
            "4b0f4c1e-8a51-4a3c-9d7e-2f1a7b6c5d4e",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("instance not found"));
}

#[test]
fn instance_terminate_rejects_unknown_outcome() {
    let dir = synced_project();
    orchestrations(&dir)
        .args([
            "instance",
            "terminate",
            "4b0f4c1e-8a51-4a3c-9d7e-2f1a7b6c5d4e",
            "--outcome",
            "exploded",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid termination state: exploded"));
}

#[test]
fn instance_terminate_unknown_instance_fails() {
    let dir = synced_project();
    orchestrations(&dir)
        .args([
            "instance",
            "terminate",
            "4b0f4c1e-8a51-4a3c-9d7e-2f1a7b6c5d4e",
            "--outcome",
            "succeeded",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("instance not found"));
}
