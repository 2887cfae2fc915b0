//! End-to-end runs of the epicflow binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

use super::{write_chain, write_epic};

/// Get a Command instance for the epicflow binary
#[allow(deprecated)]
fn epicflow_cmd(temp_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("epicflow").expect("Failed to find epicflow binary");
    cmd.current_dir(temp_dir.path()).env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_init_creates_layout() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    epicflow_cmd(&temp_dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));

    let base = temp_dir.path().join(".epicflow");
    assert!(base.join("config.toml").is_file());
    for dir in ["logs", "projects", "worktrees"] {
        assert!(base.join(dir).is_dir(), "missing {dir}");
    }

    epicflow_cmd(&temp_dir)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    epicflow_cmd(&temp_dir).args(["init", "--force"]).assert().success();
}

#[test]
fn test_plan_text_output() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    write_chain(temp_dir.path());

    epicflow_cmd(&temp_dir)
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 -> 2 -> 3"))
        .stdout(predicate::str::contains("Epic 3: Frontend [queued]"))
        .stdout(predicate::str::contains("  - Epic 2: API (⏳ Queued)"))
        .stdout(predicate::str::contains("launch: 1"));
}

#[test]
fn test_plan_json_uses_tracked_state() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    write_chain(temp_dir.path());

    epicflow_cmd(&temp_dir)
        .args(["track", "p-1", "shop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tracked 3 new Epic(s)"));

    epicflow_cmd(&temp_dir)
        .args(["update", "p-1", "1", "--status", "completed", "--progress", "100"])
        .assert()
        .success();

    let output = epicflow_cmd(&temp_dir)
        .args(["plan", "--project-id", "p-1", "--json"])
        .output()
        .expect("run plan");
    assert!(output.status.success());

    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(plan["batch"]["completed"], serde_json::json!(["1"]));
    assert_eq!(plan["batch"]["launch"], serde_json::json!(["2"]));
    assert_eq!(plan["batch"]["queued"][0]["epic_id"], "3");
    assert_eq!(plan["batch"]["queued"][0]["missing_dependencies"], serde_json::json!(["2"]));
}

#[test]
fn test_plan_reports_cycles() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    write_epic(temp_dir.path(), "1", "One", &["2"], "");
    write_epic(temp_dir.path(), "2", "Two", &["1"], "");

    epicflow_cmd(&temp_dir)
        .arg("plan")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("DA001"));
}

#[test]
fn test_stories_ready_list() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    write_chain(temp_dir.path());

    epicflow_cmd(&temp_dir)
        .args(["stories", "3", "--completed", "3.1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[x] 3.1 Layout"))
        .stdout(predicate::str::contains("ready: 3.2"));

    epicflow_cmd(&temp_dir)
        .args(["stories", "42"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Epic 42 not found"));
}

#[test]
fn test_status_and_update_errors() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    epicflow_cmd(&temp_dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("No tracked projects"));

    write_chain(temp_dir.path());
    epicflow_cmd(&temp_dir).args(["track", "p-1", "shop"]).assert().success();

    epicflow_cmd(&temp_dir)
        .args(["update", "p-1", "2", "--progress", "250"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Invalid update"));

    epicflow_cmd(&temp_dir)
        .args(["update", "p-1", "2", "--status", "running"])
        .assert()
        .failure();

    epicflow_cmd(&temp_dir)
        .args(["update", "p-1", "2"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("nothing to update"));

    epicflow_cmd(&temp_dir)
        .args(["update", "p-1", "2", "--status", "developing", "--progress", "30"])
        .assert()
        .success();

    epicflow_cmd(&temp_dir)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("shop (p-1)"))
        .stdout(predicate::str::contains("Epic 2: ⚙ Developing 30%"));
}

#[test]
fn test_graph_outputs_dot() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    write_chain(temp_dir.path());

    epicflow_cmd(&temp_dir)
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("digraph {"))
        .stdout(predicate::str::contains("2: API"));
}

#[test]
fn test_environment_overrides_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    write_epic(temp_dir.path(), "1", "One", &[], "");
    write_epic(temp_dir.path(), "2", "Two", &[], "");
    write_epic(temp_dir.path(), "3", "Three", &[], "");
    epicflow_cmd(&temp_dir).arg("init").assert().success();

    let output = epicflow_cmd(&temp_dir)
        .args(["plan", "--json"])
        .env("EPICFLOW__SUBAGENT__MAX_CONCURRENT", "1")
        .output()
        .expect("run plan");
    assert!(output.status.success());

    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(plan["batch"]["launch"], serde_json::json!(["1"]));
    assert_eq!(plan["batch"]["deferred"], serde_json::json!(["2", "3"]));
}

#[test]
fn test_track_writes_per_epic_logs() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    write_chain(temp_dir.path());
    epicflow_cmd(&temp_dir).arg("init").assert().success();

    epicflow_cmd(&temp_dir)
        .args(["track", "p-1", "shop"])
        .assert()
        .success();

    let epic_logs = temp_dir.path().join(".epicflow/projects/shop/epics");
    let mut names: Vec<String> = std::fs::read_dir(&epic_logs)
        .expect("epic log dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 3, "{names:?}");
    for (name, id) in names.iter().zip(["1", "2", "3"]) {
        assert!(name.starts_with(&format!("epic-{id}.")), "{name}");
        let contents = std::fs::read_to_string(epic_logs.join(name)).expect("read log");
        assert!(contents.contains("Epic tracked as queued"), "{contents}");
    }
}

#[test]
fn test_watch_reports_missing_docs_dir() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    epicflow_cmd(&temp_dir)
        .args(["watch", "--debounce-ms", "50"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Cannot watch"));
}
