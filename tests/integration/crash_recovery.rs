//! Reloading state after an interrupted run.

use std::fs;

use epicflow::state::{
    DataStore, EpicState, ExecutionStatus, ProjectState, StateManager,
};
use tempfile::TempDir;

fn manager(temp_dir: &TempDir) -> StateManager {
    StateManager::new(temp_dir.path(), DataStore::new())
}

/// Write a project as a previous run would have left it.
fn seed(temp_dir: &TempDir, project: ProjectState) {
    let mut manager = manager(temp_dir);
    manager.save_project_state(project).expect("seed");
}

#[test]
fn test_interrupted_epics_are_reclassified() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let live_worktree = temp_dir.path().join("worktrees/epic-2");
    fs::create_dir_all(&live_worktree).expect("mkdir");
    let gone_worktree = temp_dir.path().join("worktrees/epic-3");

    seed(
        &temp_dir,
        ProjectState::new("p-1", "shop")
            .with_epic(EpicState::new("1").with_status(ExecutionStatus::Completed).with_progress(100.0))
            .with_epic(
                EpicState::new("2")
                    .with_status(ExecutionStatus::Developing)
                    .with_progress(40.0)
                    .with_worktree(&live_worktree),
            )
            .with_epic(
                EpicState::new("3")
                    .with_status(ExecutionStatus::Developing)
                    .with_worktree(&gone_worktree),
            )
            .with_epic(EpicState::new("4").with_status(ExecutionStatus::Queued).with_worktree(&gone_worktree)),
    );

    let mut manager = manager(&temp_dir);
    let projects = manager.load_all_states().expect("load");
    let project = projects.get("p-1").expect("project");

    let epic = |id: &str| project.epic(id).expect("epic");
    assert_eq!(epic("1").status, ExecutionStatus::Completed);

    assert_eq!(epic("2").status, ExecutionStatus::Paused);
    assert_eq!(epic("2").progress, 40.0);
    assert_eq!(epic("2").worktree_path.as_deref(), Some(live_worktree.as_path()));

    assert_eq!(epic("3").status, ExecutionStatus::RequiresCleanup);
    assert!(epic("3").worktree_path.is_none());

    assert_eq!(epic("4").status, ExecutionStatus::RequiresCleanup);
    assert!(epic("4").worktree_path.is_none());
}

#[test]
fn test_corrupted_record_falls_back_to_backup() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut writer = manager(&temp_dir);
    writer
        .save_project_state(
            ProjectState::new("p-1", "shop")
                .with_epic(EpicState::new("1").with_status(ExecutionStatus::Completed)),
        )
        .expect("first save");
    writer
        .save_project_state(
            ProjectState::new("p-1", "shop")
                .with_epic(EpicState::new("1").with_status(ExecutionStatus::Completed))
                .with_epic(EpicState::new("2")),
        )
        .expect("second save");

    let status_file = writer.status_path("shop");
    fs::write(&status_file, "project_id: [unterminated\n").expect("corrupt");

    let mut reader = manager(&temp_dir);
    let projects = reader.load_all_states().expect("load");
    let project = projects.get("p-1").expect("recovered project");
    assert_eq!(project.status_of("1"), Some(ExecutionStatus::Completed));
    assert_eq!(project.status_of("2"), None);
}

#[test]
fn test_unrecoverable_project_does_not_block_others() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    seed(&temp_dir, ProjectState::new("p-ok", "healthy").with_epic(EpicState::new("1")));

    let broken = temp_dir.path().join("projects/broken");
    fs::create_dir_all(&broken).expect("mkdir");
    fs::write(broken.join("status.yaml"), "epics: {}\n").expect("write");

    let mut manager = manager(&temp_dir);
    let projects = manager.load_all_states().expect("load");
    assert_eq!(projects.len(), 1);
    assert!(projects.contains_key("p-ok"));
}

#[test]
fn test_recovery_is_stable_across_reloads() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    seed(
        &temp_dir,
        ProjectState::new("p-1", "shop").with_epic(
            EpicState::new("1")
                .with_status(ExecutionStatus::Developing)
                .with_worktree(temp_dir.path().join("missing")),
        ),
    );

    let mut first = manager(&temp_dir);
    let status = first
        .load_all_states()
        .expect("load")
        .get("p-1")
        .and_then(|project| project.status_of("1"));
    assert_eq!(status, Some(ExecutionStatus::RequiresCleanup));

    let project = first.get_project_state("p-1").cloned().expect("project");
    first.save_project_state(project).expect("persist recovered");

    let mut second = manager(&temp_dir);
    let project = second
        .load_all_states()
        .expect("reload")
        .get("p-1")
        .cloned()
        .expect("project");
    assert_eq!(project.status_of("1"), Some(ExecutionStatus::RequiresCleanup));
    assert!(project.epic("1").and_then(|epic| epic.worktree_path.clone()).is_none());
}
