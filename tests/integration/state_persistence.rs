//! Status records written, rotated and reloaded across manager instances.

use std::fs;

use epicflow::state::{
    DataStore, EpicState, EpicUpdate, ExecutionStatus, ProjectState, StateError, StateManager,
};
use epicflow::logging::{self, EpicLogLayer};
use tempfile::TempDir;
use tracing_subscriber::layer::SubscriberExt;

fn manager(temp_dir: &TempDir) -> StateManager {
    StateManager::new(temp_dir.path(), DataStore::new())
}

#[test]
fn test_updates_survive_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let mut first = manager(&temp_dir);
    first.load_all_states().expect("load");
    first
        .track_epics("p-1", "shop", ["1", "2"])
        .expect("track");
    first
        .update_epic_state(
            "p-1",
            "1",
            &EpicUpdate::new()
                .status(ExecutionStatus::Completed)
                .progress(100.0)
                .complete_story("1.1"),
        )
        .expect("update");

    let mut second = manager(&temp_dir);
    let projects = second.load_all_states().expect("reload");
    let project = projects.get("p-1").expect("project");
    let epic = project.epic("1").expect("epic 1");

    assert_eq!(epic.status, ExecutionStatus::Completed);
    assert_eq!(epic.progress, 100.0);
    assert_eq!(epic.completed_stories, vec!["1.1"]);
    assert_eq!(project.status_of("2"), Some(ExecutionStatus::Queued));
}

#[test]
fn test_saves_rotate_backups() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut manager = manager(&temp_dir);
    manager.load_all_states().expect("load");
    manager
        .save_project_state(ProjectState::new("p-1", "shop").with_epic(EpicState::new("1")))
        .expect("initial save");

    for progress in [10.0, 20.0, 30.0, 40.0, 50.0] {
        manager
            .update_epic_state("p-1", "1", &EpicUpdate::new().progress(progress))
            .expect("update");
    }

    let status_file = manager.status_path("shop");
    let backups = DataStore::new().list_backups(&status_file).expect("list");
    assert_eq!(backups.len(), 3);

    let leftovers: Vec<_> = fs::read_dir(status_file.parent().expect("parent"))
        .expect("read dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_rejected_update_leaves_record_untouched() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut manager = manager(&temp_dir);
    manager.load_all_states().expect("load");
    manager.track_epics("p-1", "shop", ["1"]).expect("track");

    let status_file = manager.status_path("shop");
    let before = fs::read_to_string(&status_file).expect("read");

    let err = manager
        .update_epic_state("p-1", "1", &EpicUpdate::new().progress(150.0))
        .expect_err("progress out of range");
    assert!(matches!(err, StateError::InvalidUpdate(_)));

    let err = manager
        .update_epic_state("p-1", "9", &EpicUpdate::new().progress(5.0))
        .expect_err("unknown epic");
    assert!(matches!(err, StateError::EpicNotFound { .. }));

    assert_eq!(fs::read_to_string(&status_file).expect("read"), before);
    assert_eq!(
        manager
            .get_project_state("p-1")
            .and_then(|project| project.epic("1"))
            .map(|epic| epic.progress),
        Some(0.0)
    );
}

#[test]
fn test_record_written_by_hand_is_loaded() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let dir = temp_dir.path().join("projects/legacy");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(
        dir.join("status.yaml"),
        "project_id: legacy-1\nproject_name: legacy\nlast_updated: '2024-01-02T03:04:05.000006'\nepics:\n  '7':\n    epic_id: '7'\n    status: completed\n    progress: 100\n",
    )
    .expect("write");

    let numeric = temp_dir.path().join("projects/numeric");
    fs::create_dir_all(&numeric).expect("mkdir");
    fs::write(
        numeric.join("status.yaml"),
        "project_id: 99\nproject_name: numeric\nlast_updated: null\nepics:\n  7:\n    epic_id: 7\n    status: developing\n    progress: 30\n    last_updated: null\n",
    )
    .expect("write");

    let mut manager = manager(&temp_dir);
    let projects = manager.load_all_states().expect("load");
    let project = projects.get("legacy-1").expect("project");
    assert_eq!(project.completed_epic_ids(), vec!["7"]);

    let project = projects.get("99").expect("numeric project");
    let epic = project.epic("7").expect("numeric epic key");
    assert_eq!(epic.epic_id, "7");
    assert_eq!(epic.status, ExecutionStatus::Paused);
    assert_eq!(epic.progress, 30.0);
}

/// Concatenated contents of `<dir>/<prefix>.*` log files.
fn epic_log(dir: &std::path::Path, prefix: &str) -> String {
    fs::read_dir(dir)
        .expect("read log dir")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&format!("{prefix}.")))
        .map(|entry| fs::read_to_string(entry.path()).expect("read log"))
        .collect()
}

#[test]
fn test_epic_activity_is_logged_per_epic() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let layer = EpicLogLayer::new(temp_dir.path());
    let epics_dir = layer.epic_log_dir(Some("shop"));
    let subscriber = tracing_subscriber::registry().with(layer);

    tracing::subscriber::with_default(subscriber, || {
        let mut manager = manager(&temp_dir).with_span(logging::component_span("state_manager"));
        manager.load_all_states().expect("load");
        manager.track_epics("p-1", "shop", ["1", "2"]).expect("track");
        manager
            .update_epic_state("p-1", "2", &EpicUpdate::new().progress(50.0))
            .expect("update");
    });

    let first = epic_log(&epics_dir, "epic-1");
    let second = epic_log(&epics_dir, "epic-2");
    assert!(first.contains("Epic tracked as queued"));
    assert!(!first.contains("Updating Epic state"));
    assert!(second.contains("Updating Epic state"));

    let mut reloaded = manager(&temp_dir);
    assert!(reloaded.load_all_states().expect("reload").contains_key("p-1"));
}
