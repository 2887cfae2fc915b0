//! Crash recovery applied to records loaded from disk.
//!
//! | was developing | worktree missing | result                          |
//! |----------------|------------------|---------------------------------|
//! | yes            | yes              | `requires_cleanup`              |
//! | yes            | no               | `paused`                        |
//! | no             | yes              | `requires_cleanup` unless terminal |
//! | no             | no               | unchanged                       |
//!
//! A missing worktree path is always cleared.

use std::path::PathBuf;

use tracing::{info, warn};

use super::record::{EpicState, ExecutionStatus, ProjectState};
use crate::logging;

/// What recovery changed on one Epic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub epic_id: String,
    pub previous: ExecutionStatus,
    pub current: ExecutionStatus,
    /// Worktree path that was cleared because it no longer exists.
    pub cleared_worktree: Option<PathBuf>,
}

/// Apply the recovery table to one Epic. Returns `None` when nothing changed.
pub fn recover_epic(state: &mut EpicState) -> Option<RecoveryReport> {
    let previous = state.status;
    let crashed = previous == ExecutionStatus::Developing;

    let worktree_invalid = state
        .worktree_path
        .as_ref()
        .is_some_and(|path| !path.exists());
    let cleared_worktree = if worktree_invalid {
        state.worktree_path.take()
    } else {
        None
    };
    if let Some(path) = &cleared_worktree {
        warn!(epic_id = %state.epic_id, worktree = %path.display(), "Worktree missing");
    }

    state.status = match (crashed, worktree_invalid) {
        (true, true) => ExecutionStatus::RequiresCleanup,
        (true, false) => ExecutionStatus::Paused,
        (false, true) if !previous.is_terminal() => ExecutionStatus::RequiresCleanup,
        _ => previous,
    };

    if crashed {
        info!(
            epic_id = %state.epic_id,
            status = %state.status,
            "Recovered Epic interrupted while developing"
        );
    }

    if state.status == previous && !worktree_invalid {
        return None;
    }
    Some(RecoveryReport {
        epic_id: state.epic_id.clone(),
        previous,
        current: state.status,
        cleared_worktree,
    })
}

/// Apply [`recover_epic`] to every Epic of a project.
///
/// Each Epic is recovered inside its own Epic span.
pub fn recover_project(project: &mut ProjectState) -> Vec<RecoveryReport> {
    let project_name = project.project_name.clone();
    project
        .epics
        .values_mut()
        .filter_map(|epic| {
            let _guard = logging::project_epic_span(&project_name, &epic.epic_id).entered();
            recover_epic(epic)
        })
        .collect()
}
