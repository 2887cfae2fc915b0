//! Persisted execution state.
//!
//! One `status.yaml` record per project under `<base>/projects/<name>/`,
//! written atomically with rotating backups, reloaded with crash recovery.

pub mod manager;
pub mod record;
pub mod recovery;
pub mod store;
pub mod update;

use thiserror::Error;

pub use manager::StateManager;
pub use record::{EpicState, ExecutionStatus, ProjectState};
pub use recovery::{recover_epic, recover_project, RecoveryReport};
pub use store::{DataStore, StoreError, StoreResult};
pub use update::EpicUpdate;

/// Errors raised by the state manager.
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Epic not found: {epic_id} (project: {project_id})")]
    EpicNotFound { project_id: String, epic_id: String },

    /// Record content parsed but does not describe a project.
    #[error("Invalid project record: {0}")]
    InvalidRecord(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for state manager operations.
pub type StateResult<T> = Result<T, StateError>;
