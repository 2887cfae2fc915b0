//! Typed field updates for an [`EpicState`].

use std::path::PathBuf;

use super::record::{EpicState, ExecutionStatus};
use super::{StateError, StateResult};

/// A set of field changes to apply to one Epic record.
///
/// `agent_id` and `worktree_path` distinguish "leave alone" (`None`) from
/// "clear" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EpicUpdate {
    pub status: Option<ExecutionStatus>,
    pub progress: Option<f64>,
    pub agent_id: Option<Option<String>>,
    pub worktree_path: Option<Option<PathBuf>>,
    pub completed_story: Option<String>,
}

impl EpicUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: ExecutionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(Some(agent_id.into()));
        self
    }

    pub fn clear_agent(mut self) -> Self {
        self.agent_id = Some(None);
        self
    }

    pub fn worktree(mut self, path: impl Into<PathBuf>) -> Self {
        self.worktree_path = Some(Some(path.into()));
        self
    }

    pub fn clear_worktree(mut self) -> Self {
        self.worktree_path = Some(None);
        self
    }

    pub fn complete_story(mut self, story_id: impl Into<String>) -> Self {
        self.completed_story = Some(story_id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn validate(&self) -> StateResult<()> {
        if let Some(progress) = self.progress {
            if !(0.0..=100.0).contains(&progress) {
                return Err(StateError::InvalidUpdate(format!(
                    "progress {progress} outside 0-100"
                )));
            }
        }
        if let Some(story) = &self.completed_story {
            if story.trim().is_empty() {
                return Err(StateError::InvalidUpdate("completed story id is empty".to_string()));
            }
        }
        Ok(())
    }

    /// Apply the changes. Returns the names of the fields that were set.
    pub fn apply(&self, state: &mut EpicState) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if let Some(status) = self.status {
            state.status = status;
            changed.push("status");
        }
        if let Some(progress) = self.progress {
            state.progress = progress;
            changed.push("progress");
        }
        if let Some(agent_id) = &self.agent_id {
            state.agent_id = agent_id.clone();
            changed.push("agent_id");
        }
        if let Some(worktree) = &self.worktree_path {
            state.worktree_path = worktree.clone();
            changed.push("worktree_path");
        }
        if let Some(story) = &self.completed_story {
            if !state.completed_stories.contains(story) {
                state.completed_stories.push(story.clone());
            }
            changed.push("completed_stories");
        }
        changed
    }
}
