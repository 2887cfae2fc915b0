//! Story record.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ValidationError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoryStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStatus::Pending => "pending",
            StoryStatus::InProgress => "in-progress",
            StoryStatus::Completed => "completed",
            StoryStatus::Failed => "failed",
        }
    }
}

impl FromStr for StoryStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(StoryStatus::Pending),
            "in-progress" => Ok(StoryStatus::InProgress),
            "completed" => Ok(StoryStatus::Completed),
            "failed" => Ok(StoryStatus::Failed),
            _ => Err(ValidationError::InvalidValue {
                field: "status",
                value: s.to_string(),
                expected: "pending/in-progress/completed/failed",
            }),
        }
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Story inside an Epic. Ids have the form `<epic>.<n>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Ids of Stories in the same Epic that must complete first.
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub status: StoryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl Story {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            prerequisites: Vec::new(),
            status: StoryStatus::default(),
            commit_hash: None,
            agent_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_prerequisites<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prerequisites = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_status(mut self, status: StoryStatus) -> Self {
        self.status = status;
        self
    }

    /// Check field-level invariants.
    ///
    /// When `epic_story_ids` is given, every prerequisite must be one of them.
    pub fn validate(&self, epic_story_ids: Option<&[String]>) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        if self.title.trim().is_empty() {
            return Err(ValidationError::MissingField("title"));
        }
        if !self.id.contains('.') {
            return Err(ValidationError::InvalidStoryId(self.id.clone()));
        }

        if let Some(known) = epic_story_ids {
            if let Some(unknown) = self
                .prerequisites
                .iter()
                .find(|prereq| !known.contains(prereq))
            {
                return Err(ValidationError::UnknownPrerequisite {
                    story: self.id.clone(),
                    prerequisite: unknown.clone(),
                });
            }
        }

        Ok(())
    }

    /// The Epic id prefix of this Story's id (`"3"` for `"3.2"`).
    pub fn epic_prefix(&self) -> Option<&str> {
        self.id.split_once('.').map(|(prefix, _)| prefix)
    }

    /// Whether the id prefix names the given Epic.
    pub fn belongs_to(&self, epic_id: &str) -> bool {
        self.epic_prefix() == Some(epic_id)
    }

    pub fn has_unmet_prerequisites(&self, completed: &HashSet<String>) -> bool {
        self.prerequisites
            .iter()
            .any(|prereq| !completed.contains(prereq))
    }
}
