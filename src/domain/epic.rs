//! Epic record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::story::Story;
use super::ValidationError;

/// Scheduling priority of an Epic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }
}

impl FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Ok(Priority::High),
            "MEDIUM" => Ok(Priority::Medium),
            "LOW" => Ok(Priority::Low),
            _ => Err(ValidationError::InvalidValue {
                field: "priority",
                value: s.to_string(),
                expected: "HIGH/MEDIUM/LOW",
            }),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the Stories of an Epic are meant to be worked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Single,
    Multi,
    #[default]
    Auto,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Single => "single",
            ExecutionMode::Multi => "multi",
            ExecutionMode::Auto => "auto",
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "single" => Ok(ExecutionMode::Single),
            "multi" => Ok(ExecutionMode::Multi),
            "auto" => Ok(ExecutionMode::Auto),
            _ => Err(ValidationError::InvalidValue {
                field: "execution_mode",
                value: s.to_string(),
                expected: "single/multi/auto",
            }),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document-level lifecycle of an Epic, as written by its authors.
///
/// Independent from the persisted execution status tracked by the state
/// manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpicStatus {
    #[default]
    Backlog,
    Contexted,
    Developing,
    Completed,
    Failed,
}

/// An Epic: a unit of work that owns an ordered list of Stories and may
/// depend on other Epics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Ids of Epics that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    /// How many Stories may run at once.
    #[serde(default = "default_story_concurrency")]
    pub story_concurrency: u32,
    #[serde(default)]
    pub stories: Vec<Story>,
    #[serde(default)]
    pub status: EpicStatus,
}

fn default_story_concurrency() -> u32 {
    3
}

impl Epic {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            depends_on: Vec::new(),
            priority: Priority::default(),
            execution_mode: ExecutionMode::default(),
            story_concurrency: default_story_concurrency(),
            stories: Vec::new(),
            status: EpicStatus::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_story_concurrency(mut self, concurrency: u32) -> Self {
        self.story_concurrency = concurrency;
        self
    }

    pub fn with_stories(mut self, stories: Vec<Story>) -> Self {
        self.stories = stories;
        self
    }

    /// Check field-level invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.trim().is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        if self.title.trim().is_empty() {
            return Err(ValidationError::MissingField("title"));
        }
        if self.story_concurrency < 1 {
            return Err(ValidationError::InvalidConcurrency(self.story_concurrency));
        }
        Ok(())
    }

    /// Ids of the Stories owned by this Epic, in document order.
    pub fn story_ids(&self) -> Vec<String> {
        self.stories.iter().map(|story| story.id.clone()).collect()
    }
}
