//! Persisted execution records.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{StateError, StateResult};

/// Runtime status of an Epic, as tracked on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Queued,
    Developing,
    Paused,
    Completed,
    Failed,
    RequiresCleanup,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Developing => "developing",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::RequiresCleanup => "requires_cleanup",
        }
    }

    pub fn is_completed(&self) -> bool {
        *self == ExecutionStatus::Completed
    }

    /// Completed and failed Epics are never reclassified automatically.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

impl FromStr for ExecutionStatus {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "queued" => Ok(ExecutionStatus::Queued),
            "developing" => Ok(ExecutionStatus::Developing),
            "paused" => Ok(ExecutionStatus::Paused),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "requires_cleanup" => Ok(ExecutionStatus::RequiresCleanup),
            other => Err(StateError::InvalidUpdate(format!("unknown status: {other}"))),
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution record of one Epic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpicState {
    #[serde(deserialize_with = "id::deserialize")]
    pub epic_id: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    /// Percent complete, 0 to 100.
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub worktree_path: Option<PathBuf>,
    #[serde(default)]
    pub completed_stories: Vec<String>,
    #[serde(default = "Utc::now", with = "timestamp")]
    pub last_updated: DateTime<Utc>,
}

impl EpicState {
    /// A queued record with no progress.
    pub fn new(epic_id: impl Into<String>) -> Self {
        Self {
            epic_id: epic_id.into(),
            status: ExecutionStatus::Queued,
            progress: 0.0,
            agent_id: None,
            worktree_path: None,
            completed_stories: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_worktree(mut self, path: impl Into<PathBuf>) -> Self {
        self.worktree_path = Some(path.into());
        self
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

/// All Epic records of one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    #[serde(deserialize_with = "id::deserialize")]
    pub project_id: String,
    /// Directory name under `projects/`.
    pub project_name: String,
    #[serde(default, deserialize_with = "epic_map::deserialize")]
    pub epics: BTreeMap<String, EpicState>,
    #[serde(default = "Utc::now", with = "timestamp")]
    pub last_updated: DateTime<Utc>,
}

impl ProjectState {
    pub fn new(project_id: impl Into<String>, project_name: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            project_name: project_name.into(),
            epics: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    pub fn with_epic(mut self, epic: EpicState) -> Self {
        self.epics.insert(epic.epic_id.clone(), epic);
        self
    }

    pub fn epic(&self, epic_id: &str) -> Option<&EpicState> {
        self.epics.get(epic_id)
    }

    /// Status of an Epic, if tracked.
    pub fn status_of(&self, epic_id: &str) -> Option<ExecutionStatus> {
        self.epics.get(epic_id).map(|epic| epic.status)
    }

    /// Ids of Epics whose status is `completed`.
    pub fn completed_epic_ids(&self) -> Vec<String> {
        self.epics
            .values()
            .filter(|epic| epic.status == ExecutionStatus::Completed)
            .map(|epic| epic.epic_id.clone())
            .collect()
    }

    /// Check record-level invariants after loading.
    pub fn validate(&self) -> StateResult<()> {
        if self.project_id.trim().is_empty() {
            return Err(StateError::InvalidRecord("project_id is empty".to_string()));
        }
        let name = self.project_name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(StateError::InvalidRecord(format!(
                "project_name {:?} is not a directory name",
                self.project_name
            )));
        }
        for (key, epic) in &self.epics {
            if epic.epic_id.trim().is_empty() {
                return Err(StateError::InvalidRecord(format!("epic {key} has an empty epic_id")));
            }
            if !(0.0..=100.0).contains(&epic.progress) {
                return Err(StateError::InvalidRecord(format!(
                    "epic {key} progress {} outside 0-100",
                    epic.progress
                )));
            }
        }
        Ok(())
    }
}

/// Ids written either as strings or as bare numbers (`epic_id: 7`).
mod id {
    use serde::{de, Deserialize, Deserializer};
    use serde_yaml::Value;

    use crate::domain::parser::scalar_to_string;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        let value = Value::deserialize(deserializer)?;
        scalar_to_string(&value)
            .ok_or_else(|| de::Error::custom(format!("expected a string or number id, found {value:?}")))
    }
}

/// `epics` mapping whose keys may be numbers; `null` reads as empty.
mod epic_map {
    use std::collections::BTreeMap;

    use serde::{de, Deserialize, Deserializer};
    use serde_yaml::Mapping;

    use super::EpicState;
    use crate::domain::parser::scalar_to_string;

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, EpicState>, D::Error> {
        let mapping = Option::<Mapping>::deserialize(deserializer)?.unwrap_or_default();
        mapping
            .into_iter()
            .map(|(key, value)| {
                let key = scalar_to_string(&key)
                    .ok_or_else(|| de::Error::custom(format!("invalid epic key: {key:?}")))?;
                let epic: EpicState = serde_yaml::from_value(value).map_err(de::Error::custom)?;
                Ok((key, epic))
            })
            .collect()
    }
}

/// RFC 3339 timestamps; naive ISO-8601 strings are read as UTC and `null`
/// reads as the current time.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(raw) => parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {raw}"))),
            None => Ok(Utc::now()),
        }
    }

    pub(super) fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
            .map(|naive| Utc.from_utc_datetime(&naive))
    }
}
