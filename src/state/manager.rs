use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_yaml::Value;
use tracing::{debug, error, info, warn, Span};

use super::record::{EpicState, ProjectState};
use super::recovery::recover_project;
use super::store::{DataStore, StoreError};
use super::update::EpicUpdate;
use super::{StateError, StateResult};
use crate::logging;

const PROJECTS_DIR_NAME: &str = "projects";
const STATUS_FILE_NAME: &str = "status.yaml";

/// Owns the in-memory project records and their on-disk copies.
///
/// Calls are not synchronized: one caller must serialize updates per project.
#[derive(Debug)]
pub struct StateManager {
    base_dir: PathBuf,
    store: DataStore,
    projects: HashMap<String, ProjectState>,
    span: Span,
}

impl StateManager {
    pub fn new(base_dir: impl Into<PathBuf>, store: DataStore) -> Self {
        Self {
            base_dir: base_dir.into(),
            store,
            projects: HashMap::new(),
            span: tracing::info_span!("state_manager"),
        }
    }

    /// Use the given span for every log record this manager emits.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.base_dir.join(PROJECTS_DIR_NAME)
    }

    pub fn status_path(&self, project_name: &str) -> PathBuf {
        self.projects_dir().join(project_name).join(STATUS_FILE_NAME)
    }

    /// Loaded projects keyed by project id.
    pub fn projects(&self) -> &HashMap<String, ProjectState> {
        &self.projects
    }

    /// Scan `projects/*/status.yaml` and load every readable record.
    ///
    /// A record that fails to parse or validate is replaced by its newest
    /// backup. Projects with no usable record are logged and left out.
    /// Crash recovery is applied to everything that loads.
    pub fn load_all_states(&mut self) -> StateResult<&HashMap<String, ProjectState>> {
        let span = self.span.clone();
        let _guard = span.enter();

        let projects_dir = self.projects_dir();
        if !projects_dir.exists() {
            info!(dir = %projects_dir.display(), "Projects directory missing, no state loaded");
            return Ok(&self.projects);
        }

        let entries = fs::read_dir(&projects_dir).map_err(|source| StoreError::Io {
            path: projects_dir.clone(),
            source,
        })?;
        let mut project_dirs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        project_dirs.sort();

        let mut loaded = 0usize;
        let mut failed = 0usize;
        for project_dir in project_dirs {
            let status_file = project_dir.join(STATUS_FILE_NAME);
            if !status_file.exists() {
                debug!(dir = %project_dir.display(), "Skipping directory without status record");
                continue;
            }

            let project = match self.load_record(&status_file) {
                Ok(project) => Some(project),
                Err(err) => {
                    error!(path = %status_file.display(), "Failed to load status record: {}", err);
                    self.load_newest_backup(&status_file)
                }
            };

            match project {
                Some(mut project) => {
                    let reports = recover_project(&mut project);
                    if !reports.is_empty() {
                        info!(
                            project_id = %project.project_id,
                            recovered = reports.len(),
                            "Applied crash recovery"
                        );
                    }
                    info!(
                        project_id = %project.project_id,
                        project_name = %project.project_name,
                        epics = project.epics.len(),
                        "Loaded project state"
                    );
                    self.projects.insert(project.project_id.clone(), project);
                    loaded += 1;
                }
                None => failed += 1,
            }
        }

        info!(loaded, failed, "State loading completed");
        Ok(&self.projects)
    }

    /// Back up the current record, refresh `last_updated` and write the
    /// project atomically. The in-memory copy changes only on success.
    pub fn save_project_state(&mut self, mut project: ProjectState) -> StateResult<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        project.validate()?;
        let status_file = self.status_path(&project.project_name);

        if status_file.exists() {
            if let Err(err) = self.store.backup_default(&status_file) {
                warn!(path = %status_file.display(), "Backup before save failed: {}", err);
            }
        }

        project.last_updated = Utc::now();
        if let Err(err) = self.store.atomic_write(&status_file, &project) {
            error!(project_id = %project.project_id, "Failed to save project state: {}", err);
            return Err(err.into());
        }

        info!(
            project_id = %project.project_id,
            project_name = %project.project_name,
            "Saved project state"
        );
        self.projects.insert(project.project_id.clone(), project);
        Ok(())
    }

    /// In-memory lookup.
    pub fn get_project_state(&self, project_id: &str) -> Option<&ProjectState> {
        self.projects.get(project_id)
    }

    /// Apply `update` to one Epic and persist the whole project.
    pub fn update_epic_state(
        &mut self,
        project_id: &str,
        epic_id: &str,
        update: &EpicUpdate,
    ) -> StateResult<()> {
        update.validate()?;

        let mut project = self
            .projects
            .get(project_id)
            .cloned()
            .ok_or_else(|| StateError::ProjectNotFound(project_id.to_string()))?;
        let epic_span = {
            let _guard = self.span.enter();
            logging::project_epic_span(&project.project_name, epic_id)
        };
        let epic = project
            .epics
            .get_mut(epic_id)
            .ok_or_else(|| StateError::EpicNotFound {
                project_id: project_id.to_string(),
                epic_id: epic_id.to_string(),
            })?;

        let changed = update.apply(epic);
        epic.touch();
        epic_span.in_scope(|| {
            info!(
                project_id,
                fields = ?changed,
                status = %epic.status,
                progress = epic.progress,
                "Updating Epic state"
            );
        });

        self.save_project_state(project)
    }

    /// Register Epics as `queued`, creating the project record if needed.
    ///
    /// Existing Epic records are left alone. Returns how many were added.
    pub fn track_epics<I, S>(
        &mut self,
        project_id: &str,
        project_name: &str,
        epic_ids: I,
    ) -> StateResult<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let existing = self.projects.get(project_id).cloned();
        let is_new = existing.is_none();
        let mut project =
            existing.unwrap_or_else(|| ProjectState::new(project_id, project_name));

        let mut added = 0usize;
        for epic_id in epic_ids {
            let epic_id = epic_id.into();
            if !project.epics.contains_key(&epic_id) {
                let _guard = self.span.enter();
                logging::project_epic_span(&project.project_name, &epic_id)
                    .in_scope(|| info!(project_id, "Epic tracked as queued"));
                project.epics.insert(epic_id.clone(), EpicState::new(epic_id));
                added += 1;
            }
        }

        if is_new || added > 0 {
            self.save_project_state(project)?;
        }
        Ok(added)
    }

    fn load_record(&self, path: &Path) -> StateResult<ProjectState> {
        let value: Value = self.store.read(path)?;
        parse_project_state(value)
    }

    fn load_newest_backup(&self, status_file: &Path) -> Option<ProjectState> {
        let backups = match self.store.list_backups(status_file) {
            Ok(backups) => backups,
            Err(err) => {
                error!("Failed to list backups: {}", err);
                return None;
            }
        };
        let Some(newest) = backups.first() else {
            error!(path = %status_file.display(), "No backup available, project skipped");
            return None;
        };

        info!(backup = %newest.display(), "Attempting recovery from backup");
        match self.load_record(newest) {
            Ok(project) => {
                info!(project_name = %project.project_name, "Recovered project state from backup");
                Some(project)
            }
            Err(err) => {
                error!(backup = %newest.display(), "Backup recovery failed: {}", err);
                None
            }
        }
    }
}

fn parse_project_state(value: Value) -> StateResult<ProjectState> {
    let mapping = match value {
        Value::Mapping(mapping) if !mapping.is_empty() => mapping,
        Value::Null | Value::Mapping(_) => {
            return Err(StateError::InvalidRecord("record is empty".to_string()))
        }
        _ => return Err(StateError::InvalidRecord("record is not a mapping".to_string())),
    };

    for field in ["project_id", "project_name"] {
        if mapping.get(field).is_none() {
            return Err(StateError::InvalidRecord(format!(
                "missing required field: {field}"
            )));
        }
    }

    let project: ProjectState = serde_yaml::from_value(Value::Mapping(mapping))
        .map_err(|err| StateError::InvalidRecord(err.to_string()))?;
    project.validate()?;
    Ok(project)
}
