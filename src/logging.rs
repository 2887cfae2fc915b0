//! Tracing subscriber setup and span handles.
//!
//! Components do not look loggers up by name. They receive a [`Span`] at
//! construction (`with_span`) and record under it. Events recorded inside a
//! span carrying an `epic_id` field are also written to that Epic's own log
//! file by [`EpicLogLayer`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use thiserror::Error;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Span, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Prefix of the rotated application log (`epicflow.<date>.log`).
pub const LOG_FILE_PREFIX: &str = "epicflow";
const LOG_FILE_SUFFIX: &str = "log";
/// Rotated files kept per log.
pub const MAX_LOG_FILES: usize = 5;

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter {filter:?}: {source}")]
    Filter {
        filter: String,
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("Cannot create log directory {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Cannot open log file in {path}: {source}")]
    Appender { path: PathBuf, source: InitError },
}

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Directory receiving the application log, if any.
    pub log_dir: Option<PathBuf>,
    /// Base directory under which per-Epic logs are written, if any.
    pub epic_log_root: Option<PathBuf>,
}

impl LogSettings {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            log_dir: None,
            epic_log_root: None,
        }
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_epic_logs(mut self, root: impl Into<PathBuf>) -> Self {
        self.epic_log_root = Some(root.into());
        self
    }
}

/// Keeps the background log writer alive. Dropping it flushes the file log.
#[must_use = "dropping the guard stops the file log writer"]
pub struct LogGuard {
    installed: bool,
    _worker: Option<WorkerGuard>,
}

impl LogGuard {
    /// `false` when a subscriber was already installed.
    pub fn is_installed(&self) -> bool {
        self.installed
    }
}

/// Install the global subscriber: stderr, an optional rotated log file and
/// optional per-Epic log files.
pub fn init(settings: &LogSettings) -> Result<LogGuard, LoggingError> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(value) if !value.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(&settings.level).map_err(|source| LoggingError::Filter {
            filter: settings.level.clone(),
            source,
        })?,
    };

    let (file_layer, worker) = match settings.log_dir.as_deref() {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(rotating_appender(dir, LOG_FILE_PREFIX)?);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let epic_layer = settings
        .epic_log_root
        .as_ref()
        .map(|root| EpicLogLayer::new(root.clone()));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal());

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .with(epic_layer)
        .try_init()
        .is_ok();

    Ok(LogGuard {
        installed,
        _worker: worker,
    })
}

/// Daily-rotated `<prefix>.<date>.log` in `dir`.
fn rotating_appender(dir: &Path, prefix: &str) -> Result<RollingFileAppender, LoggingError> {
    fs::create_dir_all(dir).map_err(|source| LoggingError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
        .map_err(|source| LoggingError::Appender {
            path: dir.to_path_buf(),
            source,
        })
}

/// Span for a named component.
pub fn component_span(name: &str) -> Span {
    tracing::info_span!("component", name = %name)
}

/// Span for work on a single Epic outside any project.
///
/// Its events go to `<root>/logs/epics/epic-<id>.<date>.log`.
pub fn epic_span(epic_id: &str) -> Span {
    tracing::info_span!("epic", epic_id = %epic_id)
}

/// Span for work on one Epic of a tracked project.
///
/// Its events go to `<root>/projects/<project>/epics/epic-<id>.<date>.log`.
pub fn project_epic_span(project_name: &str, epic_id: &str) -> Span {
    tracing::info_span!("epic", project = %project_name, epic_id = %epic_id)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct EpicTarget {
    project: Option<String>,
    epic_id: String,
}

#[derive(Default)]
struct TargetVisitor {
    project: Option<String>,
    epic_id: Option<String>,
}

impl TargetVisitor {
    fn set(&mut self, field: &Field, value: String) {
        match field.name() {
            "epic_id" => self.epic_id = Some(value),
            "project" => self.project = Some(value),
            _ => {}
        }
    }
}

impl Visit for TargetVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.set(field, format!("{value:?}"));
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Routes events recorded inside an `epic_id` span to one file per Epic.
pub struct EpicLogLayer {
    root: PathBuf,
    writers: Mutex<HashMap<PathBuf, RollingFileAppender>>,
}

impl EpicLogLayer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// Directory holding the Epic logs of `project`, or of Epics outside
    /// any project.
    pub fn epic_log_dir(&self, project: Option<&str>) -> PathBuf {
        match project {
            Some(project) => self.root.join("projects").join(project).join("epics"),
            None => self.root.join("logs").join("epics"),
        }
    }

    fn write_line(&self, target: &EpicTarget, line: &str) {
        let project = target.project.as_deref();
        if !is_path_component(&target.epic_id) || project.is_some_and(|name| !is_path_component(name)) {
            return;
        }

        let dir = self.epic_log_dir(project);
        let prefix = format!("epic-{}", target.epic_id);
        let Ok(mut writers) = self.writers.lock() else {
            return;
        };
        let writer = match writers.entry(dir.join(&prefix)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match rotating_appender(&dir, &prefix) {
                Ok(appender) => entry.insert(appender),
                Err(err) => {
                    eprintln!("epicflow: {err}");
                    return;
                }
            },
        };
        let _ = writer.write_all(line.as_bytes());
    }
}

impl<S> Layer<S> for EpicLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut visitor = TargetVisitor::default();
        attrs.record(&mut visitor);
        if let (Some(epic_id), Some(span)) = (visitor.epic_id, ctx.span(id)) {
            span.extensions_mut().insert(EpicTarget {
                project: visitor.project,
                epic_id,
            });
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(scope) = ctx.event_scope(event) else {
            return;
        };
        let Some(target) = scope.into_iter().find_map(|span| {
            let extensions = span.extensions();
            extensions.get::<EpicTarget>().cloned()
        }) else {
            return;
        };

        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let meta = event.metadata();
        let line = format!(
            "{} {:>5} {}: {}{}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            meta.level(),
            meta.target(),
            visitor.message,
            visitor.fields
        );
        self.write_line(&target, &line);
    }
}

fn is_path_component(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}
