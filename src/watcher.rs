//! File watching with per-path debouncing.
//!
//! Raw filesystem events are collected into a [`Debouncer`]: every event for
//! a path restarts that path's timer and replaces its pending change, so a
//! burst of writes yields a single [`FileChange`] carrying the latest event
//! once the path has been quiet for the debounce delay.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tracing::{debug, info, warn, Span};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Cannot start file watcher: {0}")]
    Init(#[source] notify::Error),

    #[error("Cannot watch {path}: {source}")]
    Watch { path: PathBuf, source: notify::Error },

    #[error("File watcher stopped")]
    Disconnected,
}

pub type WatchResult<T> = Result<T, WatchError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// Relevant kind of a raw event; access and unknown events are ignored.
    pub fn from_event(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(ChangeKind::Created),
            EventKind::Modify(_) => Some(ChangeKind::Modified),
            EventKind::Remove(_) => Some(ChangeKind::Deleted),
            EventKind::Any | EventKind::Access(_) | EventKind::Other => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Markdown documents, skipping dot-files and editor `~` files.
pub fn is_epic_document(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    name.ends_with(".md") && !name.starts_with('.') && !name.starts_with('~')
}

/// Keyed resettable timers.
#[derive(Debug)]
pub struct Debouncer<K, E> {
    delay: Duration,
    pending: HashMap<K, (Instant, E)>,
}

impl<K: Eq + Hash + Clone, E> Debouncer<K, E> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: HashMap::new(),
        }
    }

    /// Record `event` for `key` at `now`, restarting its timer.
    ///
    /// Returns `true` when an earlier pending event for `key` was replaced.
    pub fn push(&mut self, key: K, event: E, now: Instant) -> bool {
        self.pending.insert(key, (now + self.delay, event)).is_some()
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|(deadline, _)| *deadline).min()
    }

    /// Remove and return every event whose timer expired at `now`, oldest
    /// deadline first.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<(K, E)> {
        let ready_keys: Vec<K> = self
            .pending
            .iter()
            .filter(|(_, (deadline, _))| *deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut ready: Vec<(Instant, K, E)> = ready_keys
            .into_iter()
            .filter_map(|key| {
                self.pending
                    .remove(&key)
                    .map(|(deadline, event)| (deadline, key, event))
            })
            .collect();
        ready.sort_by_key(|(deadline, _, _)| *deadline);
        ready.into_iter().map(|(_, key, event)| (key, event)).collect()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Cancel every pending timer.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

type PathFilter = Box<dyn Fn(&Path) -> bool + Send>;

/// Watches directories and yields debounced [`FileChange`]s.
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    events: Receiver<notify::Result<Event>>,
    debouncer: Debouncer<PathBuf, FileChange>,
    filter: PathFilter,
    span: Span,
}

impl FileWatcher {
    /// A watcher accepting every path; narrow it with [`with_filter`](Self::with_filter).
    pub fn new(delay: Duration) -> WatchResult<Self> {
        let (sender, events) = mpsc::channel();
        let watcher = notify::recommended_watcher(sender).map_err(WatchError::Init)?;
        Ok(Self {
            watcher,
            events,
            debouncer: Debouncer::new(delay),
            filter: Box::new(|_| true),
            span: tracing::info_span!("file_watcher"),
        })
    }

    pub fn with_filter(mut self, filter: impl Fn(&Path) -> bool + Send + 'static) -> Self {
        self.filter = Box::new(filter);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn watch(&mut self, path: &Path, recursive: bool) -> WatchResult<()> {
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        self.watcher
            .watch(path, mode)
            .map_err(|source| WatchError::Watch {
                path: path.to_path_buf(),
                source,
            })?;
        let _guard = self.span.enter();
        info!(path = %path.display(), recursive, "Started monitoring");
        Ok(())
    }

    /// Wait up to `timeout` for debounced changes.
    ///
    /// Returns as soon as at least one path has been quiet for the debounce
    /// delay; an empty list means the timeout elapsed first.
    pub fn poll(&mut self, timeout: Duration) -> WatchResult<Vec<FileChange>> {
        let give_up = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            let ready = self.debouncer.drain_ready(now);
            if !ready.is_empty() {
                let _guard = self.span.enter();
                for (_, change) in &ready {
                    info!(path = %change.path.display(), kind = change.kind.as_str(), "Detected change");
                }
                return Ok(ready.into_iter().map(|(_, change)| change).collect());
            }
            if now >= give_up {
                return Ok(Vec::new());
            }

            let wake = self
                .debouncer
                .next_deadline()
                .map_or(give_up, |deadline| deadline.min(give_up));
            match self.events.recv_timeout(wake.saturating_duration_since(now)) {
                Ok(Ok(event)) => self.record(event),
                Ok(Err(err)) => {
                    let _guard = self.span.enter();
                    warn!("File watcher error: {}", err);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Err(WatchError::Disconnected),
            }
        }
    }

    fn record(&mut self, event: Event) {
        let Some(kind) = ChangeKind::from_event(&event.kind) else {
            return;
        };
        let _guard = self.span.enter();
        let now = Instant::now();
        for path in event.paths {
            if path.is_dir() || !(self.filter)(&path) {
                continue;
            }
            let change = FileChange {
                path: path.clone(),
                kind,
            };
            if self.debouncer.push(path.clone(), change, now) {
                debug!(path = %path.display(), "Debounce timer reset");
            } else {
                debug!(path = %path.display(), kind = kind.as_str(), "File event");
            }
        }
    }
}
