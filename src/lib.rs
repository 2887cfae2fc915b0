//! Dependency-aware scheduling and crash-recoverable state for Epic/Story
//! work items.
//!
//! - [`parallel`]: dependency graphs, the analyzer and batch planning
//! - [`domain`]: Epic and Story records and the Markdown parser
//! - [`state`]: durable per-project status records with crash recovery
//! - [`watcher`]: debounced change notification for Epic documents and config

pub mod config;
pub mod domain;
pub mod logging;
pub mod parallel;
pub mod state;
pub mod view;
pub mod watcher;

pub use config::{AppConfig, ConfigError, ConfigManager};
pub use domain::{Epic, EpicParser, ParseError, Priority, Story, ValidationError};
pub use parallel::{BatchPlanner, CycleError, Dag, DependencyAnalyzer, DependencyError};
pub use state::{
    DataStore, EpicState, EpicUpdate, ExecutionStatus, ProjectState, StateError, StateManager,
    StoreError,
};
