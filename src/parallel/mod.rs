//! Dependency graphs and the scheduling queries built on them.

pub mod dependency;
pub mod graph;
pub mod scheduler;

pub use dependency::{DependencyAnalyzer, DependencyError, DependencyNode, DependencyResult, QueuedEpic};
pub use graph::{CycleError, Dag};
pub use scheduler::{BatchPlan, BatchPlanner, BatchSummary, QueuedSummary, DEFAULT_MAX_CONCURRENT};
