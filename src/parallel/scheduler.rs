//! Batch planning on top of the dependency analyzer.
//!
//! Decides which ready Epics to start next given what is already running and
//! a concurrency limit. Nothing is executed here.

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::Epic;
use crate::parallel::dependency::{DependencyAnalyzer, QueuedEpic};
use crate::parallel::graph::Dag;
use crate::state::{ExecutionStatus, ProjectState};

/// Default number of Epics developed at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Outcome of one planning pass.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan<'a> {
    /// Epics already completed according to the project state.
    pub completed: Vec<String>,
    /// Ready Epics to start now, highest priority first.
    pub launch: Vec<&'a Epic>,
    /// Ready Epics held back by the concurrency limit.
    pub deferred: Vec<&'a Epic>,
    /// Ready Epics that are already developing.
    pub in_flight: Vec<&'a Epic>,
    /// Ready Epics that failed or need cleanup before they can run again.
    pub held: Vec<&'a Epic>,
    /// Epics still waiting on dependencies.
    pub queued: Vec<QueuedEpic<'a>>,
}

/// Id-only view of a [`BatchPlan`], for machine-readable output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub completed: Vec<String>,
    pub launch: Vec<String>,
    pub deferred: Vec<String>,
    pub in_flight: Vec<String>,
    pub held: Vec<String>,
    pub queued: Vec<QueuedSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedSummary {
    pub epic_id: String,
    pub missing_dependencies: Vec<String>,
}

impl BatchPlan<'_> {
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            completed: self.completed.clone(),
            launch: epic_ids(&self.launch),
            deferred: epic_ids(&self.deferred),
            in_flight: epic_ids(&self.in_flight),
            held: epic_ids(&self.held),
            queued: self
                .queued
                .iter()
                .map(|queued| QueuedSummary {
                    epic_id: queued.epic.id.clone(),
                    missing_dependencies: queued.missing_dependencies.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchPlanner {
    analyzer: DependencyAnalyzer,
}

impl BatchPlanner {
    pub fn new(analyzer: DependencyAnalyzer) -> Self {
        Self { analyzer }
    }

    /// Plan the next batch.
    ///
    /// `state` supplies runtime statuses; an untracked project is treated as
    /// having nothing completed or running.
    pub fn plan<'a>(
        &self,
        dag: &'a Dag<Epic>,
        state: Option<&ProjectState>,
        max_concurrent: usize,
    ) -> BatchPlan<'a> {
        let completed: Vec<String> = dag
            .node_ids()
            .filter(|id| status_of(state, id) == Some(ExecutionStatus::Completed))
            .map(str::to_string)
            .collect();

        let mut plan = BatchPlan {
            completed: completed.clone(),
            ..BatchPlan::default()
        };
        let mut candidates = Vec::new();

        for epic in self.analyzer.get_parallel_epics(dag, &completed) {
            match status_of(state, &epic.id) {
                Some(ExecutionStatus::Developing) => plan.in_flight.push(epic),
                Some(ExecutionStatus::Failed | ExecutionStatus::RequiresCleanup) => {
                    debug!(epic_id = %epic.id, "Ready Epic held for intervention");
                    plan.held.push(epic);
                }
                _ => candidates.push(epic),
            }
        }

        // Stable sort keeps graph order within a priority.
        candidates.sort_by_key(|epic| epic.priority);
        let slots = max_concurrent.saturating_sub(plan.in_flight.len());
        let deferred = candidates.split_off(slots.min(candidates.len()));
        for epic in &deferred {
            debug!(epic_id = %epic.id, priority = %epic.priority, "Deferred by concurrency limit");
        }
        plan.launch = candidates;
        plan.deferred = deferred;
        plan.queued = self.analyzer.get_queued_epics(dag, &completed);

        info!(
            launch = plan.launch.len(),
            deferred = plan.deferred.len(),
            in_flight = plan.in_flight.len(),
            held = plan.held.len(),
            queued = plan.queued.len(),
            max_concurrent,
            "Batch planned"
        );
        plan
    }
}

fn epic_ids(epics: &[&Epic]) -> Vec<String> {
    epics.iter().map(|epic| epic.id.clone()).collect()
}

fn status_of(state: Option<&ProjectState>, epic_id: &str) -> Option<ExecutionStatus> {
    state.and_then(|project| project.status_of(epic_id))
}
