//! Dependency analysis for Epics and Stories.
//!
//! Builds [`Dag`]s from records that declare the ids they depend on, rejects
//! dangling references and cycles, and answers the scheduling questions
//! callers ask of a built graph: what can start now, and what is still
//! waiting on which dependencies.

use std::collections::HashSet;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, Span};

use crate::domain::{Epic, Story};
use crate::parallel::graph::Dag;

/// Errors raised while building a dependency graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DependencyError {
    /// The graph contains a cycle. `cycle` is a closed path.
    #[error("Circular dependency detected: {}", .cycle.join(" → "))]
    CircularDependency { cycle: Vec<String> },

    /// An Epic depends on an Epic that is not part of the input.
    #[error("Epic {source_epic} depends on Epic {missing}, but Epic {missing} not found")]
    InvalidDependency { missing: String, source_epic: String },

    /// A Story lists a prerequisite that is not part of the input.
    #[error("Story {story} has prerequisite {missing}, but Story {missing} not found in Epic")]
    InvalidPrerequisite { missing: String, story: String },
}

impl DependencyError {
    /// Stable diagnostic code.
    pub fn code(&self) -> &'static str {
        match self {
            DependencyError::CircularDependency { .. } => "DA001",
            DependencyError::InvalidDependency { .. } => "DA002",
            DependencyError::InvalidPrerequisite { .. } => "DA003",
        }
    }

    /// The cycle path, for structural errors.
    pub fn cycle(&self) -> Option<&[String]> {
        match self {
            DependencyError::CircularDependency { cycle } => Some(cycle),
            _ => None,
        }
    }
}

/// Result type for dependency analysis.
pub type DependencyResult<T> = Result<T, DependencyError>;

/// A record that can become a graph node.
pub trait DependencyNode: Clone {
    fn node_id(&self) -> &str;
    fn dependency_ids(&self) -> &[String];
    fn title(&self) -> &str;
}

impl DependencyNode for Epic {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn dependency_ids(&self) -> &[String] {
        &self.depends_on
    }

    fn title(&self) -> &str {
        &self.title
    }
}

impl DependencyNode for Story {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn dependency_ids(&self) -> &[String] {
        &self.prerequisites
    }

    fn title(&self) -> &str {
        &self.title
    }
}

/// An Epic that cannot start yet, with the dependencies it is waiting for.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEpic<'a> {
    pub epic: &'a Epic,
    pub missing_dependencies: Vec<String>,
}

/// Builds and queries Epic and Story dependency graphs.
///
/// Log output is recorded under the span handed in with [`with_span`];
/// by default the analyzer uses its own `dependency_analyzer` span.
///
/// [`with_span`]: DependencyAnalyzer::with_span
#[derive(Debug, Clone)]
pub struct DependencyAnalyzer {
    span: Span,
}

impl Default for DependencyAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyAnalyzer {
    pub fn new() -> Self {
        Self {
            span: tracing::info_span!("dependency_analyzer"),
        }
    }

    /// Use the given span for every log record this analyzer emits.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Build the Epic graph from `depends_on` lists.
    ///
    /// Fails on the first dependency naming an Epic that is not in `epics`,
    /// then on any cycle.
    pub fn build_epic_dag(&self, epics: &[Epic]) -> DependencyResult<Dag<Epic>> {
        let _guard = self.span.enter();
        let started = Instant::now();
        info!(count = epics.len(), "Building Epic DAG");

        let dag = self.build(epics, |node, missing| DependencyError::InvalidDependency {
            missing: missing.to_string(),
            source_epic: node.to_string(),
        })?;

        info!(
            nodes = dag.node_count(),
            edges = dag.edge_count(),
            elapsed_ms = elapsed_ms(started),
            "Epic DAG built"
        );
        Ok(dag)
    }

    /// Build the Story graph of one Epic from `prerequisites` lists.
    ///
    /// `epic_id` only adds context to the log output.
    pub fn build_story_dag(
        &self,
        stories: &[Story],
        epic_id: Option<&str>,
    ) -> DependencyResult<Dag<Story>> {
        let _guard = self.span.enter();
        let started = Instant::now();
        info!(count = stories.len(), epic_id = epic_id.unwrap_or("-"), "Building Story DAG");

        let dag = self.build(stories, |node, missing| DependencyError::InvalidPrerequisite {
            missing: missing.to_string(),
            story: node.to_string(),
        })?;

        info!(
            epic_id = epic_id.unwrap_or("-"),
            nodes = dag.node_count(),
            edges = dag.edge_count(),
            elapsed_ms = elapsed_ms(started),
            "Story DAG built"
        );
        Ok(dag)
    }

    /// Check a graph for cycles.
    pub fn validate_dag<T>(&self, dag: &Dag<T>) -> DependencyResult<()> {
        if dag.has_cycle() {
            return Err(DependencyError::CircularDependency {
                cycle: dag.find_cycle(),
            });
        }
        Ok(())
    }

    /// Stories whose prerequisites are all completed.
    pub fn get_parallel_stories<'a>(
        &self,
        dag: &'a Dag<Story>,
        completed: &HashSet<String>,
    ) -> Vec<&'a Story> {
        let _guard = self.span.enter();
        let ready = dag.parallel_nodes(completed);
        debug!(
            completed = completed.len(),
            ready = ?ready.iter().map(|story| story.id.as_str()).collect::<Vec<_>>(),
            "Parallel Stories"
        );
        ready
    }

    /// Epics whose dependencies are all completed.
    pub fn get_parallel_epics<'a>(&self, dag: &'a Dag<Epic>, completed: &[String]) -> Vec<&'a Epic> {
        let _guard = self.span.enter();
        let started = Instant::now();
        let completed: HashSet<String> = completed.iter().cloned().collect();
        info!(completed = completed.len(), "Querying parallel Epics");

        let ready = dag.parallel_nodes(&completed);

        for (id, _) in dag.iter().filter(|(id, _)| !completed.contains(*id)) {
            let unmet = missing_dependencies(dag, id, &completed);
            if unmet.is_empty() {
                debug!(epic_id = id, "All dependencies satisfied");
            } else {
                debug!(epic_id = id, waiting_for = ?unmet, "Waiting for dependencies");
            }
        }

        info!(
            ready = ?ready.iter().map(|epic| epic.id.as_str()).collect::<Vec<_>>(),
            elapsed_ms = elapsed_ms(started),
            "Found parallel Epics"
        );
        ready
    }

    /// Epics that are not completed and still wait on at least one dependency.
    ///
    /// Together with [`get_parallel_epics`](Self::get_parallel_epics) and the
    /// completed ids this partitions the graph's nodes.
    pub fn get_queued_epics<'a>(
        &self,
        dag: &'a Dag<Epic>,
        completed: &[String],
    ) -> Vec<QueuedEpic<'a>> {
        let _guard = self.span.enter();
        let started = Instant::now();
        let completed: HashSet<String> = completed.iter().cloned().collect();
        info!(completed = completed.len(), "Querying queued Epics");

        let queued: Vec<QueuedEpic<'a>> = dag
            .iter()
            .filter(|(id, _)| !completed.contains(*id))
            .filter_map(|(id, epic)| {
                let missing = missing_dependencies(dag, id, &completed);
                if missing.is_empty() {
                    return None;
                }
                debug!(epic_id = id, missing = ?missing, "Epic queued");
                Some(QueuedEpic {
                    epic,
                    missing_dependencies: missing,
                })
            })
            .collect();

        info!(
            queued = queued.len(),
            elapsed_ms = elapsed_ms(started),
            "Found queued Epics"
        );
        queued
    }

    fn build<T, F>(&self, records: &[T], dangling: F) -> DependencyResult<Dag<T>>
    where
        T: DependencyNode,
        F: Fn(&str, &str) -> DependencyError,
    {
        let known: HashSet<&str> = records.iter().map(|record| record.node_id()).collect();
        let mut dag = Dag::new();

        for record in records {
            dag.add_node(record.node_id(), record.clone());
            debug!(id = record.node_id(), title = record.title(), "Added node");
        }

        for record in records {
            for dep in record.dependency_ids() {
                if !known.contains(dep.as_str()) {
                    let err = dangling(record.node_id(), dep.as_str());
                    error!(code = err.code(), "{}", err);
                    return Err(err);
                }
                dag.add_edge(record.node_id(), dep.as_str());
                debug!(from = record.node_id(), to = %dep, "Added edge");
            }
        }

        if let Err(err) = self.validate_dag(&dag) {
            error!(code = err.code(), "DAG validation failed: {}", err);
            return Err(err);
        }

        Ok(dag)
    }
}

fn missing_dependencies<T>(dag: &Dag<T>, id: &str, completed: &HashSet<String>) -> Vec<String> {
    dag.dependencies(id)
        .iter()
        .filter(|dep| !completed.contains(*dep))
        .cloned()
        .collect()
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
