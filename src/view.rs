//! Read-only dependency views for terminal output.

use std::collections::HashMap;

use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

use crate::domain::Epic;
use crate::parallel::Dag;
use crate::state::ProjectState;

/// Status used for dependencies that name no known Epic.
pub const UNKNOWN_STATUS: &str = "unknown";

const STATUS_ICONS: [(&str, &str); 7] = [
    ("completed", "✓"),
    ("developing", "⚙"),
    ("queued", "⏳"),
    ("paused", "⏸"),
    ("failed", "✗"),
    ("requires_cleanup", "⚠"),
    (UNKNOWN_STATUS, "?"),
];

pub fn status_icon(status: &str) -> &'static str {
    STATUS_ICONS
        .iter()
        .find(|(name, _)| *name == status)
        .map_or("?", |(_, icon)| *icon)
}

/// `requires_cleanup` -> `Requires cleanup`.
pub fn status_label(status: &str) -> String {
    let spaced = status.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyLine {
    pub epic_id: String,
    pub title: String,
    pub status: String,
}

/// Dependency summary of one Epic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpicDependencyView {
    pub epic_id: String,
    pub epic_title: String,
    pub dependencies: Vec<DependencyLine>,
    /// Dependencies not yet completed.
    pub missing_dependencies: Vec<String>,
    /// Ready to start now.
    pub is_parallel: bool,
    /// Waiting on at least one dependency.
    pub is_queued: bool,
}

/// Build the view of `epic`. Statuses come from `state`; Epics without a
/// record count as queued.
pub fn epic_dependency_view(
    epic: &Epic,
    all_epics: &[Epic],
    state: Option<&ProjectState>,
) -> EpicDependencyView {
    let lookup: HashMap<&str, &Epic> = all_epics.iter().map(|e| (e.id.as_str(), e)).collect();
    let status_of = |id: &str| {
        state
            .and_then(|project| project.status_of(id))
            .unwrap_or_default()
    };

    let dependencies = epic
        .depends_on
        .iter()
        .map(|dep_id| match lookup.get(dep_id.as_str()) {
            Some(dep) => DependencyLine {
                epic_id: dep_id.clone(),
                title: dep.title.clone(),
                status: status_of(dep_id.as_str()).as_str().to_string(),
            },
            None => DependencyLine {
                epic_id: dep_id.clone(),
                title: "Unknown".to_string(),
                status: UNKNOWN_STATUS.to_string(),
            },
        })
        .collect();

    let missing_dependencies: Vec<String> = epic
        .depends_on
        .iter()
        .filter(|dep_id| !status_of(dep_id.as_str()).is_completed())
        .cloned()
        .collect();
    let self_completed = status_of(epic.id.as_str()).is_completed();

    EpicDependencyView {
        epic_id: epic.id.clone(),
        epic_title: epic.title.clone(),
        dependencies,
        is_parallel: missing_dependencies.is_empty() && !self_completed,
        is_queued: !missing_dependencies.is_empty(),
        missing_dependencies,
    }
}

/// Views for every Epic, in input order.
pub fn all_epic_views(all_epics: &[Epic], state: Option<&ProjectState>) -> Vec<EpicDependencyView> {
    let views: Vec<EpicDependencyView> = all_epics
        .iter()
        .map(|epic| epic_dependency_view(epic, all_epics, state))
        .collect();
    tracing::debug!(count = views.len(), "Generated dependency views");
    views
}

/// One line per dependency, or `None` when there are none.
pub fn format_dependencies(view: &EpicDependencyView) -> String {
    if view.dependencies.is_empty() {
        return "None".to_string();
    }

    view.dependencies
        .iter()
        .map(|dep| {
            format!(
                "  - Epic {}: {} ({} {})",
                dep.epic_id,
                dep.title,
                status_icon(&dep.status),
                status_label(&dep.status)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Graphviz DOT of the Epic graph. Arrows point from a dependency to the
/// Epic that waits on it.
pub fn to_dot(dag: &Dag<Epic>) -> String {
    let mut graph: DiGraph<String, &'static str> = DiGraph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();

    for (id, epic) in dag.iter() {
        let index = graph.add_node(format!("{}: {}", id, epic.title));
        indices.insert(id, index);
    }
    for (id, _) in dag.iter() {
        for dep in dag.dependencies(id) {
            if let (Some(&from), Some(&to)) = (indices.get(dep.as_str()), indices.get(id)) {
                graph.add_edge(from, to, "");
            }
        }
    }

    format!("{}", Dot::with_config(&graph, &[Config::EdgeNoLabel]))
}
