//! Epic and Story graphs built from documents on disk.

use std::collections::HashSet;

use epicflow::config::EpicsConfig;
use epicflow::domain::EpicParser;
use epicflow::parallel::{BatchPlanner, DependencyAnalyzer, DependencyError};
use epicflow::state::{EpicState, ExecutionStatus, ProjectState};
use tempfile::TempDir;

use super::{write_chain, write_epic};

fn parser() -> EpicParser {
    EpicParser::from_config(&EpicsConfig::default())
}

#[test]
fn test_documents_to_execution_order() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    write_chain(temp_dir.path());

    let epics = parser().parse_epics(temp_dir.path()).expect("parse");
    assert_eq!(epics.len(), 3);

    let analyzer = DependencyAnalyzer::new();
    let dag = analyzer.build_epic_dag(&epics).expect("dag");
    assert_eq!(dag.node_count(), 3);
    assert_eq!(dag.edge_count(), 3);

    let order: Vec<&str> = dag
        .topological_sort()
        .expect("acyclic")
        .into_iter()
        .map(|epic| epic.id.as_str())
        .collect();
    assert_eq!(order, vec!["1", "2", "3"]);

    let ready: Vec<&str> = analyzer
        .get_parallel_epics(&dag, &["1".to_string()])
        .into_iter()
        .map(|epic| epic.id.as_str())
        .collect();
    assert_eq!(ready, vec!["2"]);

    let queued = analyzer.get_queued_epics(&dag, &["1".to_string()]);
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].epic.id, "3");
    assert_eq!(queued[0].missing_dependencies, vec!["2"]);
}

#[test]
fn test_cycle_across_documents_is_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    write_epic(temp_dir.path(), "1", "One", &["3"], "");
    write_epic(temp_dir.path(), "2", "Two", &["1"], "");
    write_epic(temp_dir.path(), "3", "Three", &["2"], "");

    let epics = parser().parse_epics(temp_dir.path()).expect("parse");
    let err = DependencyAnalyzer::new()
        .build_epic_dag(&epics)
        .expect_err("cycle");

    assert_eq!(err.code(), "DA001");
    let cycle = err.cycle().expect("cycle path");
    assert_eq!(cycle.first(), cycle.last());
    assert_eq!(cycle.len(), 4);
}

#[test]
fn test_unknown_dependency_is_rejected() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    write_epic(temp_dir.path(), "1", "One", &["7"], "");

    let epics = parser().parse_epics(temp_dir.path()).expect("parse");
    let err = DependencyAnalyzer::new()
        .build_epic_dag(&epics)
        .expect_err("invalid dependency");
    assert!(matches!(err, DependencyError::InvalidDependency { .. }));
    assert_eq!(err.code(), "DA002");
}

#[test]
fn test_story_graph_from_headings() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    write_chain(temp_dir.path());

    let epics = parser().parse_epics(temp_dir.path()).expect("parse");
    let frontend = epics.iter().find(|epic| epic.id == "3").expect("Epic 3");
    assert_eq!(frontend.stories.len(), 2);
    assert_eq!(frontend.stories[1].prerequisites, vec!["3.1"]);

    let analyzer = DependencyAnalyzer::new();
    let dag = analyzer
        .build_story_dag(&frontend.stories, Some("3"))
        .expect("story dag");

    let ready: Vec<&str> = analyzer
        .get_parallel_stories(&dag, &HashSet::new())
        .into_iter()
        .map(|story| story.id.as_str())
        .collect();
    assert_eq!(ready, vec!["3.1"]);

    let completed: HashSet<String> = ["3.1".to_string()].into_iter().collect();
    let ready: Vec<&str> = analyzer
        .get_parallel_stories(&dag, &completed)
        .into_iter()
        .map(|story| story.id.as_str())
        .collect();
    assert_eq!(ready, vec!["3.2"]);
}

#[test]
fn test_batch_plan_respects_capacity_and_state() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    write_epic(temp_dir.path(), "1", "Root", &[], "");
    for id in ["2", "3", "4", "5"] {
        write_epic(temp_dir.path(), id, "Leaf", &["1"], "");
    }

    let epics = parser().parse_epics(temp_dir.path()).expect("parse");
    let analyzer = DependencyAnalyzer::new();
    let dag = analyzer.build_epic_dag(&epics).expect("dag");

    let state = ProjectState::new("p-1", "demo")
        .with_epic(EpicState::new("1").with_status(ExecutionStatus::Completed))
        .with_epic(EpicState::new("2").with_status(ExecutionStatus::Developing))
        .with_epic(EpicState::new("3").with_status(ExecutionStatus::Failed));

    let plan = BatchPlanner::new(analyzer).plan(&dag, Some(&state), 2);
    let summary = plan.summary();

    assert_eq!(summary.completed, vec!["1"]);
    assert_eq!(summary.in_flight, vec!["2"]);
    assert_eq!(summary.held, vec!["3"]);
    assert_eq!(summary.launch, vec!["4"]);
    assert_eq!(summary.deferred, vec!["5"]);
    assert!(summary.queued.is_empty());
}
