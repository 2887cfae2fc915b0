//! Integration tests for epicflow.
//!
//! Library-level flows (graph construction, persistence, crash recovery)
//! run in-process; `cli` drives the built binary in a temporary project.

mod cli;
mod crash_recovery;
mod dag_construction;
mod state_persistence;

use std::fs;
use std::path::Path;

/// Write `docs/epics/epic-<id>.md` under `root`.
pub fn write_epic(root: &Path, id: &str, title: &str, depends_on: &[&str], body: &str) {
    let docs = root.join("docs/epics");
    fs::create_dir_all(&docs).expect("Failed to create docs dir");
    let deps = depends_on.join(", ");
    let content = format!("---\nepic_id: {id}\ntitle: {title}\ndepends_on: [{deps}]\n---\n{body}");
    fs::write(docs.join(format!("epic-{id}.md")), content).expect("Failed to write Epic");
}

/// Three Epics: 1 <- 2 <- 3, with 3 also depending on 1.
pub fn write_chain(root: &Path) {
    write_epic(
        root,
        "1",
        "Foundation",
        &[],
        "## Stories\n1. Story 1.1: Scaffold\n2. Story 1.2: CI\n",
    );
    write_epic(root, "2", "API", &["1"], "");
    write_epic(
        root,
        "3",
        "Frontend",
        &["1", "2"],
        "### Story 3.1: Layout\nBuild the shell.\n\n### Story 3.2: Pages\nRequires Story 3.1.\n",
    );
}
