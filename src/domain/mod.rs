//! Work-item records: Epics and the Stories they own.
//!
//! These are the shapes handed to the dependency analyzer. Field-level
//! validation lives here; referential and structural checks happen when a
//! graph is built.

pub mod epic;
pub mod parser;
pub mod story;

use thiserror::Error;

pub use epic::{Epic, EpicStatus, ExecutionMode, Priority};
pub use parser::{EpicParser, ParseError};
pub use story::{Story, StoryStatus};

/// Shape violations on an Epic or Story record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A field holds a value outside its allowed set.
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidValue {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    /// Story id without the `<epic>.<n>` separator.
    #[error("Invalid Story ID format: {0} (expected X.Y)")]
    InvalidStoryId(String),

    /// Story concurrency hint below one.
    #[error("Invalid story_concurrency: {0} (must be >= 1)")]
    InvalidConcurrency(u32),

    /// Prerequisite that is not part of the owning Epic.
    #[error("Invalid prerequisite {prerequisite} for Story {story}: not in Epic story list")]
    UnknownPrerequisite { story: String, prerequisite: String },
}
