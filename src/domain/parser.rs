//! Epic document parser.
//!
//! Epics are Markdown files with a YAML frontmatter block:
//!
//! ```text
//! ---
//! epic_id: 3
//! title: Payment API
//! depends_on: [1, 2]
//! priority: high
//! ---
//! ## Stories
//! 1. Story 3.1: Define schema
//! 2. Story 3.2: Wire endpoints
//! ```
//!
//! Stories come either from a numbered list under a `## Stories` heading or,
//! when there is none, from `### Story X.Y: Title` headings whose bodies may
//! declare prerequisites.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::EpicsConfig;
use crate::domain::{Epic, ExecutionMode, Priority, Story, ValidationError};

const MAX_DESCRIPTION_CHARS: usize = 500;

/// Errors raised while reading a single Epic document.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("{path} has no frontmatter block")]
    MissingFrontmatter { path: PathBuf },

    #[error("{path} has invalid frontmatter: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("{path} metadata invalid: {reason}")]
    InvalidMetadata { path: PathBuf, reason: String },

    #[error("{path} describes an invalid Epic: {source}")]
    InvalidEpic {
        path: PathBuf,
        source: ValidationError,
    },

    #[error("invalid Epic file pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

#[derive(Debug, Default, Deserialize)]
struct Frontmatter {
    epic_id: Option<Value>,
    title: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    depends_on: Option<Value>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    execution_mode: Option<String>,
    #[serde(default)]
    story_concurrency: Option<u32>,
}

/// Reads Epic documents from a project tree.
#[derive(Debug, Clone)]
pub struct EpicParser {
    docs_path: PathBuf,
    file_pattern: String,
}

impl EpicParser {
    pub fn new(docs_path: impl Into<PathBuf>, file_pattern: impl Into<String>) -> Self {
        Self {
            docs_path: docs_path.into(),
            file_pattern: file_pattern.into(),
        }
    }

    pub fn from_config(config: &EpicsConfig) -> Self {
        Self::new(&config.docs_path, &config.file_pattern)
    }

    /// Parse every Epic document under `project_root`.
    ///
    /// Documents that fail to parse are logged and skipped. Results are
    /// ordered by file path.
    pub fn parse_epics(&self, project_root: &Path) -> Result<Vec<Epic>, ParseError> {
        let base = project_root.join(&self.docs_path);
        let pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&base.to_string_lossy()),
            self.file_pattern
        );
        info!(pattern = %pattern, "Parsing Epic documents");

        let mut files: Vec<PathBuf> = glob::glob(&pattern)?.filter_map(Result::ok).collect();
        files.sort();

        if files.is_empty() {
            warn!(pattern = %pattern, "No Epic files found");
            return Ok(Vec::new());
        }

        let mut epics = Vec::with_capacity(files.len());
        let mut failed = 0usize;
        for file in &files {
            match self.parse_single_epic(file) {
                Ok(epic) => epics.push(epic),
                Err(err) => {
                    failed += 1;
                    warn!("Skipping Epic document: {}", err);
                }
            }
        }

        info!(parsed = epics.len(), failed, "Epic parsing completed");
        Ok(epics)
    }

    /// Parse one Epic document.
    pub fn parse_single_epic(&self, path: &Path) -> Result<Epic, ParseError> {
        debug!(path = %path.display(), "Parsing Epic file");
        let content = fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_document(path, &content)
    }

    /// Parse Epic document text. `path` is only used in error messages.
    pub fn parse_document(&self, path: &Path, content: &str) -> Result<Epic, ParseError> {
        let (yaml, body) = split_frontmatter(content).ok_or_else(|| ParseError::MissingFrontmatter {
            path: path.to_path_buf(),
        })?;

        let meta: Frontmatter = serde_yaml::from_str::<Option<Frontmatter>>(yaml)
            .map_err(|source| ParseError::Yaml {
                path: path.to_path_buf(),
                source,
            })?
            .unwrap_or_default();

        let invalid = |reason: String| ParseError::InvalidMetadata {
            path: path.to_path_buf(),
            reason,
        };

        let epic_id = match meta.epic_id.as_ref() {
            None => return Err(invalid("Missing required field: epic_id".to_string())),
            Some(value) => scalar_to_string(value)
                .ok_or_else(|| invalid("epic_id must be an integer or string".to_string()))?,
        };
        let title = match meta.title.as_ref() {
            None => return Err(invalid("Missing required field: title".to_string())),
            Some(Value::String(title)) => title.clone(),
            Some(_) => return Err(invalid("title must be a string".to_string())),
        };

        let depends_on = match meta.depends_on.as_ref() {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(items)) => items
                .iter()
                .map(|item| {
                    scalar_to_string(item)
                        .ok_or_else(|| invalid(format!("depends_on entry {item:?} is not an id")))
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(invalid("depends_on must be a list".to_string())),
        };

        let priority = match meta.priority.as_deref() {
            Some(raw) => raw
                .parse::<Priority>()
                .map_err(|err| invalid(err.to_string()))?,
            None => Priority::default(),
        };
        let execution_mode = match meta.execution_mode.as_deref() {
            Some(raw) => raw
                .parse::<ExecutionMode>()
                .map_err(|err| invalid(err.to_string()))?,
            None => ExecutionMode::default(),
        };

        let mut epic = Epic::new(epic_id.clone(), title)
            .with_description(meta.description.unwrap_or_default())
            .with_depends_on(depends_on)
            .with_priority(priority)
            .with_execution_mode(execution_mode)
            .with_stories(parse_stories(body, &epic_id));
        if let Some(concurrency) = meta.story_concurrency {
            epic = epic.with_story_concurrency(concurrency);
        }

        epic.validate().map_err(|source| ParseError::InvalidEpic {
            path: path.to_path_buf(),
            source,
        })?;

        info!(epic_id = %epic.id, title = %epic.title, stories = epic.stories.len(), "Parsed Epic");
        Ok(epic)
    }
}

/// Split `---` delimited frontmatter from the document body.
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let rest = content
        .strip_prefix("---\r\n")
        .or_else(|| content.strip_prefix("---\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed == "---" || trimmed == "..." {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Stringify an id given as a YAML string or number.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

const STORIES_SECTION: &str = r"(?is)##\s+Stories\s*\n(.*?)(?:\n##|\z)";
const NUMBERED_STORY: &str = r"(?m)^\d+\.\s+Story\s+(\d+\.\d+):\s+(.+?)\r?$";
const HEADING_STORY: &str = r"(?m)^###\s+Story\s+(\d+\.\d+):\s+(.+?)\r?$";
const INLINE_PREREQUISITES: &str = r"(?i)prerequisites:\s*\[([^\]]+)\]";
const ITEM_ID: &str = r"^\d+\.\d+$";
const BULLET_PREREQUISITE: &str = r"(?m)^\s*[-*]\s+(?:Story\s+)?(\d+\.\d+)";
const REQUIREMENT_LINE: &str = r"(?mi)^.*(?:Requires?|Depends?\s+on|After).*$";
const ANY_ID: &str = r"\b(\d+\.\d+)\b";
const SHORT_ID: &str = r"^\d{1,2}\.\d{1,2}$";

/// Compile a pattern constant once. Every constant is compiled by
/// `test_all_patterns_compile`.
fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("pattern constants are valid regexes"))
}

macro_rules! pattern {
    ($name:ident, $pattern:expr) => {
        fn $name() -> &'static Regex {
            static CELL: OnceLock<Regex> = OnceLock::new();
            regex(&CELL, $pattern)
        }
    };
}

pattern!(stories_section, STORIES_SECTION);
pattern!(numbered_story, NUMBERED_STORY);
pattern!(heading_story, HEADING_STORY);
pattern!(inline_prerequisites, INLINE_PREREQUISITES);
pattern!(item_id, ITEM_ID);
pattern!(bullet_prerequisite, BULLET_PREREQUISITE);
pattern!(requirement_line, REQUIREMENT_LINE);
pattern!(any_id, ANY_ID);
pattern!(short_id, SHORT_ID);

/// Extract the Stories of an Epic from its Markdown body.
pub fn parse_stories(body: &str, epic_id: &str) -> Vec<Story> {
    let mut stories = stories_from_numbered_list(body);
    if stories.is_empty() {
        stories = stories_from_headings(body);
    }

    if stories.is_empty() {
        warn!(epic_id, "Epic has no Stories defined");
        return stories;
    }

    for story in &stories {
        if !story.belongs_to(epic_id) {
            warn!(story_id = %story.id, epic_id, "Story ID does not match Epic");
        }
    }
    debug!(epic_id, count = stories.len(), "Parsed Stories");
    stories
}

fn stories_from_numbered_list(body: &str) -> Vec<Story> {
    let Some(section) = stories_section().captures(body).and_then(|caps| caps.get(1)) else {
        return Vec::new();
    };

    numbered_story()
        .captures_iter(section.as_str())
        .map(|caps| Story::new(&caps[1], caps[2].trim()))
        .collect()
}

fn stories_from_headings(body: &str) -> Vec<Story> {
    let matches: Vec<_> = heading_story().captures_iter(body).collect();
    matches
        .iter()
        .enumerate()
        .filter_map(|(index, caps)| {
            let whole = caps.get(0)?;
            let end = matches
                .get(index + 1)
                .and_then(|next| next.get(0))
                .map_or(body.len(), |next| next.start());
            let description = body[whole.end()..end].trim();
            let prerequisites = extract_prerequisites(description);

            Some(
                Story::new(&caps[1], caps[2].trim())
                    .with_description(description.chars().take(MAX_DESCRIPTION_CHARS).collect::<String>())
                    .with_prerequisites(prerequisites),
            )
        })
        .collect()
}

/// Collect prerequisite Story ids declared in a Story description.
///
/// Recognises `prerequisites: [3.1, 3.2]`, bullet items (`- Story 3.1`,
/// `- 3.1`) and sentences such as `Requires Story 3.1 and Story 3.2`.
/// The result is deduplicated and sorted.
pub fn extract_prerequisites(description: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    if let Some(list) = inline_prerequisites()
        .captures(description)
        .and_then(|caps| caps.get(1))
    {
        found.extend(
            list.as_str()
                .split(',')
                .map(|item| item.trim().trim_matches(|c| c == '"' || c == '\''))
                .filter(|item| item_id().is_match(item))
                .map(str::to_string),
        );
    }

    found.extend(
        bullet_prerequisite()
            .captures_iter(description)
            .map(|caps| caps[1].to_string()),
    );

    for line in requirement_line().find_iter(description) {
        found.extend(
            any_id()
                .captures_iter(line.as_str())
                .map(|caps| caps[1].to_string())
                .filter(|id| short_id().is_match(id)),
        );
    }

    found.sort();
    found.dedup();
    found
}
