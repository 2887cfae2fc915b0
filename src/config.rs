//! Configuration file handling.
//!
//! `<base>/config.toml` layered with `EPICFLOW__SECTION__KEY` environment
//! overrides.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

/// Directory name used for both project-local and global state.
pub const BASE_DIR_NAME: &str = ".epicflow";
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// Prefix of environment overrides (`EPICFLOW__SUBAGENT__MAX_CONCURRENT`).
pub const ENV_PREFIX: &str = "EPICFLOW";

const LAYOUT_DIRS: [&str; 3] = ["logs", "projects", "worktrees"];
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Errors that can occur while loading or writing configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path} (run `epicflow init` first)")]
    NotFound { path: PathBuf },

    #[error("Configuration file already exists: {path} (use --force to overwrite)")]
    AlreadyExists { path: PathBuf },

    #[error("IO error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Cannot determine the home directory")]
    NoHomeDir,
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub subagent: SubagentConfig,
    #[serde(default)]
    pub quality_gates: QualityGatesConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub epics: EpicsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            subagent: SubagentConfig::default(),
            quality_gates: QualityGatesConfig::default(),
            git: GitConfig::default(),
            epics: EpicsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.version.trim().is_empty() {
            return Err(ConfigError::Invalid("version must not be empty".to_string()));
        }
        if self.subagent.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "subagent.max_concurrent must be greater than 0".to_string(),
            ));
        }
        if self.subagent.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "subagent.timeout_secs must be greater than 0".to_string(),
            ));
        }
        let level = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of {}, got {:?}",
                LOG_LEVELS.join("/"),
                self.logging.level
            )));
        }
        Ok(())
    }
}

/// Worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentConfig {
    /// Epics developed at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_timeout_secs() -> u64 {
    3600
}

fn default_model() -> String {
    "claude-sonnet-4".to_string()
}

impl Default for SubagentConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            timeout_secs: default_timeout_secs(),
            model: default_model(),
        }
    }
}

/// Named checks run at each stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGatesConfig {
    #[serde(default)]
    pub pre_commit: Vec<String>,
    #[serde(default)]
    pub epic_complete: Vec<String>,
    #[serde(default)]
    pub pre_merge: Vec<String>,
}

impl Default for QualityGatesConfig {
    fn default() -> Self {
        Self {
            pre_commit: vec!["lint".to_string(), "format_check".to_string()],
            epic_complete: vec!["unit_tests".to_string()],
            pre_merge: vec!["integration_tests".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_worktree_base")]
    pub worktree_base: String,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    #[serde(default = "default_auto_cleanup")]
    pub auto_cleanup: bool,
}

fn default_worktree_base() -> String {
    format!("{BASE_DIR_NAME}/worktrees")
}

fn default_branch_prefix() -> String {
    "epic".to_string()
}

fn default_auto_cleanup() -> bool {
    true
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            worktree_base: default_worktree_base(),
            branch_prefix: default_branch_prefix(),
            auto_cleanup: default_auto_cleanup(),
        }
    }
}

/// Where Epic documents live inside a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpicsConfig {
    #[serde(default = "default_docs_path")]
    pub docs_path: String,
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
}

fn default_docs_path() -> String {
    "docs/epics".to_string()
}

fn default_file_pattern() -> String {
    "epic-*.md".to_string()
}

impl Default for EpicsConfig {
    fn default() -> Self {
        Self {
            docs_path: default_docs_path(),
            file_pattern: default_file_pattern(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level filter used when `RUST_LOG` is unset.
    #[serde(default = "default_logging_level")]
    pub level: String,
    /// If true, also log to `<base>/logs/epicflow.log`.
    #[serde(default = "default_logging_file")]
    pub file: bool,
}

fn default_logging_level() -> String {
    "info".to_string()
}

fn default_logging_file() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_logging_level(),
            file: default_logging_file(),
        }
    }
}

/// Loads, validates and writes `<base>/config.toml`.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    base_dir: PathBuf,
    config: Option<AppConfig>,
}

impl ConfigManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            config: None,
        }
    }

    /// Manager rooted at `~/.epicflow`.
    pub fn global() -> ConfigResult<Self> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(Self::new(home.join(BASE_DIR_NAME)))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.base_dir.join(CONFIG_FILE_NAME)
    }

    /// The last successfully loaded configuration.
    pub fn config(&self) -> Option<&AppConfig> {
        self.config.as_ref()
    }

    /// Create the base directory layout and write the default configuration.
    pub fn initialize(&mut self, force: bool) -> ConfigResult<PathBuf> {
        let path = self.config_path();
        if path.exists() && !force {
            return Err(ConfigError::AlreadyExists { path });
        }

        for dir in LAYOUT_DIRS {
            let dir = self.base_dir.join(dir);
            fs::create_dir_all(&dir).map_err(|source| ConfigError::Io { path: dir, source })?;
        }

        let config = AppConfig::default();
        self.save(&config)?;
        self.config = Some(config);
        info!(path = %path.display(), "Configuration initialized");
        Ok(path)
    }

    /// Load and validate the configuration file.
    pub fn load(&mut self) -> ConfigResult<&AppConfig> {
        let config = self.read()?;
        info!(path = %self.config_path().display(), "Configuration loaded");
        let config: &AppConfig = self.config.insert(config);
        Ok(config)
    }

    /// Load again, keeping the previous configuration if that fails.
    pub fn reload(&mut self) -> ConfigResult<&AppConfig> {
        match self.read() {
            Ok(config) => {
                info!("Configuration reloaded");
                let config: &AppConfig = self.config.insert(config);
                Ok(config)
            }
            Err(err) => {
                error!("Configuration reload failed, keeping previous: {}", err);
                Err(err)
            }
        }
    }

    /// Write `config` to the configuration file.
    ///
    /// Goes through a uniquely named temporary file in the base directory
    /// that is renamed over the target; a failed write leaves neither a
    /// partial target nor the temporary file behind.
    pub fn save(&self, config: &AppConfig) -> ConfigResult<()> {
        let path = self.config_path();
        let io_error = |source: io::Error| ConfigError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.base_dir).map_err(io_error)?;

        let content = toml::to_string_pretty(config)?;
        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{CONFIG_FILE_NAME}."))
            .suffix(".tmp")
            .tempfile_in(&self.base_dir)
            .map_err(io_error)?;
        temp.write_all(content.as_bytes()).map_err(io_error)?;
        temp.as_file().sync_all().map_err(io_error)?;
        temp.persist(&path).map_err(|err| io_error(err.error))?;
        Ok(())
    }

    fn read(&self) -> ConfigResult<AppConfig> {
        let path = self.config_path();
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }

        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from(path.as_path()).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}
