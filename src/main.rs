use std::collections::HashSet;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use epicflow::config::{AppConfig, ConfigError, ConfigManager, BASE_DIR_NAME, CONFIG_FILE_NAME};
use epicflow::domain::{Epic, EpicParser, ParseError};
use epicflow::logging::{self, LogGuard, LogSettings, LoggingError};
use epicflow::parallel::{BatchPlanner, BatchSummary, CycleError, Dag, DependencyAnalyzer, DependencyError};
use epicflow::state::{DataStore, EpicUpdate, ExecutionStatus, ProjectState, StateError, StateManager};
use epicflow::view::{self, EpicDependencyView};
use epicflow::watcher::{is_epic_document, FileWatcher, WatchError};

#[derive(Parser, Debug)]
#[command(
    name = "epicflow",
    version,
    about = "Plan Epic/Story work from dependency graphs and track execution state"
)]
struct Cli {
    /// State directory (default: ./.epicflow)
    #[arg(long, global = true, value_name = "DIR")]
    base_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the state directory layout and a default config.toml
    Init {
        /// Overwrite an existing config.toml
        #[arg(long)]
        force: bool,
        /// Initialize ~/.epicflow instead of the local directory
        #[arg(long)]
        global: bool,
    },
    /// Show execution order, ready and queued Epics, and the next batch
    Plan {
        #[arg(long, default_value = ".")]
        project: PathBuf,
        /// Tracked project whose statuses drive the plan
        #[arg(long)]
        project_id: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show the Story graph of one Epic
    Stories {
        epic_id: String,
        #[arg(long, default_value = ".")]
        project: PathBuf,
        /// Completed Story ids
        #[arg(long, num_args = 1..)]
        completed: Vec<String>,
    },
    /// Register every Epic of a project as queued
    Track {
        project_id: String,
        project_name: String,
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },
    /// Show tracked projects
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Update the execution state of one Epic
    Update {
        project_id: String,
        epic_id: String,
        #[arg(long)]
        status: Option<ExecutionStatus>,
        #[arg(long)]
        progress: Option<f64>,
        #[arg(long, conflicts_with = "clear_agent")]
        agent: Option<String>,
        #[arg(long)]
        clear_agent: bool,
        #[arg(long, conflicts_with = "clear_worktree")]
        worktree: Option<PathBuf>,
        #[arg(long)]
        clear_worktree: bool,
        #[arg(long)]
        complete_story: Option<String>,
    },
    /// Print the Epic graph in Graphviz DOT format
    Graph {
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },
    /// Re-plan whenever an Epic document or config.toml changes
    Watch {
        #[arg(long, default_value = ".")]
        project: PathBuf,
        #[arg(long)]
        project_id: Option<String>,
        /// Quiet period before a change is acted on
        #[arg(long, default_value_t = 1000, value_name = "MS")]
        debounce_ms: u64,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("[{}] {}", .0.code(), .0)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) => 2,
            CliError::Dependency(_) | CliError::Cycle(_) => 3,
            CliError::State(_) => 4,
            _ => 1,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        process::exit(err.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let base_dir = cli
        .base_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(BASE_DIR_NAME));

    if let Commands::Init { force, global } = cli.command {
        let _log_guard = init_logging(&AppConfig::default(), None, cli.verbose)?;
        let mut manager = if global {
            ConfigManager::global()?
        } else {
            ConfigManager::new(&base_dir)
        };
        let path = manager.initialize(force)?;
        println!("Initialized {}", path.display());
        return Ok(());
    }

    let config = load_config(&base_dir)?;
    let _log_guard = init_logging(&config, Some(&base_dir), cli.verbose)?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Plan {
            project,
            project_id,
            json,
        } => plan(&config, &base_dir, &project, project_id.as_deref(), json),
        Commands::Stories {
            epic_id,
            project,
            completed,
        } => stories(&config, &project, &epic_id, completed),
        Commands::Track {
            project_id,
            project_name,
            project,
        } => track(&config, &base_dir, &project, &project_id, &project_name),
        Commands::Status { json } => status(&base_dir, json),
        Commands::Update {
            project_id,
            epic_id,
            status,
            progress,
            agent,
            clear_agent,
            worktree,
            clear_worktree,
            complete_story,
        } => {
            let mut update = EpicUpdate::new();
            update.status = status;
            update.progress = progress;
            if clear_agent {
                update = update.clear_agent();
            } else if let Some(agent) = agent {
                update = update.agent(agent);
            }
            if clear_worktree {
                update = update.clear_worktree();
            } else if let Some(worktree) = worktree {
                update = update.worktree(worktree);
            }
            update.completed_story = complete_story;
            update_epic(&base_dir, &project_id, &epic_id, &update)
        }
        Commands::Graph { project } => {
            let epics = parse_epics(&config, &project)?;
            let dag = analyzer().build_epic_dag(&epics)?;
            print!("{}", view::to_dot(&dag));
            Ok(())
        }
        Commands::Watch {
            project,
            project_id,
            debounce_ms,
        } => watch(
            config,
            &base_dir,
            &project,
            project_id.as_deref(),
            Duration::from_millis(debounce_ms),
        ),
    }
}

/// Configuration from `<base>/config.toml`, or defaults when there is none.
fn load_config(base_dir: &Path) -> Result<AppConfig, CliError> {
    let mut manager = ConfigManager::new(base_dir);
    match manager.load() {
        Ok(config) => Ok(config.clone()),
        Err(ConfigError::NotFound { .. }) => Ok(AppConfig::default()),
        Err(err) => Err(err.into()),
    }
}

fn init_logging(config: &AppConfig, base_dir: Option<&Path>, verbose: bool) -> Result<LogGuard, CliError> {
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    let mut settings = LogSettings::new(level);
    if let Some(base_dir) = base_dir.filter(|dir| config.logging.file && dir.is_dir()) {
        settings = settings
            .with_log_dir(base_dir.join("logs"))
            .with_epic_logs(base_dir);
    }
    Ok(logging::init(&settings)?)
}

fn analyzer() -> DependencyAnalyzer {
    DependencyAnalyzer::new().with_span(logging::component_span("dependency_analyzer"))
}

fn state_manager(base_dir: &Path) -> StateManager {
    StateManager::new(base_dir, DataStore::new()).with_span(logging::component_span("state_manager"))
}

fn parse_epics(config: &AppConfig, project: &Path) -> Result<Vec<Epic>, CliError> {
    Ok(EpicParser::from_config(&config.epics).parse_epics(project)?)
}

fn heading(text: &str) -> String {
    if std::io::stdout().is_terminal() {
        text.bold().to_string()
    } else {
        text.to_string()
    }
}

#[derive(Serialize)]
struct PlanOutput<'a> {
    order: Vec<&'a str>,
    batch: BatchSummary,
    views: Vec<EpicDependencyView>,
}

fn plan(
    config: &AppConfig,
    base_dir: &Path,
    project: &Path,
    project_id: Option<&str>,
    json: bool,
) -> Result<(), CliError> {
    let epics = parse_epics(config, project)?;
    let analyzer = analyzer();
    let dag = analyzer.build_epic_dag(&epics)?;
    let order: Vec<&str> = dag.topological_sort()?.into_iter().map(|epic| epic.id.as_str()).collect();

    let mut manager = state_manager(base_dir);
    let state: Option<ProjectState> = match project_id {
        Some(id) => {
            manager.load_all_states()?;
            let state = manager.get_project_state(id).cloned();
            if state.is_none() {
                return Err(StateError::ProjectNotFound(id.to_string()).into());
            }
            state
        }
        None => None,
    };

    let batch = BatchPlanner::new(analyzer).plan(&dag, state.as_ref(), config.subagent.max_concurrent);
    let views = view::all_epic_views(&epics, state.as_ref());

    if json {
        let output = PlanOutput {
            order,
            batch: batch.summary(),
            views,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", heading("Execution order"));
    println!("  {}", order.join(" -> "));
    println!();
    println!("{}", heading("Epics"));
    for epic_view in &views {
        let marker = if epic_view.is_parallel {
            "ready"
        } else if epic_view.is_queued {
            "queued"
        } else {
            "done"
        };
        println!("Epic {}: {} [{}]", epic_view.epic_id, epic_view.epic_title, marker);
        println!("{}", view::format_dependencies(epic_view));
    }
    println!();
    println!("{}", heading("Next batch"));
    print_ids("launch", &batch.launch.iter().map(|epic| epic.id.as_str()).collect::<Vec<_>>());
    print_ids("deferred", &batch.deferred.iter().map(|epic| epic.id.as_str()).collect::<Vec<_>>());
    print_ids("in flight", &batch.in_flight.iter().map(|epic| epic.id.as_str()).collect::<Vec<_>>());
    print_ids("held", &batch.held.iter().map(|epic| epic.id.as_str()).collect::<Vec<_>>());
    for queued in &batch.queued {
        println!(
            "  waiting: Epic {} (needs {})",
            queued.epic.id,
            queued.missing_dependencies.join(", ")
        );
    }
    Ok(())
}

fn print_ids(label: &str, ids: &[&str]) {
    if ids.is_empty() {
        println!("  {label}: -");
    } else {
        println!("  {label}: {}", ids.join(", "));
    }
}

fn stories(
    config: &AppConfig,
    project: &Path,
    epic_id: &str,
    completed: Vec<String>,
) -> Result<(), CliError> {
    let epics = parse_epics(config, project)?;
    let epic = epics
        .iter()
        .find(|epic| epic.id == epic_id)
        .ok_or_else(|| CliError::Usage(format!("Epic {epic_id} not found in {}", project.display())))?;

    let analyzer = DependencyAnalyzer::new().with_span(logging::epic_span(epic_id));
    let dag: Dag<_> = analyzer.build_story_dag(&epic.stories, Some(epic_id))?;
    let completed: HashSet<String> = completed.into_iter().collect();

    println!("{}", heading(&format!("Epic {}: {}", epic.id, epic.title)));
    for story in dag.topological_sort()? {
        let mark = if completed.contains(&story.id) { "x" } else { " " };
        println!("  [{mark}] {} {}", story.id, story.title);
    }
    let ready: Vec<&str> = analyzer
        .get_parallel_stories(&dag, &completed)
        .into_iter()
        .map(|story| story.id.as_str())
        .collect();
    print_ids("ready", &ready);
    Ok(())
}

fn track(
    config: &AppConfig,
    base_dir: &Path,
    project: &Path,
    project_id: &str,
    project_name: &str,
) -> Result<(), CliError> {
    let epics = parse_epics(config, project)?;
    analyzer().build_epic_dag(&epics)?;

    let mut manager = state_manager(base_dir);
    manager.load_all_states()?;
    let added = manager.track_epics(project_id, project_name, epics.iter().map(|epic| epic.id.clone()))?;
    println!("Tracked {added} new Epic(s) in project {project_id}");
    Ok(())
}

fn status(base_dir: &Path, json: bool) -> Result<(), CliError> {
    let mut manager = state_manager(base_dir);
    let mut projects: Vec<&ProjectState> = manager.load_all_states()?.values().collect();
    projects.sort_by(|a, b| a.project_id.cmp(&b.project_id));

    if json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
        return Ok(());
    }
    if projects.is_empty() {
        println!("No tracked projects");
        return Ok(());
    }

    for project in projects {
        println!(
            "{}",
            heading(&format!("{} ({})", project.project_name, project.project_id))
        );
        for epic in project.epics.values() {
            let status = epic.status.as_str();
            println!(
                "  Epic {}: {} {} {:.0}%",
                epic.epic_id,
                view::status_icon(status),
                view::status_label(status),
                epic.progress
            );
        }
    }
    Ok(())
}

fn update_epic(
    base_dir: &Path,
    project_id: &str,
    epic_id: &str,
    update: &EpicUpdate,
) -> Result<(), CliError> {
    if update.is_empty() {
        return Err(CliError::Usage("nothing to update".to_string()));
    }

    let mut manager = state_manager(base_dir);
    manager.load_all_states()?;
    manager.update_epic_state(project_id, epic_id, update)?;
    debug!(project_id, epic_id, "Epic state updated");
    println!("Updated Epic {epic_id} in project {project_id}");
    Ok(())
}

fn is_config_file(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == CONFIG_FILE_NAME)
}

fn replan(config: &AppConfig, base_dir: &Path, project: &Path, project_id: Option<&str>) {
    if let Err(err) = plan(config, base_dir, project, project_id, false) {
        eprintln!("error: {err}");
    }
}

/// Runs until interrupted. Plan failures are reported and watching goes on;
/// an invalid config.toml keeps the previous configuration.
fn watch(
    mut config: AppConfig,
    base_dir: &Path,
    project: &Path,
    project_id: Option<&str>,
    debounce: Duration,
) -> Result<(), CliError> {
    let mut config_manager = ConfigManager::new(base_dir);
    if config_manager.config_path().exists() {
        config_manager.load()?;
    }

    let docs_dir = project.join(&config.epics.docs_path);
    let mut watcher = FileWatcher::new(debounce)?
        .with_filter(|path| is_epic_document(path) || is_config_file(path))
        .with_span(logging::component_span("file_watcher"));
    watcher.watch(&docs_dir, true)?;
    if base_dir.is_dir() {
        watcher.watch(base_dir, false)?;
    }

    replan(&config, base_dir, project, project_id);
    loop {
        let changes = watcher.poll(Duration::from_secs(60))?;
        let mut needs_plan = false;
        for change in &changes {
            if is_config_file(&change.path) {
                match config_manager.reload() {
                    Ok(reloaded) => {
                        config = reloaded.clone();
                        needs_plan = true;
                    }
                    Err(err) => warn!("Keeping previous configuration: {}", err),
                }
            } else {
                info!(path = %change.path.display(), kind = change.kind.as_str(), "Epic document changed");
                needs_plan = true;
            }
        }
        if needs_plan {
            println!();
            replan(&config, base_dir, project, project_id);
        }
    }
}
