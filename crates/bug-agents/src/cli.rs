//! Command-line surface.
//!
//! ```bash
//! # Classify a failure and file/skip a ticket
//! bug-agents log --feature-id 6 --job-name lint --step-name "Run ESLint" --log-range L10-L20
//! bug-agents log --event-file failure.json
//!
//! # Record the result of a fix attempt
//! bug-agents resolve --issue-id 42 --run-status success --action mark_as_resolved
//!
//! # Dry run against an in-memory tracker seeded from a file
//! bug-agents --dry-run --seed tickets.json log --event-file failure.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;

use triage::{
    BoundedTracker, EventBus, FailureEvent, FailureLogger, InMemoryTracker, RawResolutionRequest,
    Resolver, SharedDispatcher, SharedTracker, TrackedIssue, TriageError,
};

use crate::config::AgentConfig;
use crate::github::GithubTracker;
use crate::github_dispatch::RepositoryDispatcher;
use crate::telemetry::{append_outcome, LogFormat, OutcomeRecord};

#[derive(Parser, Debug)]
#[command(author, version, about = "CI failure triage: deduplicate, track retries, resolve")]
pub struct Cli {
    /// TOML config file (env `TRIAGE_*` variables override it)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Use an in-memory tracker and event bus; nothing leaves the process
    #[arg(long, global = true, default_value_t = false)]
    pub dry_run: bool,

    /// JSON array of tickets to preload into the dry-run tracker
    #[arg(long, global = true, requires = "dry_run")]
    pub seed: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Classify a CI failure and create a ticket unless it is a duplicate
    Log(LogArgs),
    /// Apply a fix-attempt result to a ticket
    Resolve(ResolveArgs),
    /// Validate configuration and print the effective values
    CheckConfig,
}

#[derive(Args, Debug, Default)]
pub struct LogArgs {
    /// Read the whole event from a JSON file instead of flags
    #[arg(long, conflicts_with_all = ["feature_id", "job_name", "step_name"])]
    pub event_file: Option<PathBuf>,

    #[arg(long)]
    pub feature_id: Option<String>,
    #[arg(long)]
    pub job_name: Option<String>,
    #[arg(long)]
    pub step_name: Option<String>,
    #[arg(long, default_value = "")]
    pub log_range: String,
    #[arg(long, default_value = "")]
    pub branch_name: String,
    #[arg(long, default_value = "")]
    pub run_id: String,
    #[arg(long)]
    pub pr_url: Option<String>,
}

impl LogArgs {
    /// Missing identity fields become empty strings; the logger rejects
    /// them with an error naming the field.
    pub fn into_event(self) -> Result<FailureEvent> {
        if let Some(path) = &self.event_file {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read event file {}", path.display()))?;
            return serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse event file {}", path.display()));
        }
        Ok(FailureEvent {
            feature_id: self.feature_id.unwrap_or_default(),
            job_name: self.job_name.unwrap_or_default(),
            step_name: self.step_name.unwrap_or_default(),
            log_range: self.log_range,
            branch_name: self.branch_name,
            run_id: self.run_id,
            pr_url: self.pr_url.filter(|u| !u.trim().is_empty()),
        })
    }
}

#[derive(Args, Debug)]
pub struct ResolveArgs {
    #[arg(long)]
    pub issue_id: String,
    /// success | failure
    #[arg(long)]
    pub run_status: String,
    /// mark_previous_as_pending | mark_as_resolved
    #[arg(long)]
    pub action: String,
}

impl From<ResolveArgs> for RawResolutionRequest {
    fn from(args: ResolveArgs) -> Self {
        Self {
            issue_id: args.issue_id,
            run_status: args.run_status,
            action: args.action,
        }
    }
}

/// Tracker and dispatcher selected by the config and `--dry-run`.
pub struct Backend {
    pub tracker: SharedTracker,
    pub dispatcher: Option<SharedDispatcher>,
    pub name: &'static str,
}

impl Backend {
    /// Build the backend for this run; the dry run never touches the network.
    pub async fn build(config: &AgentConfig, dry_run: bool, seed: Option<&Path>) -> Result<Self> {
        if dry_run {
            let tracker = InMemoryTracker::new();
            if let Some(path) = seed {
                for issue in load_seed(path)? {
                    tracker.insert(issue).await;
                }
            }
            let dispatcher: Option<SharedDispatcher> = config
                .dispatch
                .enabled
                .then(|| EventBus::new().shared() as SharedDispatcher);
            return Ok(Self {
                tracker: Arc::new(tracker),
                dispatcher,
                name: "in_memory",
            });
        }

        let tracker = GithubTracker::new(config.github.clone())
            .context("Failed to set up GitHub tracker")?;
        let dispatcher = if config.dispatch.enabled {
            let dispatcher = RepositoryDispatcher::new(&config.github)
                .context("Failed to set up repository dispatcher")?;
            Some(Arc::new(dispatcher) as SharedDispatcher)
        } else {
            None
        };
        Ok(Self {
            tracker: Arc::new(tracker),
            dispatcher,
            name: "github",
        })
    }
}

fn load_seed(path: &Path) -> Result<Vec<TrackedIssue>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse seed file {}", path.display()))
}

/// Run one command and return the JSON printed on stdout.
pub async fn run(cli: Cli) -> Result<Value> {
    let config = load_config(cli.config.as_deref(), cli.dry_run)?;

    match cli.command {
        Command::CheckConfig => Ok(json!({
            "status": "ok",
            "dry_run": cli.dry_run,
            "config": config,
        })),
        Command::Log(args) => {
            let event = args.into_event()?;
            let backend = Backend::build(&config, cli.dry_run, cli.seed.as_deref()).await?;
            info!(backend = backend.name, feature_id = %event.feature_id, "Logging CI failure");

            let mut logger = FailureLogger::new(backend.tracker, config.logger_settings());
            if let Some(dispatcher) = backend.dispatcher {
                logger = logger.with_dispatcher(dispatcher);
            }

            let started = Instant::now();
            let result = logger.log_failure(&event).await;
            let record = match &result {
                Ok(outcome) => OutcomeRecord::from_failure(&event, outcome, started.elapsed()),
                Err(e) => OutcomeRecord::from_error(e, started.elapsed()),
            };
            record_outcome(&config, &record);
            Ok(serde_json::to_value(result?)?)
        }
        Command::Resolve(args) => {
            let backend = Backend::build(&config, cli.dry_run, cli.seed.as_deref()).await?;
            let tracker = BoundedTracker::new(backend.tracker, config.tracker_timeout());
            let resolver = Resolver::new(tracker.shared());

            let started = Instant::now();
            let result = resolver.resolve_raw(&args.into()).await;
            let record = match &result {
                Ok(report) => OutcomeRecord::from_resolution(report, started.elapsed()),
                Err(e) => OutcomeRecord::from_error(e, started.elapsed()),
            };
            record_outcome(&config, &record);
            Ok(serde_json::to_value(result?)?)
        }
    }
}

/// Layered config load plus validation, before any side effect.
fn load_config(path: Option<&Path>, dry_run: bool) -> Result<AgentConfig, TriageError> {
    AgentConfig::load(path)
        .and_then(|config| config.validate(dry_run).map(|()| config))
        .map_err(|e| TriageError::Configuration(format!("{e:#}")))
}

fn record_outcome(config: &AgentConfig, record: &OutcomeRecord) {
    if let Some(path) = &config.telemetry_path {
        append_outcome(record, path);
    }
}

/// Process exit code for a failed command: 2 for rejected input, 3 when a
/// retry of the whole event may succeed, 1 otherwise.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<TriageError>() {
        Some(e) if e.is_retriable() => 3,
        Some(TriageError::Validation(_)) => 2,
        _ => 1,
    }
}

/// JSON printed on stdout for a failed command.
pub fn error_json(err: &anyhow::Error) -> Value {
    match err.downcast_ref::<TriageError>() {
        Some(e) => json!({
            "error": e.to_string(),
            "category": e.category().to_string(),
            "retriable": e.is_retriable(),
        }),
        None => json!({
            "error": format!("{err:#}"),
            "category": "configuration",
            "retriable": false,
        }),
    }
}
