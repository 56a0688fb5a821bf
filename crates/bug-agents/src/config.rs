//! Agent configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (`TRIAGE_*`)
//! 2. Values from the TOML file passed with `--config`
//! 3. Built-in defaults
//!
//! | Key                      | Env                              | Default                    |
//! |--------------------------|----------------------------------|----------------------------|
//! | `github.repo`            | `TRIAGE_GITHUB_REPO`             | none (required for GitHub) |
//! | `github.token`           | `TRIAGE_GITHUB_TOKEN`, `GITHUB_TOKEN` | none                  |
//! | `github.api_base`        | `TRIAGE_GITHUB_API`              | `https://api.github.com`   |
//! | `github.base_labels`     | `TRIAGE_BASE_LABELS` (comma list) | `ci-failure`              |
//! | `github.max_pages`       |                                  | 5                          |
//! | `tracker_timeout_secs`   | `TRIAGE_TRACKER_TIMEOUT_SECS`    | 30                         |
//! | `dispatch_timeout_secs`  | `TRIAGE_DISPATCH_TIMEOUT_SECS`   | 10                         |
//! | `dispatch.event_type`    | `TRIAGE_DISPATCH_EVENT`          | `ci-failure-issue-created` |
//! | `dispatch.enabled`       | `TRIAGE_DISPATCH_ENABLED`        | true                       |
//! | `duplicate_tie_break`    | `TRIAGE_DUPLICATE_TIE_BREAK`     | `most_recent`              |
//! | `telemetry_path`         | `TRIAGE_TELEMETRY_PATH`          | none                       |

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use triage::{DuplicateTieBreak, LoggerSettings, ResolutionLabel};

const DEFAULT_GITHUB_API: &str = "https://api.github.com";
const DEFAULT_BASE_LABEL: &str = "ci-failure";
const DEFAULT_MAX_PAGES: u32 = 5;
const DEFAULT_TRACKER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DISPATCH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_DISPATCH_EVENT: &str = "ci-failure-issue-created";

const ENV_GITHUB_REPO: &str = "TRIAGE_GITHUB_REPO";
const ENV_GITHUB_TOKEN: &str = "TRIAGE_GITHUB_TOKEN";
const ENV_GITHUB_TOKEN_FALLBACK: &str = "GITHUB_TOKEN";
const ENV_GITHUB_API: &str = "TRIAGE_GITHUB_API";
const ENV_BASE_LABELS: &str = "TRIAGE_BASE_LABELS";
const ENV_TRACKER_TIMEOUT: &str = "TRIAGE_TRACKER_TIMEOUT_SECS";
const ENV_DISPATCH_TIMEOUT: &str = "TRIAGE_DISPATCH_TIMEOUT_SECS";
const ENV_DISPATCH_EVENT: &str = "TRIAGE_DISPATCH_EVENT";
const ENV_DISPATCH_ENABLED: &str = "TRIAGE_DISPATCH_ENABLED";
const ENV_TIE_BREAK: &str = "TRIAGE_DUPLICATE_TIE_BREAK";
const ENV_TELEMETRY_PATH: &str = "TRIAGE_TELEMETRY_PATH";

/// GitHub issue tracker connection.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    /// `owner/name`
    pub repo: Option<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub api_base: String,
    /// Carried by every created ticket; every search is scoped to them.
    pub base_labels: Vec<String>,
    /// Pagination cap for searches, 100 tickets per page.
    pub max_pages: u32,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            repo: None,
            token: None,
            api_base: DEFAULT_GITHUB_API.to_string(),
            base_labels: vec![DEFAULT_BASE_LABEL.to_string()],
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

// Hand-written so the token never reaches a log line.
impl std::fmt::Debug for GithubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubConfig")
            .field("repo", &self.repo)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("base_labels", &self.base_labels)
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

/// Dispatch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub enabled: bool,
    pub event_type: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            event_type: DEFAULT_DISPATCH_EVENT.to_string(),
        }
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub tracker_timeout_secs: u64,
    pub dispatch_timeout_secs: u64,
    pub duplicate_tie_break: DuplicateTieBreak,
    /// JSONL outcome log; disabled when unset.
    pub telemetry_path: Option<PathBuf>,
    pub github: GithubConfig,
    pub dispatch: DispatchConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tracker_timeout_secs: DEFAULT_TRACKER_TIMEOUT_SECS,
            dispatch_timeout_secs: DEFAULT_DISPATCH_TIMEOUT_SECS,
            duplicate_tie_break: DuplicateTieBreak::default(),
            telemetry_path: None,
            github: GithubConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Defaults, then the optional TOML file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML file; missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config TOML {}", path.display()))
    }

    /// Apply `TRIAGE_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(repo) = var(ENV_GITHUB_REPO) {
            self.github.repo = Some(repo.trim().to_string());
        }
        if let Some(token) = var(ENV_GITHUB_TOKEN).or_else(|| var(ENV_GITHUB_TOKEN_FALLBACK)) {
            self.github.token = Some(token);
        }
        if let Some(api) = var(ENV_GITHUB_API) {
            self.github.api_base = api.trim().to_string();
        }
        if let Some(labels) = var(ENV_BASE_LABELS) {
            self.github.base_labels = split_list(&labels);
        }
        if let Some(secs) = secs_from_env(&var, ENV_TRACKER_TIMEOUT)? {
            self.tracker_timeout_secs = secs;
        }
        if let Some(secs) = secs_from_env(&var, ENV_DISPATCH_TIMEOUT)? {
            self.dispatch_timeout_secs = secs;
        }
        if let Some(event_type) = var(ENV_DISPATCH_EVENT) {
            self.dispatch.event_type = event_type.trim().to_string();
        }
        if let Some(enabled) = bool_from_env(&var, ENV_DISPATCH_ENABLED)? {
            self.dispatch.enabled = enabled;
        }
        if let Some(raw) = var(ENV_TIE_BREAK) {
            self.duplicate_tie_break = raw
                .parse()
                .map_err(|e: String| anyhow::anyhow!("{ENV_TIE_BREAK}: {e}"))?;
        }
        if let Some(path) = var(ENV_TELEMETRY_PATH) {
            self.telemetry_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Reject configurations that cannot work. The GitHub section is only
    /// required when talking to GitHub.
    pub fn validate(&self, dry_run: bool) -> Result<()> {
        if self.tracker_timeout_secs == 0 {
            bail!("tracker_timeout_secs must be > 0");
        }
        if self.dispatch_timeout_secs == 0 {
            bail!("dispatch_timeout_secs must be > 0");
        }
        if self.dispatch.enabled && self.dispatch.event_type.trim().is_empty() {
            bail!("dispatch.event_type must not be empty when dispatch is enabled");
        }
        if dry_run {
            return Ok(());
        }

        let Some(repo) = self.github.repo.as_deref() else {
            bail!("github.repo is required (set it in the config file or {ENV_GITHUB_REPO})");
        };
        if !is_owner_slash_name(repo) {
            bail!("github.repo must look like owner/name, got '{repo}'");
        }
        if self.github.max_pages == 0 {
            bail!("github.max_pages must be > 0");
        }
        // Every created ticket carries the base labels.
        if let Some(label) = ResolutionLabel::ALL
            .iter()
            .find(|l| self.github.base_labels.iter().any(|b| b.trim() == l.as_str()))
        {
            bail!("github.base_labels must not contain the resolution label '{label}'");
        }
        let api = &self.github.api_base;
        if !api.starts_with("http://") && !api.starts_with("https://") {
            bail!("github.api_base must be an http(s) URL, got '{api}'");
        }
        Ok(())
    }

    /// Bound on every tracker call.
    pub fn tracker_timeout(&self) -> Duration {
        Duration::from_secs(self.tracker_timeout_secs)
    }

    /// Bound on a dispatch publish.
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    /// Settings for the failure logger.
    pub fn logger_settings(&self) -> LoggerSettings {
        LoggerSettings {
            tie_break: self.duplicate_tie_break,
            tracker_timeout: self.tracker_timeout(),
            dispatch_timeout: self.dispatch_timeout(),
            dispatch_event_type: self.dispatch.event_type.clone(),
        }
    }
}

fn is_owner_slash_name(repo: &str) -> bool {
    match repo.split_once('/') {
        Some((owner, name)) => !owner.is_empty() && !name.is_empty() && !name.contains('/'),
        None => false,
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn secs_from_env<F>(var: &F, key: &str) -> Result<Option<u64>>
where
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .with_context(|| format!("{key} must be a whole number of seconds, got '{raw}'"))
        })
        .transpose()
}

fn bool_from_env<F>(var: &F, key: &str) -> Result<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => bail!("{key} must be a boolean, got '{raw}'"),
        })
        .transpose()
}
