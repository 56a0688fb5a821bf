//! GitHub REST adapter for the issue tracker seam.
//!
//! Tickets are GitHub issues carrying the configured base labels. The
//! fingerprint comes from the hidden metadata block in the body; resolution
//! labels are translated to and from their string names here and nowhere
//! else.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use triage::{
    parse_metadata, parse_title, Fingerprint, IssueId, IssueState, IssueTracker, NewIssue,
    ResolutionLabel, SearchFilter, TrackedIssue, TrackerError,
};

use crate::config::GithubConfig;

const PER_PAGE: usize = 100;
const USER_AGENT: &str = concat!("bug-agents/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";

/// Errors from the GitHub REST API.
#[derive(Debug, thiserror::Error)]
pub enum GithubError {
    #[error("GitHub request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("GitHub API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Failed to decode GitHub response: {0}")]
    Decode(String),

    #[error("GitHub configuration error: {0}")]
    Config(String),
}

impl From<GithubError> for TrackerError {
    fn from(err: GithubError) -> Self {
        match err {
            GithubError::Decode(msg) => TrackerError::Malformed(msg),
            other => TrackerError::Unavailable(other.to_string()),
        }
    }
}

/// Label object as GitHub returns it.
#[derive(Debug, Clone, Deserialize)]
pub struct GithubLabel {
    pub name: String,
}

/// The subset of GitHub's issue object this adapter reads.
#[derive(Debug, Clone, Deserialize)]
pub struct GithubIssue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub state: String,
    #[serde(default)]
    pub labels: Vec<GithubLabel>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    /// Present only when the "issue" is a pull request.
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

impl GithubIssue {
    /// GitHub lists pull requests as issues; they never count as tickets.
    pub fn is_pull_request(&self) -> bool {
        self.pull_request.is_some()
    }

    fn issue_state(&self) -> IssueState {
        if self.state.eq_ignore_ascii_case("closed") {
            IssueState::Closed
        } else {
            IssueState::Open
        }
    }

    fn resolution_labels(&self) -> BTreeSet<ResolutionLabel> {
        ResolutionLabel::translate_all(self.labels.iter().map(|l| l.name.as_str()))
    }

    /// Map to a [`TrackedIssue`] for classification. Tickets without a
    /// parseable metadata block, and pull requests, yield `None`.
    pub fn into_tracked(self) -> Option<TrackedIssue> {
        if self.is_pull_request() {
            return None;
        }
        let metadata = parse_metadata(self.body.as_deref().unwrap_or_default())?;
        Some(self.build(metadata.fingerprint, metadata.log_range))
    }

    /// Map for single-ticket lookups, where only state and labels matter.
    /// Falls back to the title when the metadata block is gone.
    pub fn into_tracked_lenient(self) -> TrackedIssue {
        if let Some(metadata) = parse_metadata(self.body.as_deref().unwrap_or_default()) {
            return self.build(metadata.fingerprint, metadata.log_range);
        }
        let fingerprint =
            parse_title(&self.title).unwrap_or_else(|| Fingerprint::new("", "", ""));
        self.build(fingerprint, String::new())
    }

    fn build(self, fingerprint: Fingerprint, log_range: String) -> TrackedIssue {
        let state = self.issue_state();
        let labels = self.resolution_labels();
        TrackedIssue {
            id: IssueId::from(self.number),
            title: self.title,
            state,
            labels,
            fingerprint,
            log_range,
            created_at: self.created_at,
            closed_at: self.closed_at,
        }
    }
}

/// Label list sent on create: base labels first, then resolution labels,
/// without repeats.
pub fn create_labels(base: &[String], resolution: &[ResolutionLabel]) -> Vec<String> {
    let mut labels: Vec<String> = Vec::with_capacity(base.len() + resolution.len());
    let names = base
        .iter()
        .map(String::as_str)
        .chain(resolution.iter().map(|l| l.as_str()));
    for name in names {
        if !labels.iter().any(|l| l == name) {
            labels.push(name.to_string());
        }
    }
    labels
}

/// [`IssueTracker`] over the GitHub REST issues API.
pub struct GithubTracker {
    http: reqwest::Client,
    config: GithubConfig,
    repo: String,
}

impl GithubTracker {
    /// Returns an error if the repo is unset or the HTTP client cannot be
    /// created.
    pub fn new(config: GithubConfig) -> Result<Self, GithubError> {
        let repo = config
            .repo
            .clone()
            .ok_or_else(|| GithubError::Config("github.repo is not set".into()))?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { http, config, repo })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}{}",
            self.config.api_base.trim_end_matches('/'),
            self.repo,
            path
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// GitHub issue numbers are positive integers; anything else cannot exist.
    fn number(id: &IssueId) -> Option<u64> {
        id.as_str().parse().ok().filter(|n| *n > 0)
    }

    async fn list_page(
        &self,
        state: IssueState,
        page: u32,
    ) -> Result<Vec<GithubIssue>, GithubError> {
        let per_page = PER_PAGE.to_string();
        let page = page.to_string();
        let labels = self.config.base_labels.join(",");
        let mut query = vec![
            ("state", state.to_string()),
            ("per_page", per_page),
            ("page", page),
        ];
        if !labels.is_empty() {
            query.push(("labels", labels));
        }

        let response = self
            .request(reqwest::Method::GET, &self.url("/issues"))
            .query(&query)
            .send()
            .await?;
        decode(ensure_success(response).await?).await
    }
}

async fn ensure_success(response: Response) -> Result<Response, GithubError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(GithubError::Api { status, body })
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, GithubError> {
    response
        .json()
        .await
        .map_err(|e| GithubError::Decode(e.to_string()))
}

fn not_found_or(err: GithubError, id: &IssueId) -> TrackerError {
    match err {
        GithubError::Api { status, .. } if status == StatusCode::NOT_FOUND.as_u16() => {
            TrackerError::NotFound(id.clone())
        }
        other => other.into(),
    }
}

#[async_trait]
impl IssueTracker for GithubTracker {
    /// Lists every issue with the base labels and filters titles locally.
    ///
    /// A listing that does not end within `max_pages` is an error: a partial
    /// snapshot could hide a true match.
    async fn search(&self, filter: &SearchFilter) -> Result<Vec<TrackedIssue>, TrackerError> {
        let max_pages = self.config.max_pages;
        let mut found = Vec::new();
        for page in 1.. {
            let batch = self.list_page(filter.state, page).await?;
            if page > max_pages {
                if batch.is_empty() {
                    break;
                }
                warn!(
                    state = %filter.state,
                    max_pages,
                    "Issue listing exceeds the page cap; refusing a partial snapshot"
                );
                return Err(TrackerError::Unavailable(format!(
                    "more than {} {} issues carry the base labels; raise github.max_pages",
                    max_pages as usize * PER_PAGE,
                    filter.state
                )));
            }
            let last_page = batch.len() < PER_PAGE;

            for issue in batch {
                if issue.is_pull_request() || !issue.title.contains(&filter.title_pattern) {
                    continue;
                }
                let number = issue.number;
                match issue.into_tracked() {
                    Some(tracked) => found.push(tracked),
                    None => debug!(number, "Skipping ticket without triage metadata"),
                }
            }
            if last_page {
                break;
            }
        }
        debug!(
            state = %filter.state,
            pattern = %filter.title_pattern,
            count = found.len(),
            "GitHub search complete"
        );
        Ok(found)
    }

    async fn get(&self, id: &IssueId) -> Result<Option<TrackedIssue>, TrackerError> {
        let Some(number) = Self::number(id) else {
            return Ok(None);
        };
        let response = self
            .request(reqwest::Method::GET, &self.url(&format!("/issues/{number}")))
            .send()
            .await
            .map_err(GithubError::from)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let issue: GithubIssue = decode(ensure_success(response).await?).await?;
        if issue.is_pull_request() {
            return Ok(None);
        }
        Ok(Some(issue.into_tracked_lenient()))
    }

    async fn create(&self, issue: &NewIssue) -> Result<TrackedIssue, TrackerError> {
        let body = json!({
            "title": issue.title,
            "body": issue.body,
            "labels": create_labels(&self.config.base_labels, &issue.labels),
        });
        let response = self
            .request(reqwest::Method::POST, &self.url("/issues"))
            .json(&body)
            .send()
            .await
            .map_err(GithubError::from)?;
        let created: GithubIssue = decode(ensure_success(response).await?).await?;
        let number = created.number;
        created.into_tracked().ok_or_else(|| {
            TrackerError::Malformed(format!("created issue #{number} lost its metadata block"))
        })
    }

    async fn add_label(&self, id: &IssueId, label: ResolutionLabel) -> Result<(), TrackerError> {
        let number = Self::number(id).ok_or_else(|| TrackerError::NotFound(id.clone()))?;
        let response = self
            .request(reqwest::Method::POST, &self.url(&format!("/issues/{number}/labels")))
            .json(&json!({ "labels": [label.as_str()] }))
            .send()
            .await
            .map_err(GithubError::from)?;
        ensure_success(response)
            .await
            .map_err(|e| not_found_or(e, id))?;
        Ok(())
    }

    async fn comment(&self, id: &IssueId, text: &str) -> Result<(), TrackerError> {
        let number = Self::number(id).ok_or_else(|| TrackerError::NotFound(id.clone()))?;
        let response = self
            .request(reqwest::Method::POST, &self.url(&format!("/issues/{number}/comments")))
            .json(&json!({ "body": text }))
            .send()
            .await
            .map_err(GithubError::from)?;
        ensure_success(response)
            .await
            .map_err(|e| not_found_or(e, id))?;
        Ok(())
    }
}
