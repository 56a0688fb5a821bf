//! Repository-dispatch publisher.
//!
//! Publishes `POST /repos/{repo}/dispatches` so a workflow listening on the
//! event type can start a fix attempt. GitHub answers 204 with no body and
//! offers no delivery receipt beyond that.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use triage::{DispatchError, DispatchPayload, Dispatcher};

use crate::config::GithubConfig;
use crate::github::GithubError;

/// Body of a repository-dispatch request.
#[derive(Debug, Serialize)]
pub struct DispatchRequest<'a> {
    pub event_type: &'a str,
    pub client_payload: &'a DispatchPayload,
}

/// [`Dispatcher`] publishing GitHub repository-dispatch events.
pub struct RepositoryDispatcher {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl RepositoryDispatcher {
    /// Fails when `github.repo` is unset.
    pub fn new(config: &GithubConfig) -> Result<Self, GithubError> {
        let repo = config
            .repo
            .as_deref()
            .ok_or_else(|| GithubError::Config("github.repo is not set".into()))?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("bug-agents/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            url: format!(
                "{}/repos/{}/dispatches",
                config.api_base.trim_end_matches('/'),
                repo
            ),
            token: config.token.clone(),
        })
    }

    /// Endpoint receiving the dispatch.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Dispatcher for RepositoryDispatcher {
    async fn publish(
        &self,
        event_type: &str,
        payload: &DispatchPayload,
    ) -> Result<(), DispatchError> {
        let request = DispatchRequest {
            event_type,
            client_payload: payload,
        };
        let mut builder = self
            .http
            .post(&self.url)
            .header("Accept", "application/vnd.github+json")
            .json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DispatchError::SendFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected { status, body });
        }

        debug!(
            event_type,
            issue_id = %payload.issue_id,
            "Repository dispatch accepted"
        );
        Ok(())
    }
}
