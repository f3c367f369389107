//! Job backend implementations and the startup factory.
//!
//! The backend is picked once from the declared `[backend]` configuration
//! and handed to the campaign as a value behind the `JobBackend` trait;
//! nothing downstream ever inspects which variant it got.

use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use serde::Deserialize;
use tracing::debug;

use rigflow_registry::BackendAgent;
use rigflow_scheduler::{BackendError, BackendResult, JobBackend, JobOutcome, SubmitRequest};
use rigflow_state::RunRef;

use crate::config::{BackendKind, BackendSection};

/// Build the configured backend. Fails only on incomplete configuration.
pub fn build_backend(section: &BackendSection) -> anyhow::Result<AnyBackend> {
    match section.kind {
        BackendKind::Rest => {
            let base_url = section
                .base_url
                .clone()
                .context("backend.base_url is required for kind = \"rest\"")?;
            Ok(AnyBackend::Rest(RestBackend::new(
                base_url,
                section.username.clone(),
                section.api_token.clone(),
            )))
        }
        BackendKind::DryRun => Ok(AnyBackend::DryRun(DryRunBackend::default())),
    }
}

/// The backend selected at startup.
pub enum AnyBackend {
    Rest(RestBackend),
    DryRun(DryRunBackend),
}

impl JobBackend for AnyBackend {
    async fn submit(&self, req: SubmitRequest<'_>) -> BackendResult<String> {
        match self {
            Self::Rest(b) => b.submit(req).await,
            Self::DryRun(b) => b.submit(req).await,
        }
    }

    async fn poll_started(&self, token: &str) -> BackendResult<Option<RunRef>> {
        match self {
            Self::Rest(b) => b.poll_started(token).await,
            Self::DryRun(b) => b.poll_started(token).await,
        }
    }

    async fn poll_finished(
        &self,
        platform_id: &str,
        run_id: &str,
    ) -> BackendResult<Option<JobOutcome>> {
        match self {
            Self::Rest(b) => b.poll_finished(platform_id, run_id).await,
            Self::DryRun(b) => b.poll_finished(platform_id, run_id).await,
        }
    }

    async fn known_agents(&self) -> BackendResult<Vec<BackendAgent>> {
        match self {
            Self::Rest(b) => b.known_agents().await,
            Self::DryRun(b) => b.known_agents().await,
        }
    }
}

// ── REST backend ───────────────────────────────────────────────────

/// Dispatches jobs through a CI server's JSON API.
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    username: Option<String>,
    api_token: Option<String>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    token: String,
}

#[derive(Deserialize)]
struct QueueResponse {
    run_id: Option<String>,
    url: Option<String>,
}

#[derive(Deserialize)]
struct RunResponse {
    finished: bool,
    #[serde(default)]
    success: bool,
}

#[derive(Deserialize)]
struct AgentResponse {
    id: String,
    #[serde(default)]
    offline: bool,
}

impl RestBackend {
    pub fn new(base_url: String, username: Option<String>, api_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            api_token,
        }
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.username {
            Some(user) => req.basic_auth(user, self.api_token.as_deref()),
            None => req,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> BackendResult<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .authed(self.client.get(&url))
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "GET {path} returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))
    }
}

impl JobBackend for RestBackend {
    async fn submit(&self, req: SubmitRequest<'_>) -> BackendResult<String> {
        let url = format!("{}/api/jobs", self.base_url);
        let body = serde_json::json!({
            "platform": req.platform_id,
            "agent": req.agent_id,
            "script": req.script,
            "artifacts": req.artifact_patterns,
        });
        let response = self
            .authed(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "job submission returned {}",
                response.status()
            )));
        }
        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        debug!(platform = %req.platform_id, agent = %req.agent_id, token = %submitted.token, "job submitted");
        Ok(submitted.token)
    }

    async fn poll_started(&self, token: &str) -> BackendResult<Option<RunRef>> {
        let queued: QueueResponse = self.get_json(&format!("/api/queue/{token}")).await?;
        match (queued.run_id, queued.url) {
            (Some(run_id), Some(url)) => Ok(Some(RunRef { run_id, url })),
            _ => Ok(None),
        }
    }

    async fn poll_finished(
        &self,
        platform_id: &str,
        run_id: &str,
    ) -> BackendResult<Option<JobOutcome>> {
        let run: RunResponse = self
            .get_json(&format!("/api/runs/{platform_id}/{run_id}"))
            .await?;
        if run.finished {
            Ok(Some(JobOutcome {
                success: run.success,
            }))
        } else {
            Ok(None)
        }
    }

    async fn known_agents(&self) -> BackendResult<Vec<BackendAgent>> {
        let agents: Vec<AgentResponse> = self.get_json("/api/agents").await?;
        Ok(agents
            .into_iter()
            .map(|a| BackendAgent {
                id: a.id,
                offline: a.offline,
            })
            .collect())
    }
}

// ── Dry-run backend ────────────────────────────────────────────────

/// Every job starts immediately and succeeds; for rehearsing a campaign
/// configuration without a CI server.
#[derive(Default)]
pub struct DryRunBackend {
    next_token: AtomicU32,
}

impl JobBackend for DryRunBackend {
    async fn submit(&self, req: SubmitRequest<'_>) -> BackendResult<String> {
        let n = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(platform = %req.platform_id, agent = %req.agent_id, "dry-run job submitted");
        Ok(format!("dry-{n}"))
    }

    async fn poll_started(&self, token: &str) -> BackendResult<Option<RunRef>> {
        Ok(Some(RunRef {
            run_id: token.to_string(),
            url: format!("dry-run://{token}"),
        }))
    }

    async fn poll_finished(
        &self,
        _platform_id: &str,
        _run_id: &str,
    ) -> BackendResult<Option<JobOutcome>> {
        Ok(Some(JobOutcome { success: true }))
    }

    async fn known_agents(&self) -> BackendResult<Vec<BackendAgent>> {
        Ok(Vec::new())
    }
}
