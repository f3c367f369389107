//! Seams to the external collaborators: the job backend and the script
//! generator.
//!
//! The concrete backend is selected once at startup from declared
//! configuration and handed to the `Campaign` as a value implementing
//! `JobBackend`; the scheduler never inspects what is behind the trait.

use thiserror::Error;

use rigflow_registry::{BackendAgent, Platform};
use rigflow_state::RunRef;

/// Result alias for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors from the job backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Transport or auth failure. The scheduler logs it, mutates nothing,
    /// and retries the operation on the next tick.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered but the response made no sense.
    #[error("malformed backend response: {0}")]
    Protocol(String),
}

/// Everything the backend needs to run one platform's job on one agent.
#[derive(Debug, Clone)]
pub struct SubmitRequest<'a> {
    pub platform_id: &'a str,
    pub agent_id: &'a str,
    pub script: &'a str,
    pub artifact_patterns: &'a [String],
}

/// Terminal outcome of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    pub success: bool,
}

/// The job-execution backend the scheduler polls once per tick per job.
///
/// How a job actually runs is entirely the backend's business; the
/// scheduler only submits and polls.
pub trait JobBackend {
    /// Submit a job; returns an opaque submission token.
    fn submit(
        &self,
        req: SubmitRequest<'_>,
    ) -> impl Future<Output = BackendResult<String>> + Send;

    /// Has the submitted job started? `None` while still waiting for an
    /// executor.
    fn poll_started(&self, token: &str)
    -> impl Future<Output = BackendResult<Option<RunRef>>> + Send;

    /// Has the running job finished? `None` while still running.
    fn poll_finished(
        &self,
        platform_id: &str,
        run_id: &str,
    ) -> impl Future<Output = BackendResult<Option<JobOutcome>>> + Send;

    /// The backend's own agent inventory, for registry diagnostics.
    fn known_agents(&self) -> impl Future<Output = BackendResult<Vec<BackendAgent>>> + Send;
}

/// The shell script and artifact globs for one platform's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBundle {
    pub script: String,
    pub artifact_patterns: Vec<String>,
}

/// Produces the script bundle a platform's job executes.
///
/// Script content generation is a collaborator concern; the scheduler only
/// passes the bundle through to the backend.
pub trait ScriptSource {
    fn bundle(&self, platform: &Platform) -> ScriptBundle;
}
