//! Scheduler error types.

use thiserror::Error;

/// Errors that can abort a campaign before its loop starts.
///
/// Transient backend and checkpoint failures never surface here; the loop
/// absorbs them into next-tick retries.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("registry error: {0}")]
    Registry(#[from] rigflow_registry::RegistryError),

    #[error("checkpoint store error: {0}")]
    State(#[from] rigflow_state::StateError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
