//! rigflow-scheduler — the campaign scheduling engine.
//!
//! A `Campaign` is the control loop that:
//! - Matches queued platforms to eligible agents (first-fit, capacity-bounded)
//! - Drives each job's lifecycle through the `JobBackend`
//! - Applies the bounded retry policy on failures
//! - Checkpoints its full state after every state-changing tick
//!
//! # Architecture
//!
//! ```text
//! Campaign
//!   ├── Registry (read-only platform/agent/pool topology)
//!   ├── CampaignState (owned, mutated only here)
//!   ├── JobBackend (submit / poll-started / poll-finished)
//!   ├── ScriptSource (per-platform script bundle)
//!   └── CheckpointStore (end-of-tick snapshots, keyed by version)
//! ```
//!
//! The loop is single-writer: all busy counts and status transitions are
//! applied sequentially within one tick, so a checkpoint always reflects a
//! consistent end-of-tick snapshot.

pub mod assign;
pub mod backend;
pub mod campaign;
pub mod error;

pub use assign::{Assignment, first_fit};
pub use backend::{
    BackendError, BackendResult, JobBackend, JobOutcome, ScriptBundle, ScriptSource, SubmitRequest,
};
pub use campaign::{Campaign, CampaignOptions, MAX_RETRIES, TickReport};
pub use error::{SchedulerError, SchedulerResult};
