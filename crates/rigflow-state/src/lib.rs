//! rigflow-state — campaign state and crash-safe checkpointing.
//!
//! `CampaignState` is the full mutable picture of one campaign: every
//! platform's lifecycle status and retry counter, per-pool busy counts,
//! per-agent busy flags, and in-flight job handles. The scheduler owns and
//! mutates it; this crate only defines the shape and persists snapshots.
//!
//! Checkpoints are JSON values in a [redb](https://docs.rs/redb) table keyed
//! by campaign version. A redb write transaction commits atomically, so a
//! process crash never leaves a partially written checkpoint visible to a
//! later `load`. An in-memory backend is available for tests.

pub mod error;
pub mod store;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::CheckpointStore;
pub use types::{
    CampaignState, JobHandle, PlatformProgress, PlatformStatus, RunRef, StatusBuckets,
    StatusCounts,
};
