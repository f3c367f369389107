//! Campaign state domain types.
//!
//! Everything here round-trips through JSON for checkpoint storage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use rigflow_registry::Registry;

/// Unique identifier of a platform.
pub type PlatformId = String;

/// Unique identifier of an agent.
pub type AgentId = String;

/// Lifecycle status of one platform within a campaign.
///
/// Legal transitions:
/// `Queued → Configuring → Running → Done` on success,
/// `Running → Queued` on failure with retries remaining,
/// `Running → Blocked` when retries are exhausted.
/// `Done` and `Blocked` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformStatus {
    Queued,
    Configuring,
    Running,
    Done,
    Blocked,
}

impl PlatformStatus {
    /// Whether this status can never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Blocked)
    }
}

/// A started job's backend identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRef {
    pub run_id: String,
    /// Human-facing URL for the run.
    pub url: String,
}

/// An in-flight job: which agent runs which platform, and how far the
/// backend has taken it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub platform_id: PlatformId,
    pub agent_id: AgentId,
    /// Backend submission token; `None` until the submit call succeeds.
    pub token: Option<String>,
    /// Set once the backend confirms the job started.
    pub run: Option<RunRef>,
}

/// Per-platform progress: status, retry counter, in-flight handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformProgress {
    pub status: PlatformStatus,
    /// Failed attempts so far; frozen at the maximum once `Blocked`.
    pub retries: u32,
    pub handle: Option<JobHandle>,
}

impl PlatformProgress {
    fn queued() -> Self {
        Self {
            status: PlatformStatus::Queued,
            retries: 0,
            handle: None,
        }
    }
}

/// Per-status platform counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub queued: usize,
    pub configuring: usize,
    pub running: usize,
    pub done: usize,
    pub blocked: usize,
}

/// Per-status platform id lists, for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusBuckets {
    pub queued: Vec<PlatformId>,
    pub configuring: Vec<PlatformId>,
    pub running: Vec<PlatformId>,
    pub done: Vec<PlatformId>,
    pub blocked: Vec<PlatformId>,
}

/// The full mutable state of one campaign — the unit of checkpointing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignState {
    /// Campaign version identifier (checkpoint key).
    pub version: String,
    /// Progress per platform id.
    pub platforms: BTreeMap<PlatformId, PlatformProgress>,
    /// Currently busy agents per pool.
    pub pool_busy: BTreeMap<String, u32>,
    /// Whether each agent is running a platform for this campaign.
    pub agent_busy: BTreeMap<AgentId, bool>,
}

impl CampaignState {
    /// Fresh state for a campaign that has not run yet: every platform
    /// queued, nothing busy.
    pub fn fresh(version: &str, registry: &Registry) -> Self {
        Self {
            version: version.to_string(),
            platforms: registry
                .platforms()
                .iter()
                .map(|p| (p.id.clone(), PlatformProgress::queued()))
                .collect(),
            pool_busy: registry.pools().iter().map(|p| (p.id.clone(), 0)).collect(),
            agent_busy: registry
                .agents()
                .iter()
                .map(|a| (a.id.clone(), false))
                .collect(),
        }
    }

    /// The campaign is over when every platform is terminal.
    pub fn is_complete(&self) -> bool {
        self.platforms.values().all(|p| p.status.is_terminal())
    }

    /// Count platforms per status.
    pub fn counts(&self) -> StatusCounts {
        let mut c = StatusCounts::default();
        for p in self.platforms.values() {
            match p.status {
                PlatformStatus::Queued => c.queued += 1,
                PlatformStatus::Configuring => c.configuring += 1,
                PlatformStatus::Running => c.running += 1,
                PlatformStatus::Done => c.done += 1,
                PlatformStatus::Blocked => c.blocked += 1,
            }
        }
        c
    }

    /// Platform ids grouped by status.
    pub fn buckets(&self) -> StatusBuckets {
        let mut b = StatusBuckets::default();
        for (id, p) in &self.platforms {
            let bucket = match p.status {
                PlatformStatus::Queued => &mut b.queued,
                PlatformStatus::Configuring => &mut b.configuring,
                PlatformStatus::Running => &mut b.running,
                PlatformStatus::Done => &mut b.done,
                PlatformStatus::Blocked => &mut b.blocked,
            };
            bucket.push(id.clone());
        }
        b
    }

    /// Verify the capacity invariant against the registry: for every pool,
    /// the busy count equals the number of busy member agents and does not
    /// exceed capacity. Returns a description of the first violation.
    pub fn check_capacity(&self, registry: &Registry) -> Result<(), String> {
        for pool in registry.pools() {
            let counted = pool
                .agent_ids
                .iter()
                .filter(|a| self.agent_busy.get(*a).copied().unwrap_or(false))
                .count() as u32;
            let recorded = self.pool_busy.get(&pool.id).copied().unwrap_or(0);
            if counted != recorded {
                return Err(format!(
                    "pool {}: busy count {} but {} busy agents",
                    pool.id, recorded, counted
                ));
            }
            if recorded > pool.capacity {
                return Err(format!(
                    "pool {}: busy count {} exceeds capacity {}",
                    pool.id, recorded, pool.capacity
                ));
            }
        }
        Ok(())
    }
}
