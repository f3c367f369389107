//! Validated registry and the availability policy.
//!
//! `Registry::build` turns raw configuration into typed records, resolves
//! pool capacities, and pre-computes each agent's availability. Agents that
//! fail the availability policy stay in the registry for diagnostics but are
//! never eligible for assignment.

use std::collections::HashSet;

use tracing::warn;

use crate::config::RegistryConfig;
use crate::error::{RegistryError, RegistryResult};

/// A named target configuration that must be tested once per campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub id: String,
    /// Capability labels an agent must advertise to run this platform.
    pub labels: Vec<String>,
}

/// A machine capable of running one platform's test job at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub id: String,
    pub labels: Vec<String>,
    pub pool_id: String,
    /// Whether the scheduler may assign work to this agent.
    pub available: bool,
    /// Why the agent was excluded, when it was.
    pub unavailable_reason: Option<UnavailableReason>,
}

/// A capacity-bounded group of agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub id: String,
    /// Maximum concurrently busy agents (already resolved; never 0).
    pub capacity: u32,
    pub agent_ids: Vec<String>,
}

/// Why an agent was excluded from matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// Offline and the backend cannot launch it on demand.
    OfflineNoLaunch,
    /// Manually marked offline by an operator.
    TemporarilyOffline,
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OfflineNoLaunch => write!(f, "offline and cannot be launched automatically"),
            Self::TemporarilyOffline => write!(f, "temporarily marked offline"),
        }
    }
}

/// An agent as reported by the job backend, for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAgent {
    pub id: String,
    pub offline: bool,
}

/// Immutable per-campaign topology: platforms to test, pools, agents.
///
/// Iteration order of `platforms()` and `agents()` follows declaration
/// order in the configuration; the assignment sweep depends on it.
#[derive(Debug, Clone)]
pub struct Registry {
    platforms: Vec<Platform>,
    pools: Vec<Pool>,
    agents: Vec<Agent>,
}

impl Registry {
    /// Build a validated registry from raw configuration.
    ///
    /// `backend_agents` is the backend's own agent inventory; agents it
    /// knows about but this configuration omits are logged as warnings,
    /// as are agents the availability policy excludes.
    pub fn build(config: &RegistryConfig, backend_agents: &[BackendAgent]) -> RegistryResult<Self> {
        if config.pools.is_empty() {
            return Err(RegistryError::NoPools);
        }
        if config.platforms.is_empty() {
            return Err(RegistryError::NoPlatforms);
        }

        let mut platforms = Vec::with_capacity(config.platforms.len());
        let mut seen = HashSet::new();
        for p in &config.platforms {
            if !seen.insert(p.id.clone()) {
                return Err(RegistryError::DuplicatePlatform(p.id.clone()));
            }
            if p.labels.is_empty() {
                return Err(RegistryError::NoLabels(p.id.clone()));
            }
            platforms.push(Platform {
                id: p.id.clone(),
                labels: p.labels.clone(),
            });
        }

        let mut pools = Vec::with_capacity(config.pools.len());
        let mut agents = Vec::new();
        let mut seen_pools = HashSet::new();
        let mut seen_agents = HashSet::new();
        for pc in &config.pools {
            if !seen_pools.insert(pc.id.clone()) {
                return Err(RegistryError::DuplicatePool(pc.id.clone()));
            }
            if pc.agents.is_empty() {
                return Err(RegistryError::EmptyPool(pc.id.clone()));
            }
            let mut agent_ids = Vec::with_capacity(pc.agents.len());
            for ac in &pc.agents {
                if !seen_agents.insert(ac.id.clone()) {
                    return Err(RegistryError::DuplicateAgent(ac.id.clone()));
                }
                let unavailable_reason = if ac.offline && !ac.launch_supported {
                    Some(UnavailableReason::OfflineNoLaunch)
                } else if ac.temporarily_offline {
                    Some(UnavailableReason::TemporarilyOffline)
                } else {
                    None
                };
                if let Some(reason) = unavailable_reason {
                    warn!(agent = %ac.id, pool = %pc.id, %reason, "agent excluded from matching");
                }
                agent_ids.push(ac.id.clone());
                agents.push(Agent {
                    id: ac.id.clone(),
                    labels: ac.labels.clone(),
                    pool_id: pc.id.clone(),
                    available: unavailable_reason.is_none(),
                    unavailable_reason,
                });
            }
            // Nominal capacity 0 means "as many as there are members".
            let capacity = if pc.capacity == 0 {
                agent_ids.len() as u32
            } else {
                pc.capacity
            };
            pools.push(Pool {
                id: pc.id.clone(),
                capacity,
                agent_ids,
            });
        }

        for known in backend_agents {
            if !seen_agents.contains(&known.id) {
                warn!(
                    agent = %known.id,
                    offline = known.offline,
                    "agent known to the backend but absent from this registry"
                );
            }
        }

        Ok(Self {
            platforms,
            pools,
            agents,
        })
    }

    /// Platforms in declaration order.
    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    /// Agents in declaration order (pools flattened in order).
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Pools in declaration order.
    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    /// Look up a platform by id.
    pub fn platform(&self, id: &str) -> Option<&Platform> {
        self.platforms.iter().find(|p| p.id == id)
    }

    /// Look up an agent by id.
    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Look up a pool by id.
    pub fn pool(&self, id: &str) -> Option<&Pool> {
        self.pools.iter().find(|p| p.id == id)
    }
}
