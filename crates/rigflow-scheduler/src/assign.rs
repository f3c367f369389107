//! First-fit assignment of queued platforms to eligible agents.
//!
//! Deliberately not an optimizing placer: platforms are considered in
//! registry order, agents in registration order, and the first agent that
//! is available, idle, within pool capacity, and advertises a superset of
//! the platform's required labels wins. A platform with no eligible agent
//! simply stays queued; under saturation that is the normal case.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use rigflow_registry::{Agent, Registry};
use rigflow_state::{CampaignState, PlatformStatus};

/// One platform → agent pairing produced by the assignment sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub platform_id: String,
    pub agent_id: String,
    pub pool_id: String,
}

/// Compute assignments for every queued platform against the current state.
///
/// Pure with respect to `state`: the caller applies the busy-flag and
/// busy-count mutations. Agents and capacity consumed by earlier pairings
/// in the same sweep are accounted for, so the result never oversubscribes
/// a pool or double-books an agent.
pub fn first_fit(registry: &Registry, state: &CampaignState) -> Vec<Assignment> {
    let mut taken: HashSet<&str> = HashSet::new();
    let mut extra_busy: HashMap<&str, u32> = HashMap::new();
    let mut assignments = Vec::new();

    for platform in registry.platforms() {
        let Some(progress) = state.platforms.get(&platform.id) else {
            continue;
        };
        if progress.status != PlatformStatus::Queued {
            continue;
        }

        for agent in registry.agents() {
            if !eligible(agent, &platform.labels, registry, state, &taken, &extra_busy) {
                continue;
            }
            debug!(
                platform = %platform.id,
                agent = %agent.id,
                pool = %agent.pool_id,
                "matched platform to agent"
            );
            taken.insert(agent.id.as_str());
            *extra_busy.entry(agent.pool_id.as_str()).or_insert(0) += 1;
            assignments.push(Assignment {
                platform_id: platform.id.clone(),
                agent_id: agent.id.clone(),
                pool_id: agent.pool_id.clone(),
            });
            break;
        }
    }

    assignments
}

fn eligible(
    agent: &Agent,
    required: &[String],
    registry: &Registry,
    state: &CampaignState,
    taken: &HashSet<&str>,
    extra_busy: &HashMap<&str, u32>,
) -> bool {
    if !agent.available || taken.contains(agent.id.as_str()) {
        return false;
    }
    if state.agent_busy.get(&agent.id).copied().unwrap_or(false) {
        return false;
    }
    let Some(pool) = registry.pool(&agent.pool_id) else {
        return false;
    };
    let busy = state.pool_busy.get(&pool.id).copied().unwrap_or(0)
        + extra_busy.get(pool.id.as_str()).copied().unwrap_or(0);
    if busy >= pool.capacity {
        return false;
    }
    required.iter().all(|l| agent.labels.contains(l))
}
