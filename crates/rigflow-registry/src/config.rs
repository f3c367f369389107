//! Campaign configuration parser.
//!
//! The registry sections of the campaign TOML file:
//!
//! ```toml
//! [[pool]]
//! id = "edge"
//! capacity = 1            # 0 (or omitted) means "use member count"
//!
//! [[pool.agent]]
//! id = "rig-arm-01"
//! labels = ["arm", "gpio"]
//! offline = false
//! launch_supported = true
//! temporarily_offline = false
//!
//! [[platform]]
//! id = "oe-riscv64"
//! labels = ["arm"]
//! ```
//!
//! Platforms and agents are matched in declaration order, so both are
//! arrays of tables rather than maps.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::RegistryResult;

/// Registry portion of the campaign configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(rename = "pool", default)]
    pub pools: Vec<PoolConfig>,
    #[serde(rename = "platform", default)]
    pub platforms: Vec<PlatformConfig>,
}

/// One agent pool with its nominal capacity and member agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub id: String,
    /// Maximum concurrently busy agents. 0 means "use member count".
    #[serde(default)]
    pub capacity: u32,
    #[serde(rename = "agent", default)]
    pub agents: Vec<AgentConfig>,
}

/// One agent's declared labels and health flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Administratively offline right now.
    #[serde(default)]
    pub offline: bool,
    /// Whether the backend can launch this agent on demand.
    #[serde(default = "default_true")]
    pub launch_supported: bool,
    /// Manually marked offline by an operator.
    #[serde(default)]
    pub temporarily_offline: bool,
}

/// One platform and the capability labels it requires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub id: String,
    pub labels: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl RegistryConfig {
    /// Parse the registry sections from a TOML string.
    pub fn from_str(content: &str) -> RegistryResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Parse the registry sections from a TOML file.
    pub fn from_file(path: &Path) -> RegistryResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() {
        let cfg = RegistryConfig::from_str(
            r#"
[[pool]]
id = "edge"
capacity = 1

[[pool.agent]]
id = "rig-1"
labels = ["arm"]

[[platform]]
id = "p1"
labels = ["arm"]
"#,
        )
        .unwrap();

        assert_eq!(cfg.pools.len(), 1);
        assert_eq!(cfg.pools[0].agents.len(), 1);
        assert_eq!(cfg.platforms[0].labels, vec!["arm"]);
        // Health flag defaults.
        let agent = &cfg.pools[0].agents[0];
        assert!(!agent.offline);
        assert!(agent.launch_supported);
        assert!(!agent.temporarily_offline);
    }

    #[test]
    fn capacity_defaults_to_zero() {
        let cfg = RegistryConfig::from_str(
            r#"
[[pool]]
id = "cloud"

[[pool.agent]]
id = "vm-1"
labels = ["x86"]

[[platform]]
id = "p1"
labels = ["x86"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.pools[0].capacity, 0);
    }

    #[test]
    fn malformed_toml_is_rejected() {
        let result = RegistryConfig::from_str("pool = \"not a table\"");
        assert!(result.is_err());
    }

    #[test]
    fn declaration_order_preserved() {
        let cfg = RegistryConfig::from_str(
            r#"
[[pool]]
id = "a"
[[pool.agent]]
id = "agent-z"
[[pool.agent]]
id = "agent-a"

[[platform]]
id = "zz"
labels = ["l"]
[[platform]]
id = "aa"
labels = ["l"]
"#,
        )
        .unwrap();
        let ids: Vec<_> = cfg.platforms.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["zz", "aa"]);
        let agents: Vec<_> = cfg.pools[0].agents.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(agents, vec!["agent-z", "agent-a"]);
    }
}
