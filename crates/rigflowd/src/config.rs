//! campaign.toml parser.
//!
//! One file declares the whole campaign: the backend to dispatch through,
//! the script template, and the registry sections (pools, agents,
//! platforms) that `rigflow-registry` consumes.

use serde::{Deserialize, Serialize};
use std::path::Path;

use rigflow_registry::RegistryConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub campaign: CampaignSection,
    pub backend: BackendSection,
    #[serde(default)]
    pub script: ScriptSection,
    #[serde(flatten)]
    pub registry: RegistryConfig,
}

/// `[campaign]` — defaults the CLI can override.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignSection {
    /// Software version under test; also the checkpoint key.
    pub version: Option<String>,
}

/// `[backend]` — which job backend to dispatch through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendSection {
    pub kind: BackendKind,
    /// Base URL of the CI server (`kind = "rest"` only).
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub api_token: Option<String>,
}

/// Declared backend strategy, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Dispatch through a CI server's REST API.
    Rest,
    /// Pretend every job starts and succeeds immediately; for rehearsing a
    /// campaign configuration without touching the CI server.
    DryRun,
}

/// `[script]` — how the per-platform job script is produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSection {
    /// Shell command template; `{platform}` expands to the platform id.
    pub command_template: String,
    /// Artifact glob patterns the job should archive.
    pub artifacts: Vec<String>,
}

impl Default for ScriptSection {
    fn default() -> Self {
        Self {
            command_template: "run-tests --platform {platform}".to_string(),
            artifacts: vec!["results/**".to_string()],
        }
    }
}

impl DaemonConfig {
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }
}
