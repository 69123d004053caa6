//! Engine configuration.
//!
//! Loaded from TOML; every field has a sensible default so an empty file
//! (or no file) yields a runnable engine.

use crate::agent::AgentKind;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_recursion_limit() -> u32 {
    20
}

fn default_node_timeout_ms() -> u64 {
    300_000
}

fn default_codesmith_timeout_ms() -> u64 {
    900_000
}

fn default_approval_timeout_ms() -> u64 {
    120_000
}

fn default_event_capacity() -> usize {
    1024
}

fn default_provider() -> String {
    "scripted".to_string()
}

/// One entry in the tool-server manifest: how to spawn a server and what
/// to call it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolServerManifest {
    /// Logical name used in `call(server, ...)`.
    pub name: String,
    /// Executable to spawn.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the subprocess.
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Required servers fail boot when they cannot start; optional ones
    /// surface `tool_server_unavailable` on first use instead.
    #[serde(default)]
    pub required: bool,
}

/// Settings for one named LLM provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// `openai_compat` or `scripted`.
    pub kind: String,
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
    pub model: Option<String>,
}

/// LLM provider selection: a default plus per-agent overrides.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub default: String,
    /// Keys are agent names (`supervisor`, `research`, ...).
    #[serde(default)]
    pub per_agent: BTreeMap<String, String>,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default: default_provider(),
            per_agent: BTreeMap::new(),
            providers: BTreeMap::new(),
        }
    }
}

/// Checkpoint persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckpointSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Relative to the workspace root; defaults to `.engine/checkpoints`.
    pub directory: Option<PathBuf>,
}

impl CheckpointSettings {
    /// Resolve the checkpoint directory under a workspace root.
    pub fn directory_under(&self, workspace: &Path) -> PathBuf {
        match &self.directory {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => workspace.join(dir),
            None => workspace.join(".engine").join("checkpoints"),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Hard ceiling on node transitions per workflow.
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: u32,

    /// Wall-clock budget for nodes without an override.
    #[serde(default = "default_node_timeout_ms")]
    pub default_node_timeout_ms: u64,

    /// Per-node overrides, keyed by agent name.
    #[serde(default)]
    pub node_timeouts_ms: BTreeMap<String, u64>,

    /// Optional whole-workflow deadline.
    pub workflow_deadline_ms: Option<u64>,

    /// How long a pending approval waits before implicit rejection.
    #[serde(default = "default_approval_timeout_ms")]
    pub approval_timeout_ms: u64,

    /// Bounded event-buffer window before the drop policy engages.
    #[serde(default = "default_event_capacity")]
    pub event_buffer_capacity: usize,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default, rename = "tool_server")]
    pub tool_servers: Vec<ToolServerManifest>,

    #[serde(default)]
    pub checkpoint: CheckpointSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recursion_limit: default_recursion_limit(),
            default_node_timeout_ms: default_node_timeout_ms(),
            node_timeouts_ms: BTreeMap::new(),
            workflow_deadline_ms: None,
            approval_timeout_ms: default_approval_timeout_ms(),
            event_buffer_capacity: default_event_capacity(),
            llm: LlmConfig::default(),
            tool_servers: Vec::new(),
            checkpoint: CheckpointSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from a TOML string.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.recursion_limit == 0 {
            return Err(EngineError::Config(
                "recursion_limit must be at least 1".to_string(),
            ));
        }
        let mut seen = std::collections::BTreeSet::new();
        for server in &self.tool_servers {
            if !seen.insert(&server.name) {
                return Err(EngineError::Config(format!(
                    "duplicate tool server name: {}",
                    server.name
                )));
            }
        }
        Ok(())
    }

    /// Wall-clock budget for one node. Codesmith defaults to 900 s, other
    /// nodes to `default_node_timeout_ms`, unless overridden.
    pub fn node_timeout(&self, agent: AgentKind) -> Duration {
        if let Some(ms) = self.node_timeouts_ms.get(agent.as_str()) {
            return Duration::from_millis(*ms);
        }
        let ms = match agent {
            AgentKind::Codesmith => default_codesmith_timeout_ms(),
            _ => self.default_node_timeout_ms,
        };
        Duration::from_millis(ms)
    }

    /// Manifest entry for a named server, if configured.
    pub fn tool_server(&self, name: &str) -> Option<&ToolServerManifest> {
        self.tool_servers.iter().find(|s| s.name == name)
    }

    /// Provider name configured for an agent role (falls back to default).
    pub fn provider_for(&self, role: &str) -> &str {
        self.llm
            .per_agent
            .get(role)
            .map(String::as_str)
            .unwrap_or(&self.llm.default)
    }
}
