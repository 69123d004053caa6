//! Boot wiring: logging, provider construction, bus construction.

use anyhow::{bail, Context};
use atelier_core::{CancellationFlag, EngineConfig, EventSink, ProviderConfig};
use atelier_llm::{AgentAdapter, ChatModel, OpenAiCompatConfig, OpenAiCompatModel, ScriptedModel};
use atelier_toolbus::ToolBus;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Initialize tracing. Events go to stdout, so logs go to stderr.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// The providers built from configuration: one default plus per-role
/// overrides, shared across every session of the process.
pub struct ModelSet {
    default: Arc<dyn ChatModel>,
    per_role: BTreeMap<String, Arc<dyn ChatModel>>,
}

fn build_provider(name: &str, config: &ProviderConfig) -> anyhow::Result<Arc<dyn ChatModel>> {
    match config.kind.as_str() {
        "openai_compat" => {
            let base_url = config
                .base_url
                .as_deref()
                .with_context(|| format!("provider `{name}` needs base_url"))?;
            let model = config
                .model
                .as_deref()
                .with_context(|| format!("provider `{name}` needs model"))?;
            let key_var = config.api_key_env.as_deref().unwrap_or("OPENAI_API_KEY");
            let client = OpenAiCompatModel::new(OpenAiCompatConfig::from_env(
                key_var, base_url, model,
            )?)?;
            Ok(Arc::new(client))
        }
        "scripted" => Ok(Arc::new(ScriptedModel::new(Vec::new()))),
        other => bail!("provider `{name}` has unknown kind `{other}`"),
    }
}

impl ModelSet {
    /// Build every named provider and resolve the default and per-agent
    /// selections.
    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let mut providers: BTreeMap<String, Arc<dyn ChatModel>> = BTreeMap::new();
        for (name, provider_config) in &config.llm.providers {
            providers.insert(name.clone(), build_provider(name, provider_config)?);
        }

        let default = match providers.get(&config.llm.default) {
            Some(model) => Arc::clone(model),
            None => {
                // The scripted provider exists so an engine with no real
                // provider still boots and terminates every run.
                warn!(
                    provider = %config.llm.default,
                    "default provider not configured; using the scripted stub"
                );
                Arc::new(ScriptedModel::new(Vec::new()))
            }
        };

        let mut per_role = BTreeMap::new();
        for (role, provider_name) in &config.llm.per_agent {
            match providers.get(provider_name) {
                Some(model) => {
                    per_role.insert(role.clone(), Arc::clone(model));
                }
                None => bail!("per-agent provider `{provider_name}` for `{role}` is not configured"),
            }
        }

        Ok(Self { default, per_role })
    }

    /// Direct construction (tests, embedding).
    pub fn new(
        default: Arc<dyn ChatModel>,
        per_role: BTreeMap<String, Arc<dyn ChatModel>>,
    ) -> Self {
        Self { default, per_role }
    }

    /// A per-run adapter wired to this set.
    pub fn adapter(&self, events: EventSink, cancel: CancellationFlag) -> AgentAdapter {
        let mut adapter = AgentAdapter::new(Arc::clone(&self.default))
            .with_events(events)
            .with_cancellation(cancel);
        for (role, model) in &self.per_role {
            adapter = adapter.with_model(role.clone(), Arc::clone(model));
        }
        adapter
    }
}

/// The process-wide tool bus, built from the configured manifest.
pub fn build_bus(config: &EngineConfig, events: EventSink) -> Arc<ToolBus> {
    Arc::new(ToolBus::new(config.tool_servers.clone()).with_events(events))
}

/// Spawn-check every `required` server. Optional servers stay lazy and
/// surface `tool_server_unavailable` on first use instead.
pub async fn preflight_required(config: &EngineConfig, bus: &ToolBus) -> anyhow::Result<()> {
    for manifest in config.tool_servers.iter().filter(|m| m.required) {
        let tools = bus
            .declared_tools(&manifest.name)
            .await
            .with_context(|| format!("required tool server `{}` failed to start", manifest.name))?;
        tracing::info!(
            server = %manifest.name,
            tools = tools.len(),
            "required tool server ready"
        );
    }
    Ok(())
}
