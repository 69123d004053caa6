//! The ambient side-channel handed to every node.
//!
//! A [`NodeContext`] carries the collaborators nodes need but state must
//! not: the tool bus, the LLM adapter, the event sink, the workspace
//! writer, and the cancellation flag. It is cloned into each node closure
//! when the graph is built; none of it ever serializes into a checkpoint.

use atelier_core::{AgentKind, CancellationFlag, EngineEvent, EventSink, WorkspaceWriter};
use atelier_llm::AgentAdapter;
use atelier_toolbus::{BusError, ToolBus};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Ambient collaborators for node execution.
#[derive(Clone)]
pub struct NodeContext {
    pub adapter: Arc<AgentAdapter>,
    pub bus: Arc<ToolBus>,
    pub events: EventSink,
    pub workspace: Arc<WorkspaceWriter>,
    pub cancel: CancellationFlag,
}

impl NodeContext {
    pub fn new(
        adapter: Arc<AgentAdapter>,
        bus: Arc<ToolBus>,
        events: EventSink,
        workspace: Arc<WorkspaceWriter>,
        cancel: CancellationFlag,
    ) -> Self {
        Self {
            adapter,
            bus,
            events,
            workspace,
            cancel,
        }
    }

    /// Call a tool on behalf of an agent, wrapping the bus call in
    /// `agent_tool_start` / `agent_tool_complete` events.
    pub async fn call_tool(
        &self,
        agent: AgentKind,
        server: &str,
        tool: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, BusError> {
        self.events.publish(EngineEvent::AgentToolStart {
            agent,
            server: server.to_string(),
            tool: tool.to_string(),
        });

        // The bus is shared across workflows; this run's cancellation is
        // applied here rather than on the bus itself.
        let started = Instant::now();
        let result = tokio::select! {
            result = self
                .bus
                .call(server, tool, arguments, timeout, Some(agent.as_str())) => result,
            _ = self.cancel.cancelled() => Err(BusError::Cancelled),
        };

        self.events.publish(EngineEvent::AgentToolComplete {
            agent,
            server: server.to_string(),
            tool: tool.to_string(),
            ok: result.is_ok(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
        result
    }

    pub fn emit_thinking(&self, agent: AgentKind, message: impl Into<String>) {
        self.events.publish(EngineEvent::AgentThinking {
            agent,
            message: message.into(),
        });
    }

    pub fn emit_complete(&self, agent: AgentKind, summary: impl Into<String>) {
        self.events.publish(EngineEvent::AgentComplete {
            agent,
            summary: summary.into(),
        });
    }

    /// Surface a recoverable node error on the event stream. The matching
    /// state entry travels in the node's `StateUpdate`.
    pub fn emit_error(&self, error: &atelier_core::AgentError) {
        self.events.publish(EngineEvent::Error {
            kind: error.kind,
            message: error.message.clone(),
            location: error
                .agent
                .map(|a| a.as_str().to_string())
                .unwrap_or_else(|| "node".to_string()),
            retriable: error.retriable,
        });
    }
}
