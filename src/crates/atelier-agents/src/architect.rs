//! Architect node: produces or refines the architecture document.
//!
//! Re-invocation replaces the document in full; the superseded revision is
//! noted in `accumulated_results` so nothing is lost from the audit trail.

use crate::context::NodeContext;
use crate::node::AgentNode;
use crate::prompts::{truncate, ARCHITECT_SYSTEM};
use atelier_core::{
    AgentError, AgentKind, AgentResult, Architecture, ErrorKind, StateUpdate, WorkflowState,
};
use atelier_llm::ChatRequest;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct ArchitectNode;

/// JSON schema for the architecture document.
pub fn architecture_schema() -> Value {
    json!({
        "type": "object",
        "required": ["components"],
        "properties": {
            "components": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "responsibility"],
                    "properties": {
                        "name": { "type": "string" },
                        "responsibility": { "type": "string" }
                    }
                }
            },
            "data_model": { "type": "string" },
            "external_interfaces": { "type": "array", "items": { "type": "string" } },
            "decisions": { "type": "array", "items": { "type": "string" } }
        }
    })
}

impl ArchitectNode {
    fn design_prompt(&self, state: &WorkflowState) -> String {
        let mut sections = vec![format!("User request: {}", state.user_query)];

        if !state.instructions.is_empty() {
            sections.push(format!("Supervisor directive: {}", state.instructions));
        }
        for entry in &state.research_context {
            sections.push(format!(
                "Research [{:?}]: {}",
                entry.kind,
                truncate(&entry.findings, 1500)
            ));
        }
        if let Some(prior) = &state.architecture {
            sections.push(format!(
                "Existing architecture to refine (replace it in full):\n{}",
                serde_json::to_string_pretty(prior).unwrap_or_default()
            ));
        }

        sections.push("Produce the architecture document as JSON.".to_string());
        sections.join("\n\n")
    }
}

#[async_trait]
impl AgentNode for ArchitectNode {
    fn kind(&self) -> AgentKind {
        AgentKind::Architect
    }

    async fn run(&self, state: &WorkflowState, ctx: &NodeContext) -> StateUpdate {
        ctx.emit_thinking(AgentKind::Architect, "drafting architecture");

        let request = ChatRequest::from_prompt(ARCHITECT_SYSTEM, self.design_prompt(state))
            .with_temperature(0.2);

        let value = match ctx
            .adapter
            .invoke_structured("architect", request, &architecture_schema())
            .await
        {
            Ok(value) => value,
            Err(e) => {
                let error = AgentError::new(AgentKind::Architect, e.error_kind(), e.to_string());
                ctx.emit_error(&error);
                return StateUpdate::errors_only(vec![error]);
            }
        };

        let architecture: Architecture = match serde_json::from_value(value) {
            Ok(architecture) => architecture,
            Err(e) => {
                let error = AgentError::new(
                    AgentKind::Architect,
                    ErrorKind::PermanentLlmError,
                    format!("architecture document failed to decode: {e}"),
                )
                .with_retriable(false);
                ctx.emit_error(&error);
                return StateUpdate::errors_only(vec![error]);
            }
        };

        // The output guarantee: never replace a document with an empty one.
        if architecture.components.is_empty() {
            let error = AgentError::new(
                AgentKind::Architect,
                ErrorKind::PermanentLlmError,
                "architect returned an empty component list; keeping prior architecture",
            )
            .with_retriable(true);
            ctx.emit_error(&error);
            return StateUpdate::errors_only(vec![error]);
        }

        let mut update = StateUpdate::new();
        if let Some(prior) = &state.architecture {
            let superseded: Vec<&str> = prior.components.iter().map(|c| c.name.as_str()).collect();
            update.accumulated_results.push(AgentResult::new(
                AgentKind::Architect,
                format!("superseded architecture revision: [{}]", superseded.join(", ")),
            ));
        }

        let names: Vec<&str> = architecture.components.iter().map(|c| c.name.as_str()).collect();
        let summary = format!(
            "architecture with {} component(s): [{}]",
            names.len(),
            names.join(", ")
        );
        ctx.emit_complete(AgentKind::Architect, summary.clone());

        update
            .accumulated_results
            .push(AgentResult::new(AgentKind::Architect, summary));
        update.architecture = Some(architecture);
        update
    }
}
