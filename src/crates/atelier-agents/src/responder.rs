//! Responder node: the sole writer of `user_response`.
//!
//! Synthesizes the final message strictly from the accumulated results.
//! If the model is unavailable the node composes the message
//! deterministically; a run must never end without telling the user what
//! happened.

use crate::context::NodeContext;
use crate::node::AgentNode;
use crate::prompts::{truncate, RESPONDER_SYSTEM};
use atelier_core::{
    AgentError, AgentKind, AgentMessage, AgentResult, StateUpdate, WorkflowState,
};
use atelier_llm::ChatRequest;
use async_trait::async_trait;

pub struct ResponderNode;

/// Everything the responder is allowed to talk about.
fn results_digest(state: &WorkflowState) -> String {
    let mut sections = Vec::new();

    if state.accumulated_results.is_empty() {
        sections.push("No agent produced results.".to_string());
    } else {
        let entries: Vec<String> = state
            .accumulated_results
            .iter()
            .map(|r| {
                let refs = if r.artifact_refs.is_empty() {
                    String::new()
                } else {
                    format!(" (artifacts: {})", r.artifact_refs.join(", "))
                };
                format!("- [{}] {}{}", r.agent, truncate(&r.summary, 400), refs)
            })
            .collect();
        sections.push(format!("Agent results:\n{}", entries.join("\n")));
    }

    if !state.generated_files.is_empty() {
        let files: Vec<String> = state
            .generated_files
            .iter()
            .map(|f| format!("{} ({} bytes)", f.path, f.size))
            .collect();
        sections.push(format!("Files in the workspace:\n{}", files.join("\n")));
    }

    if let Some(report) = &state.review_report {
        sections.push(format!(
            "Review: quality {:.2}, build_passed={}, {} issue(s).",
            report.quality_score,
            report.build_passed,
            report.issues.len()
        ));
    }

    if !state.errors.is_empty() {
        let errors: Vec<String> = state
            .errors
            .iter()
            .map(|e| {
                format!(
                    "- [{}] {} (retriable: {})",
                    e.kind,
                    truncate(&e.message, 200),
                    e.retriable
                )
            })
            .collect();
        sections.push(format!("Problems encountered:\n{}", errors.join("\n")));
    }

    sections.join("\n\n")
}

/// Deterministic final message used when the model cannot be reached.
fn composed_fallback(state: &WorkflowState) -> String {
    let mut lines = vec![format!("Request: {}", state.user_query)];
    lines.push(results_digest(state));
    if state.generated_files.is_empty() && !state.errors.is_empty() {
        lines.push(
            "The request could not be completed; the retriable failures above \
             may succeed on a new attempt."
                .to_string(),
        );
    }
    lines.join("\n\n")
}

#[async_trait]
impl AgentNode for ResponderNode {
    fn kind(&self) -> AgentKind {
        AgentKind::Responder
    }

    async fn run(&self, state: &WorkflowState, ctx: &NodeContext) -> StateUpdate {
        ctx.emit_thinking(AgentKind::Responder, "composing final response");

        let digest = results_digest(state);
        let request = ChatRequest::from_prompt(
            RESPONDER_SYSTEM,
            format!(
                "User request: {}\n\nInstructions: {}\n\n{}\n\n\
                 Write the final message to the user. Reference artifact \
                 paths, counts, highlights, and known issues. Mention only \
                 what appears above.",
                state.user_query,
                if state.instructions.is_empty() {
                    "summarize the outcome"
                } else {
                    &state.instructions
                },
                digest
            ),
        );

        let mut update = StateUpdate::new();
        let response = match ctx.adapter.invoke("responder", request).await {
            Ok(response) if !response.content.trim().is_empty() => response.content,
            Ok(_) => composed_fallback(state),
            Err(e) => {
                let error = AgentError::new(AgentKind::Responder, e.error_kind(), e.to_string());
                ctx.emit_error(&error);
                update.errors.push(error);
                composed_fallback(state)
            }
        };

        ctx.emit_complete(AgentKind::Responder, truncate(&response, 200));
        update
            .accumulated_results
            .push(AgentResult::new(AgentKind::Responder, truncate(&response, 300)));
        update
            .messages
            .push(AgentMessage::agent(AgentKind::Responder, response.clone()));
        update.user_response = Some(response);
        update.can_end_workflow = Some(true);
        update
    }
}
