//! The supervisor: the workflow's sole decision-maker.
//!
//! Given the current state, the supervisor asks its model for a routing
//! decision as schema-constrained JSON, validates it, and returns a
//! [`Command`]. Free-form text parsing is deliberately absent: the reply
//! either validates against the decision schema or the deterministic
//! fallback policy takes over. The supervisor routes; it never does worker
//! work itself.

use crate::context::NodeContext;
use crate::prompts::{state_digest, SUPERVISOR_SYSTEM};
use atelier_core::{AgentKind, Command, Goto, Result, WorkflowState};
use atelier_llm::ChatRequest;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Quality score below which the fallback policy sends the code back to
/// the codesmith.
const QUALITY_THRESHOLD: f64 = 0.75;

/// How many codesmith rounds the fallback policy will spend chasing
/// quality before handing over to the responder.
const MAX_FALLBACK_CODESMITH_ROUNDS: u32 = 2;

/// What the supervisor decided, as decoded from the model.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorDecision {
    pub action: DecisionAction,
    #[serde(default)]
    pub next_agent: Option<String>,
    #[serde(default)]
    pub next_agents: Option<Vec<String>>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionAction {
    Continue,
    Parallel,
    Finish,
}

/// JSON schema the supervisor model must satisfy.
pub fn decision_schema() -> Value {
    json!({
        "type": "object",
        "required": ["action", "reasoning"],
        "additionalProperties": false,
        "properties": {
            "action": {
                "type": "string",
                "enum": ["continue", "parallel", "finish"]
            },
            "next_agent": {
                "type": ["string", "null"],
                "enum": ["research", "architect", "codesmith", "reviewfix", "responder", null]
            },
            "next_agents": {
                "type": ["array", "null"],
                "items": {
                    "type": "string",
                    "enum": ["research", "architect", "codesmith", "reviewfix", "responder"]
                }
            },
            "instructions": { "type": ["string", "null"] },
            "reasoning": { "type": "string" }
        }
    })
}

/// The routing decision function.
pub struct Supervisor {
    ctx: NodeContext,
}

impl Supervisor {
    pub fn new(ctx: NodeContext) -> Self {
        Self { ctx }
    }

    /// Decide the next transition for the given state.
    ///
    /// Never fails: an unusable model reply or a provider outage falls
    /// back to the deterministic phase policy.
    pub async fn decide(&self, state: &WorkflowState) -> Result<Command> {
        // Forced routes come before any model call.
        if state.user_response.is_some() && state.last_agent == Some(AgentKind::Responder) {
            return Ok(Command::end().with_reasoning("final response is ready"));
        }
        if state.no_progress_streak >= 2 {
            if state.last_agent == Some(AgentKind::Responder) {
                return Ok(Command::end()
                    .with_reasoning("responder made no progress twice; ending with what exists"));
            }
            let stuck = state
                .no_progress_agent
                .map(|a| a.as_str().to_string())
                .unwrap_or_default();
            return Ok(Command::goto(AgentKind::Responder)
                .with_instructions(format!(
                    "The {stuck} agent failed twice in a row without producing results. \
                     Summarize what was attempted, which artifacts exist, what failed, \
                     and what could be retried."
                ))
                .with_reasoning(format!("two consecutive no-progress transitions on {stuck}")));
        }

        let request = ChatRequest::from_prompt(SUPERVISOR_SYSTEM, self.decision_prompt(state))
            .with_temperature(0.0);

        match self
            .ctx
            .adapter
            .invoke_structured("supervisor", request, &decision_schema())
            .await
        {
            Ok(value) => match serde_json::from_value::<SupervisorDecision>(value) {
                Ok(decision) => Ok(self.validate(decision, state)),
                Err(e) => {
                    warn!(error = %e, "decision failed to decode; using fallback policy");
                    Ok(fallback_policy(state))
                }
            },
            Err(e) => {
                warn!(error = %e, "supervisor model unavailable; using fallback policy");
                Ok(fallback_policy(state))
            }
        }
    }

    fn decision_prompt(&self, state: &WorkflowState) -> String {
        format!(
            "{}\n\nCurrent instructions slot: {}\n\n\
             Choose the next action. Allowed targets: research, architect, \
             codesmith, reviewfix, responder. Use `finish` only when a final \
             response for the user exists.",
            state_digest(state),
            if state.instructions.is_empty() {
                "(empty)"
            } else {
                &state.instructions
            },
        )
    }

    /// Enforce the routing contract on a decoded decision.
    fn validate(&self, decision: SupervisorDecision, state: &WorkflowState) -> Command {
        let reasoning = decision.reasoning.unwrap_or_default();
        let instructions = decision.instructions.unwrap_or_default();

        let mut command = match decision.action {
            DecisionAction::Continue => {
                match decision.next_agent.as_deref().and_then(AgentKind::parse) {
                    Some(agent) => Command::goto(agent),
                    None => {
                        warn!(
                            target = ?decision.next_agent,
                            "continue without a valid target; using fallback policy"
                        );
                        return fallback_policy(state);
                    }
                }
            }
            DecisionAction::Parallel => {
                let mut agents: Vec<AgentKind> = Vec::new();
                for name in decision.next_agents.unwrap_or_default() {
                    match AgentKind::parse(&name) {
                        // Each agent owns its own result slot, so
                        // disjointness is exactly deduplication.
                        Some(agent) if !agents.contains(&agent) => agents.push(agent),
                        Some(_) => debug!(agent = %name, "duplicate parallel target dropped"),
                        None => {
                            warn!(agent = %name, "unknown parallel target; using fallback policy");
                            return fallback_policy(state);
                        }
                    }
                }
                match agents.len() {
                    0 => return fallback_policy(state),
                    1 => Command::goto(agents[0]),
                    _ => Command {
                        goto: Goto::Parallel(agents),
                        update: Default::default(),
                        reasoning: String::new(),
                    },
                }
            }
            DecisionAction::Finish => {
                if state.finish_precondition_met() {
                    Command::end()
                } else {
                    // Nothing terminal-capable has run; the user would get
                    // silence. Downgrade to a responder pass.
                    debug!("finish before any terminal-capable node; downgrading to responder");
                    Command::goto(AgentKind::Responder)
                }
            }
        };

        if !instructions.is_empty() {
            command = command.with_instructions(instructions);
        }
        command.with_reasoning(reasoning)
    }
}

/// Deterministic phase policy used when the supervisor model is
/// unavailable or its reply is unusable.
pub fn fallback_policy(state: &WorkflowState) -> Command {
    if state.user_response.is_some() && state.finish_precondition_met() {
        return Command::end().with_reasoning("fallback: final response exists");
    }
    if state.architecture.is_none() {
        return Command::goto(AgentKind::Architect)
            .with_instructions("Design the architecture for the user's request.")
            .with_reasoning("fallback: no architecture yet");
    }
    if state.generated_files.is_empty() {
        return Command::goto(AgentKind::Codesmith)
            .with_instructions("Implement the architecture.")
            .with_reasoning("fallback: no code generated yet");
    }
    match &state.review_report {
        None => Command::goto(AgentKind::ReviewFix)
            .with_instructions("Review the generated code and run build validation.")
            .with_reasoning("fallback: code not yet reviewed"),
        Some(report)
            if report.quality_score < QUALITY_THRESHOLD
                && state.execution_count(AgentKind::Codesmith) < MAX_FALLBACK_CODESMITH_ROUNDS =>
        {
            Command::goto(AgentKind::Codesmith)
                .with_instructions(format!(
                    "Quality score {:.2} is below {QUALITY_THRESHOLD}. Address the review \
                     issues and regenerate the affected files.",
                    report.quality_score
                ))
                .with_reasoning("fallback: review quality below threshold")
        }
        Some(_) if state.user_response.is_none() => Command::goto(AgentKind::Responder)
            .with_instructions("Summarize the work for the user.")
            .with_reasoning("fallback: ready for the final response"),
        Some(_) => Command::end().with_reasoning("fallback: workflow complete"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_core::{
        event_stream, CancellationFlag, ReviewReport, StateUpdate, WorkspaceWriter,
    };
    use atelier_llm::{AgentAdapter, ChatResponse, ScriptedFailure, ScriptedModel};
    use atelier_toolbus::ToolBus;
    use std::sync::Arc;

    fn ctx_with_model(model: ScriptedModel) -> (NodeContext, tempfile::TempDir) {
        let dir = tempfile::TempDir::new().unwrap();
        let (sink, _sub) = event_stream("sess", 64);
        let ctx = NodeContext::new(
            Arc::new(AgentAdapter::new(Arc::new(model))),
            Arc::new(ToolBus::new(vec![])),
            sink,
            Arc::new(WorkspaceWriter::bind(dir.path()).unwrap()),
            CancellationFlag::new(),
        );
        (ctx, dir)
    }

    fn state() -> WorkflowState {
        WorkflowState::new("build a calculator", "/tmp/ws", "sess")
    }

    fn decision(json: &str) -> ScriptedModel {
        ScriptedModel::new(vec![ChatResponse::text(json)])
    }

    #[tokio::test]
    async fn test_valid_continue_decision() {
        let (ctx, _dir) = ctx_with_model(decision(
            r#"{"action": "continue", "next_agent": "architect",
                "instructions": "design it", "reasoning": "no plan yet"}"#,
        ));
        let supervisor = Supervisor::new(ctx);

        let command = supervisor.decide(&state()).await.unwrap();
        assert_eq!(command.goto, Goto::Node(AgentKind::Architect));
        assert_eq!(command.update.instructions.as_deref(), Some("design it"));
        assert_eq!(command.reasoning, "no plan yet");
    }

    #[tokio::test]
    async fn test_finish_without_terminal_node_downgrades_to_responder() {
        let (ctx, _dir) = ctx_with_model(decision(
            r#"{"action": "finish", "reasoning": "looks done"}"#,
        ));
        let supervisor = Supervisor::new(ctx);

        let command = supervisor.decide(&state()).await.unwrap();
        assert_eq!(command.goto, Goto::Node(AgentKind::Responder));
    }

    #[tokio::test]
    async fn test_finish_allowed_after_responder_ran() {
        let (ctx, _dir) = ctx_with_model(decision(
            r#"{"action": "finish", "reasoning": "done"}"#,
        ));
        let supervisor = Supervisor::new(ctx);

        let mut s = state();
        s.apply(AgentKind::Responder, StateUpdate::new()).unwrap();
        let command = supervisor.decide(&s).await.unwrap();
        assert_eq!(command.goto, Goto::End);
    }

    #[tokio::test]
    async fn test_parallel_dedupes_and_preserves_order() {
        let (ctx, _dir) = ctx_with_model(decision(
            r#"{"action": "parallel",
                "next_agents": ["research", "architect", "research"],
                "reasoning": "independent work"}"#,
        ));
        let supervisor = Supervisor::new(ctx);

        let command = supervisor.decide(&state()).await.unwrap();
        assert_eq!(
            command.goto,
            Goto::Parallel(vec![AgentKind::Research, AgentKind::Architect])
        );
    }

    #[tokio::test]
    async fn test_single_parallel_target_becomes_continue() {
        let (ctx, _dir) = ctx_with_model(decision(
            r#"{"action": "parallel", "next_agents": ["research", "research"],
                "reasoning": "just research"}"#,
        ));
        let supervisor = Supervisor::new(ctx);

        let command = supervisor.decide(&state()).await.unwrap();
        assert_eq!(command.goto, Goto::Node(AgentKind::Research));
    }

    #[tokio::test]
    async fn test_model_outage_falls_back_to_phase_policy() {
        let (ctx, _dir) = ctx_with_model(ScriptedModel::failing(ScriptedFailure::Auth));
        let supervisor = Supervisor::new(ctx);

        let command = supervisor.decide(&state()).await.unwrap();
        // Fresh state: the fallback starts with the architect.
        assert_eq!(command.goto, Goto::Node(AgentKind::Architect));
    }

    #[tokio::test]
    async fn test_no_progress_streak_forces_responder() {
        let (ctx, _dir) = ctx_with_model(decision(
            r#"{"action": "continue", "next_agent": "research", "reasoning": "more"}"#,
        ));
        let supervisor = Supervisor::new(ctx);

        let mut s = state();
        s.no_progress_streak = 2;
        s.no_progress_agent = Some(AgentKind::Research);

        let command = supervisor.decide(&s).await.unwrap();
        assert_eq!(command.goto, Goto::Node(AgentKind::Responder));
        assert!(command.update.instructions.unwrap().contains("research"));
    }

    #[tokio::test]
    async fn test_end_after_responder_wrote_response() {
        let (ctx, _dir) = ctx_with_model(decision(
            r#"{"action": "continue", "next_agent": "research", "reasoning": "ignored"}"#,
        ));
        let supervisor = Supervisor::new(ctx);

        let mut s = state();
        let mut update = StateUpdate::new();
        update.user_response = Some("all done".to_string());
        s.apply(AgentKind::Responder, update).unwrap();

        let command = supervisor.decide(&s).await.unwrap();
        assert_eq!(command.goto, Goto::End);
    }

    #[test]
    fn test_fallback_quality_gate_routes_back_to_codesmith() {
        let mut s = state();
        s.architecture = Some(Default::default());
        s.generated_files.push(atelier_core::GeneratedFile {
            path: "main.py".to_string(),
            size: 10,
            hash: "h".to_string(),
        });
        s.executed_agents.insert(AgentKind::Codesmith, 1);
        s.review_report = Some(ReviewReport {
            issues: vec![],
            quality_score: 0.4,
            build_passed: false,
        });

        let command = fallback_policy(&s);
        assert_eq!(command.goto, Goto::Node(AgentKind::Codesmith));

        // After a second codesmith round the gate stops chasing quality.
        s.executed_agents.insert(AgentKind::Codesmith, 2);
        let command = fallback_policy(&s);
        assert_eq!(command.goto, Goto::Node(AgentKind::Responder));
    }
}
