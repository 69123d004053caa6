//! Routing commands returned by the supervisor.
//!
//! A [`Command`] carries the navigation target and an optional state update
//! to apply before dispatch. The graph interprets `goto`; nodes never
//! route themselves.

use crate::agent::AgentKind;
use crate::state::StateUpdate;
use serde::{Deserialize, Serialize};

/// Navigation target for the next transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goto {
    /// Run one node.
    Node(AgentKind),
    /// Run several independent nodes concurrently.
    Parallel(Vec<AgentKind>),
    /// Terminate the workflow.
    End,
}

impl From<AgentKind> for Goto {
    fn from(agent: AgentKind) -> Self {
        Goto::Node(agent)
    }
}

/// The supervisor's output: where to go and what to merge first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub goto: Goto,
    /// Update applied to state before the target runs (typically the
    /// instructions for the next node).
    #[serde(default)]
    pub update: StateUpdate,
    /// Supervisor's stated reasoning, echoed in the routing event.
    #[serde(default)]
    pub reasoning: String,
}

impl Command {
    pub fn goto(target: impl Into<Goto>) -> Self {
        Self {
            goto: target.into(),
            update: StateUpdate::new(),
            reasoning: String::new(),
        }
    }

    pub fn end() -> Self {
        Self {
            goto: Goto::End,
            update: StateUpdate::new(),
            reasoning: String::new(),
        }
    }

    pub fn with_update(mut self, update: StateUpdate) -> Self {
        self.update = update;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.update.instructions = Some(instructions.into());
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    /// Human-readable target, used in routing events and diagnostics.
    pub fn target_label(&self) -> String {
        match &self.goto {
            Goto::Node(agent) => agent.as_str().to_string(),
            Goto::Parallel(agents) => agents
                .iter()
                .map(|a| a.as_str())
                .collect::<Vec<_>>()
                .join("+"),
            Goto::End => "end".to_string(),
        }
    }
}
