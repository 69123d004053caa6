//! The worker-node trait.

use crate::context::NodeContext;
use atelier_core::{AgentKind, StateUpdate, WorkflowState};
use async_trait::async_trait;

/// One phase worker (research, architect, codesmith, reviewfix,
/// responder).
///
/// Nodes are stateless: they read from the state snapshot and the ambient
/// context, and return a [`StateUpdate`]. Recoverable failures become
/// error entries in the update; nodes do not raise, and they never route.
/// The supervisor owns all branching.
#[async_trait]
pub trait AgentNode: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn run(&self, state: &WorkflowState, ctx: &NodeContext) -> StateUpdate;
}
