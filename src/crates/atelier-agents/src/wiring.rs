//! Assemble the workflow graph from the supervisor and the five workers.
//!
//! This is the one place where ambient collaborators meet the graph: each
//! node closure closes over a clone of the [`NodeContext`], so nothing
//! unserializable ever rides inside the workflow state.

use crate::architect::ArchitectNode;
use crate::codesmith::CodesmithNode;
use crate::context::NodeContext;
use crate::node::AgentNode;
use crate::research::ResearchNode;
use crate::responder::ResponderNode;
use crate::reviewfix::ReviewFixNode;
use crate::supervisor::Supervisor;
use atelier_checkpoint::CheckpointStore;
use atelier_core::{
    AgentKind, Command, EngineConfig, NodeFn, Result, StateUpdate, SupervisorFn, WorkflowGraph,
};
use futures::future::BoxFuture;
use std::sync::Arc;

fn node_fn<N>(node: N, ctx: NodeContext) -> NodeFn
where
    N: AgentNode + 'static,
{
    let node = Arc::new(node);
    Arc::new(move |state| {
        let node = Arc::clone(&node);
        let ctx = ctx.clone();
        let fut: BoxFuture<'static, Result<StateUpdate>> =
            Box::pin(async move { Ok(node.run(&state, &ctx).await) });
        fut
    })
}

/// Build a ready-to-run graph for one workflow.
pub fn build_graph(
    config: EngineConfig,
    ctx: NodeContext,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
) -> Result<WorkflowGraph> {
    let supervisor = Arc::new(Supervisor::new(ctx.clone()));
    let supervisor_fn: SupervisorFn = Arc::new(move |state| {
        let supervisor = Arc::clone(&supervisor);
        let fut: BoxFuture<'static, Result<Command>> =
            Box::pin(async move { supervisor.decide(&state).await });
        fut
    });

    let mut builder = WorkflowGraph::builder(config)
        .supervisor(supervisor_fn)
        .events(ctx.events.clone())
        .cancellation(ctx.cancel.clone())
        .add_node(AgentKind::Research, node_fn(ResearchNode, ctx.clone()))
        .add_node(AgentKind::Architect, node_fn(ArchitectNode, ctx.clone()))
        .add_node(AgentKind::Codesmith, node_fn(CodesmithNode, ctx.clone()))
        .add_node(AgentKind::ReviewFix, node_fn(ReviewFixNode, ctx.clone()))
        .add_node(AgentKind::Responder, node_fn(ResponderNode, ctx));

    if let Some(store) = checkpoints {
        builder = builder.checkpoint_store(store);
    }
    builder.build()
}
