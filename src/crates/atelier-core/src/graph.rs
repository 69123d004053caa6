//! Workflow graph: hosts the nodes, interprets supervisor commands, and
//! enforces global policies.
//!
//! Execution starts at the supervisor, which returns a [`Command`]; the
//! graph dispatches the target node(s), applies the returned update, and
//! re-enters the supervisor. The loop ends when the supervisor returns
//! `Goto::End`, the recursion limit trips, a fatal error is raised, or the
//! run is cancelled. Whatever the exit path, exactly one
//! `workflow_complete` event is published.
//!
//! Nodes and the supervisor are supplied as boxed async closures; ambient
//! collaborators (tool bus, LLM adapter, event sink) are closed over at
//! construction time and never appear in [`WorkflowState`], which keeps
//! every snapshot serializable.

use crate::agent::AgentKind;
use crate::cancel::CancellationFlag;
use crate::command::{Command, Goto};
use crate::config::EngineConfig;
use crate::error::{EngineError, ErrorKind, Result};
use crate::event::{EngineEvent, EventSink};
use crate::state::{AgentError, StateUpdate, WorkflowState};
use atelier_checkpoint::{Checkpoint, CheckpointStore};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Grace period granted to an in-flight node after cancellation.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Async node function: consumes a state snapshot, returns an update.
pub type NodeFn =
    Arc<dyn Fn(WorkflowState) -> BoxFuture<'static, Result<StateUpdate>> + Send + Sync>;

/// Async supervisor function: consumes a state snapshot, returns a command.
pub type SupervisorFn =
    Arc<dyn Fn(WorkflowState) -> BoxFuture<'static, Result<Command>> + Send + Sync>;

/// Terminal status of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// The supervisor returned `End`.
    Completed,
    /// The hard recursion ceiling tripped.
    LimitExceeded,
    /// A fatal error or cancellation ended the run.
    Errored(ErrorKind),
}

/// One entry in the per-run transition log.
#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub iteration: u32,
    pub command: Value,
    pub snapshot: Value,
    pub at: DateTime<Utc>,
}

/// What a finished run hands back to the session.
#[derive(Debug)]
pub struct GraphOutcome {
    pub status: RunStatus,
    pub state: WorkflowState,
    pub transitions: Vec<TransitionRecord>,
}

enum NodeRun {
    Completed(Result<StateUpdate>),
    TimedOut,
    Cancelled(Option<StateUpdate>),
}

/// Builder for [`WorkflowGraph`].
pub struct GraphBuilder {
    nodes: HashMap<AgentKind, NodeFn>,
    supervisor: Option<SupervisorFn>,
    config: EngineConfig,
    events: Option<EventSink>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    cancel: CancellationFlag,
}

impl GraphBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            nodes: HashMap::new(),
            supervisor: None,
            config,
            events: None,
            checkpoints: None,
            cancel: CancellationFlag::new(),
        }
    }

    pub fn add_node(mut self, agent: AgentKind, node: NodeFn) -> Self {
        self.nodes.insert(agent, node);
        self
    }

    pub fn supervisor(mut self, supervisor: SupervisorFn) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> Result<WorkflowGraph> {
        let supervisor = self
            .supervisor
            .ok_or_else(|| EngineError::Config("graph requires a supervisor".to_string()))?;
        let events = self
            .events
            .ok_or_else(|| EngineError::Config("graph requires an event sink".to_string()))?;
        Ok(WorkflowGraph {
            nodes: self.nodes,
            supervisor,
            config: self.config,
            events,
            checkpoints: self.checkpoints,
            cancel: self.cancel,
        })
    }
}

/// The compiled workflow graph for one run.
pub struct WorkflowGraph {
    nodes: HashMap<AgentKind, NodeFn>,
    supervisor: SupervisorFn,
    config: EngineConfig,
    events: EventSink,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    cancel: CancellationFlag,
}

impl WorkflowGraph {
    pub fn builder(config: EngineConfig) -> GraphBuilder {
        GraphBuilder::new(config)
    }

    /// Cancellation handle for this run.
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// Execute the workflow to termination.
    pub async fn run(&self, mut state: WorkflowState) -> GraphOutcome {
        let started = Instant::now();
        let deadline = self
            .config
            .workflow_deadline_ms
            .map(Duration::from_millis);
        let mut transitions = Vec::new();

        info!(
            session_id = %state.session_id,
            query = %state.user_query,
            "workflow started"
        );

        let status = loop {
            if self.cancel.is_cancelled() {
                break self.finalize_cancelled(&mut state);
            }
            if let Some(limit) = deadline {
                if started.elapsed() >= limit {
                    break self.finalize_deadline(&mut state);
                }
            }
            if state.iteration >= self.config.recursion_limit {
                break self.finalize_limit(&mut state);
            }

            // AWAITING_DECISION: ask the supervisor where to go.
            let command = match (self.supervisor)(state.clone()).await {
                Ok(command) => command,
                Err(e) => break self.finalize_fatal(&mut state, e),
            };

            self.events.publish(EngineEvent::SupervisorDecision {
                next: command.target_label(),
                reasoning: command.reasoning.clone(),
            });

            let command_json = serde_json::to_value(&command).unwrap_or(Value::Null);
            let Command { goto, update, .. } = command;
            if let Err(e) = state.apply_command_update(update) {
                break self.finalize_fatal(&mut state, e);
            }

            match goto {
                Goto::End => break self.finalize_ok(&mut state),
                Goto::Node(agent) => {
                    match self.dispatch_one(agent, &mut state).await {
                        Ok(Some(status)) => break status,
                        Ok(None) => {}
                        Err(e) => break self.finalize_fatal(&mut state, e),
                    }
                }
                Goto::Parallel(agents) => {
                    match self.dispatch_parallel(&agents, &mut state).await {
                        Ok(Some(status)) => break status,
                        Ok(None) => {}
                        Err(e) => break self.finalize_fatal(&mut state, e),
                    }
                }
            }

            self.record_transition(&mut transitions, &state, command_json).await;
        };

        info!(
            session_id = %state.session_id,
            iterations = state.iteration,
            status = ?status,
            "workflow finished"
        );

        GraphOutcome {
            status,
            state,
            transitions,
        }
    }

    /// Run one node. Returns `Ok(Some(status))` when the run must
    /// terminate (cancellation), `Ok(None)` to continue the loop.
    async fn dispatch_one(
        &self,
        agent: AgentKind,
        state: &mut WorkflowState,
    ) -> Result<Option<RunStatus>> {
        let node = self.node(agent)?;
        debug!(agent = %agent, iteration = state.iteration, "dispatching node");

        match self.run_node(node, agent, state.clone()).await {
            NodeRun::Completed(Ok(update)) => {
                state.apply(agent, update)?;
                Ok(None)
            }
            NodeRun::Completed(Err(e)) => Err(e),
            NodeRun::TimedOut => {
                let error = self.budget_error(agent);
                self.publish_agent_error(&error);
                state.apply(agent, StateUpdate::errors_only(vec![error]))?;
                Ok(None)
            }
            NodeRun::Cancelled(update) => {
                if let Some(update) = update {
                    state.apply(agent, update)?;
                }
                Ok(Some(self.finalize_cancelled(state)))
            }
        }
    }

    /// Run several nodes concurrently and merge their updates in dispatch
    /// order. A failing sibling becomes an error entry; it never aborts
    /// the others.
    async fn dispatch_parallel(
        &self,
        agents: &[AgentKind],
        state: &mut WorkflowState,
    ) -> Result<Option<RunStatus>> {
        let mut futures = Vec::with_capacity(agents.len());
        for agent in agents {
            let node = self.node(*agent)?;
            futures.push(self.run_node(node, *agent, state.clone()));
        }
        let results = futures::future::join_all(futures).await;

        let mut cancelled = false;
        for (agent, run) in agents.iter().copied().zip(results) {
            match run {
                NodeRun::Completed(Ok(update)) => state.apply(agent, update)?,
                NodeRun::Completed(Err(e)) => {
                    // One sibling failing must not lose the others' work.
                    let error = AgentError::new(agent, e.kind(), e.to_string())
                        .with_retriable(false);
                    self.publish_agent_error(&error);
                    state.apply(agent, StateUpdate::errors_only(vec![error]))?;
                }
                NodeRun::TimedOut => {
                    let error = self.budget_error(agent);
                    self.publish_agent_error(&error);
                    state.apply(agent, StateUpdate::errors_only(vec![error]))?;
                }
                NodeRun::Cancelled(update) => {
                    if let Some(update) = update {
                        state.apply(agent, update)?;
                    }
                    cancelled = true;
                }
            }
        }

        if cancelled {
            return Ok(Some(self.finalize_cancelled(state)));
        }
        Ok(None)
    }

    async fn run_node(&self, node: NodeFn, agent: AgentKind, state: WorkflowState) -> NodeRun {
        let budget = self.config.node_timeout(agent);
        let fut = node(state);
        tokio::pin!(fut);

        tokio::select! {
            result = tokio::time::timeout(budget, &mut fut) => match result {
                Ok(update) => NodeRun::Completed(update),
                Err(_) => {
                    warn!(agent = %agent, budget_ms = budget.as_millis() as u64, "node budget exhausted");
                    NodeRun::TimedOut
                }
            },
            _ = self.cancel.cancelled() => {
                // Let the in-flight call finish briefly before aborting.
                match tokio::time::timeout(CANCEL_GRACE, &mut fut).await {
                    Ok(Ok(update)) => NodeRun::Cancelled(Some(update)),
                    _ => NodeRun::Cancelled(None),
                }
            }
        }
    }

    fn node(&self, agent: AgentKind) -> Result<NodeFn> {
        self.nodes.get(&agent).cloned().ok_or_else(|| {
            EngineError::StateInvariant(format!("no node registered for {agent}"))
        })
    }

    fn budget_error(&self, agent: AgentKind) -> AgentError {
        AgentError::new(
            agent,
            ErrorKind::NodeTimeout,
            format!(
                "{} exceeded its {}s budget",
                agent,
                self.config.node_timeout(agent).as_secs()
            ),
        )
        .with_retriable(true)
    }

    fn publish_agent_error(&self, error: &AgentError) {
        self.events.publish(EngineEvent::Error {
            kind: error.kind,
            message: error.message.clone(),
            location: error
                .agent
                .map(|a| a.as_str().to_string())
                .unwrap_or_else(|| "graph".to_string()),
            retriable: error.retriable,
        });
    }

    async fn record_transition(
        &self,
        transitions: &mut Vec<TransitionRecord>,
        state: &WorkflowState,
        command: Value,
    ) {
        let snapshot = match serde_json::to_value(state) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "state snapshot failed; transition not recorded");
                return;
            }
        };
        transitions.push(TransitionRecord {
            iteration: state.iteration,
            command: command.clone(),
            snapshot: snapshot.clone(),
            at: Utc::now(),
        });

        if let Some(store) = &self.checkpoints {
            let checkpoint =
                Checkpoint::new(state.session_id.clone(), state.iteration, snapshot, command);
            if let Err(e) = store.put(checkpoint).await {
                warn!(error = %e, "checkpoint persistence failed");
            }
        }
    }

    fn finalize_ok(&self, state: &mut WorkflowState) -> RunStatus {
        if state.user_response.is_none() {
            // The supervisor validated that a terminal-capable node ran, but
            // keep the single-completion guarantee even if nothing wrote one.
            state.user_response = Some(summarize_run(state, "Workflow completed."));
        }
        self.publish_complete(state);
        RunStatus::Completed
    }

    fn finalize_limit(&self, state: &mut WorkflowState) -> RunStatus {
        let looping = state
            .executed_agents
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(agent, _)| agent.as_str())
            .unwrap_or("none");
        let message = format!(
            "Workflow stopped: recursion limit of {} transitions reached. \
             Most-dispatched node: {}.",
            self.config.recursion_limit, looping
        );
        warn!(session_id = %state.session_id, "{message}");

        self.events.publish(EngineEvent::Error {
            kind: ErrorKind::RecursionLimitExceeded,
            message: message.clone(),
            location: "graph".to_string(),
            retriable: false,
        });
        state.user_response = Some(summarize_run(state, &message));
        self.publish_complete(state);
        RunStatus::LimitExceeded
    }

    fn finalize_cancelled(&self, state: &mut WorkflowState) -> RunStatus {
        let message = "Workflow cancelled by client.".to_string();
        self.events.publish(EngineEvent::Error {
            kind: ErrorKind::Cancelled,
            message: message.clone(),
            location: "graph".to_string(),
            retriable: false,
        });
        if state.user_response.is_none() {
            state.user_response = Some(summarize_run(state, &message));
        }
        self.publish_complete(state);
        RunStatus::Errored(ErrorKind::Cancelled)
    }

    fn finalize_deadline(&self, state: &mut WorkflowState) -> RunStatus {
        let message = "Workflow deadline exceeded.".to_string();
        self.events.publish(EngineEvent::Error {
            kind: ErrorKind::NodeTimeout,
            message: message.clone(),
            location: "graph".to_string(),
            retriable: false,
        });
        state.user_response = Some(summarize_run(state, &message));
        self.publish_complete(state);
        RunStatus::Errored(ErrorKind::NodeTimeout)
    }

    fn finalize_fatal(&self, state: &mut WorkflowState, error: EngineError) -> RunStatus {
        let kind = error.kind();
        warn!(session_id = %state.session_id, error = %error, "workflow failed");
        self.events.publish(EngineEvent::Error {
            kind,
            message: error.to_string(),
            location: "graph".to_string(),
            retriable: false,
        });
        if state.user_response.is_none() {
            state.user_response = Some(summarize_run(
                state,
                &format!("Workflow failed: {error}"),
            ));
        }
        self.publish_complete(state);
        RunStatus::Errored(kind)
    }

    fn publish_complete(&self, state: &WorkflowState) {
        self.events.publish(EngineEvent::WorkflowComplete {
            quality_score: state.review_report.as_ref().map(|r| r.quality_score),
            summary: state
                .user_response
                .clone()
                .unwrap_or_else(|| "Workflow completed.".to_string()),
        });
    }
}

/// Structured failure/termination summary: what was attempted, which
/// artifacts exist, what failed.
fn summarize_run(state: &WorkflowState, headline: &str) -> String {
    let mut lines = vec![headline.to_string()];
    if !state.executed_agents.is_empty() {
        let executed: Vec<String> = state
            .executed_agents
            .iter()
            .map(|(agent, count)| format!("{agent} x{count}"))
            .collect();
        lines.push(format!("Executed: {}.", executed.join(", ")));
    }
    if !state.generated_files.is_empty() {
        lines.push(format!(
            "Artifacts: {} file(s): {}.",
            state.generated_files.len(),
            state
                .generated_files
                .iter()
                .map(|f| f.path.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    if !state.errors.is_empty() {
        let retriable = state.errors.iter().filter(|e| e.retriable).count();
        lines.push(format!(
            "Errors: {} recorded ({} retriable). Last: {}.",
            state.errors.len(),
            retriable,
            state.errors.last().map(|e| e.message.as_str()).unwrap_or("")
        ));
    }
    lines.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_stream;
    use crate::state::AgentResult;
    use atelier_checkpoint::InMemoryCheckpointStore;

    fn passthrough_node(summary: &'static str, agent: AgentKind) -> NodeFn {
        Arc::new(move |_state: WorkflowState| {
            Box::pin(async move {
                Ok(StateUpdate::new().with_result(AgentResult::new(agent, summary)))
            }) as BoxFuture<'static, Result<StateUpdate>>
        })
    }

    /// Supervisor that routes architect until it has run `n` times, then ends.
    fn architect_n_times(n: u32) -> SupervisorFn {
        Arc::new(move |state: WorkflowState| {
            Box::pin(async move {
                if state.execution_count(AgentKind::Architect) < n {
                    Ok(Command::goto(AgentKind::Architect))
                } else {
                    Ok(Command::end())
                }
            }) as BoxFuture<'static, Result<Command>>
        })
    }

    fn test_config(limit: u32) -> EngineConfig {
        EngineConfig {
            recursion_limit: limit,
            ..EngineConfig::default()
        }
    }

    fn state() -> WorkflowState {
        WorkflowState::new("query", "/tmp/ws", "sess")
    }

    #[tokio::test]
    async fn test_simple_run_completes() {
        let (sink, sub) = event_stream("sess", 64);
        let graph = WorkflowGraph::builder(test_config(20))
            .add_node(AgentKind::Architect, passthrough_node("planned", AgentKind::Architect))
            .supervisor(architect_n_times(1))
            .events(sink)
            .build()
            .unwrap();

        let outcome = graph.run(state()).await;
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.state.iteration, 1);
        assert_eq!(outcome.state.execution_count(AgentKind::Architect), 1);

        let completes: Vec<_> = sub
            .try_drain()
            .into_iter()
            .filter(|e| e.event.event_type() == "workflow_complete")
            .collect();
        assert_eq!(completes.len(), 1);
    }

    #[tokio::test]
    async fn test_recursion_limit_one_trips_on_second_dispatch() {
        let (sink, sub) = event_stream("sess", 64);
        let graph = WorkflowGraph::builder(test_config(1))
            .add_node(AgentKind::Architect, passthrough_node("planned", AgentKind::Architect))
            .supervisor(architect_n_times(100))
            .events(sink)
            .build()
            .unwrap();

        let outcome = graph.run(state()).await;
        assert_eq!(outcome.status, RunStatus::LimitExceeded);
        assert_eq!(outcome.state.iteration, 1);
        let response = outcome.state.user_response.unwrap();
        assert!(response.contains("architect"));

        let events = sub.try_drain();
        let completes = events
            .iter()
            .filter(|e| e.event.event_type() == "workflow_complete")
            .count();
        assert_eq!(completes, 1);
    }

    #[tokio::test]
    async fn test_loop_until_limit_names_looping_node() {
        let (sink, _sub) = event_stream("sess", 256);
        let graph = WorkflowGraph::builder(test_config(5))
            .add_node(AgentKind::Architect, passthrough_node("planned", AgentKind::Architect))
            .supervisor(architect_n_times(100))
            .events(sink)
            .build()
            .unwrap();

        let outcome = graph.run(state()).await;
        assert_eq!(outcome.status, RunStatus::LimitExceeded);
        assert_eq!(outcome.state.iteration, 5);
        assert!(outcome.state.user_response.unwrap().contains("architect"));
    }

    #[tokio::test]
    async fn test_parallel_sibling_failure_keeps_other_update() {
        let failing: NodeFn = Arc::new(|_state| {
            Box::pin(async { Err(EngineError::Internal("boom".to_string())) })
                as BoxFuture<'static, Result<StateUpdate>>
        });

        let supervisor: SupervisorFn = Arc::new(|state: WorkflowState| {
            Box::pin(async move {
                if state.iteration == 0 {
                    Ok(Command {
                        goto: Goto::Parallel(vec![AgentKind::Research, AgentKind::Architect]),
                        update: StateUpdate::new(),
                        reasoning: String::new(),
                    })
                } else {
                    Ok(Command::end())
                }
            }) as BoxFuture<'static, Result<Command>>
        });

        let (sink, _sub) = event_stream("sess", 64);
        let graph = WorkflowGraph::builder(test_config(20))
            .add_node(AgentKind::Research, passthrough_node("found", AgentKind::Research))
            .add_node(AgentKind::Architect, failing)
            .supervisor(supervisor)
            .events(sink)
            .build()
            .unwrap();

        let outcome = graph.run(state()).await;
        assert_eq!(outcome.status, RunStatus::Completed);
        // Research's update survived; architect's failure was recorded.
        assert_eq!(outcome.state.accumulated_results.len(), 1);
        assert_eq!(outcome.state.errors.len(), 1);
        // Both siblings counted as transitions.
        assert_eq!(outcome.state.iteration, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_budget_exhaustion_records_error() {
        let slow: NodeFn = Arc::new(|_state| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(StateUpdate::new())
            }) as BoxFuture<'static, Result<StateUpdate>>
        });

        let supervisor: SupervisorFn = Arc::new(|state: WorkflowState| {
            Box::pin(async move {
                if state.iteration == 0 {
                    Ok(Command::goto(AgentKind::Research))
                } else {
                    Ok(Command::end())
                }
            }) as BoxFuture<'static, Result<Command>>
        });

        let (sink, _sub) = event_stream("sess", 64);
        let graph = WorkflowGraph::builder(test_config(20))
            .add_node(AgentKind::Research, slow)
            .supervisor(supervisor)
            .events(sink)
            .build()
            .unwrap();

        let outcome = graph.run(state()).await;
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.state.errors.len(), 1);
        assert_eq!(outcome.state.errors[0].kind, ErrorKind::NodeTimeout);
    }

    #[tokio::test]
    async fn test_cancel_before_dispatch() {
        let (sink, sub) = event_stream("sess", 64);
        let graph = WorkflowGraph::builder(test_config(20))
            .add_node(AgentKind::Architect, passthrough_node("planned", AgentKind::Architect))
            .supervisor(architect_n_times(100))
            .events(sink)
            .build()
            .unwrap();

        graph.cancellation().cancel();
        let outcome = graph.run(state()).await;
        assert_eq!(outcome.status, RunStatus::Errored(ErrorKind::Cancelled));

        let events = sub.try_drain();
        let types: Vec<&str> = events.iter().map(|e| e.event.event_type()).collect();
        assert!(types.contains(&"error"));
        assert_eq!(
            types.iter().filter(|t| **t == "workflow_complete").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_checkpoints_recorded_per_transition() {
        let store = Arc::new(InMemoryCheckpointStore::new());
        let (sink, _sub) = event_stream("sess", 64);
        let graph = WorkflowGraph::builder(test_config(20))
            .add_node(AgentKind::Architect, passthrough_node("planned", AgentKind::Architect))
            .supervisor(architect_n_times(3))
            .events(sink)
            .checkpoint_store(store.clone())
            .build()
            .unwrap();

        let outcome = graph.run(state()).await;
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.transitions.len(), 3);
        assert_eq!(store.len("sess").await, 3);

        // Snapshots round-trip back into state.
        let latest = store.latest("sess").await.unwrap().unwrap();
        let restored: WorkflowState = serde_json::from_value(latest.state).unwrap();
        assert_eq!(restored.iteration, 3);
    }

    #[tokio::test]
    async fn test_missing_node_is_fatal() {
        let (sink, _sub) = event_stream("sess", 64);
        let graph = WorkflowGraph::builder(test_config(20))
            .supervisor(architect_n_times(1))
            .events(sink)
            .build()
            .unwrap();

        let outcome = graph.run(state()).await;
        assert_eq!(
            outcome.status,
            RunStatus::Errored(ErrorKind::StateInvariantViolation)
        );
    }
}
