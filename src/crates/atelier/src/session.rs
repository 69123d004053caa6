//! Per-connection session lifecycle.
//!
//! A session binds one client connection to one workspace: `init` first
//! (validated and exclusive, since two sessions must never share a
//! workspace), then one graph run per `query`, cooperative `cancel`, and
//! approval routing. The controller is cheaply cloneable so a transport can cancel
//! from a different task than the one running a query.

use crate::approval::ApprovalBroker;
use crate::bootstrap::ModelSet;
use crate::messages::ApprovalDecision;
use atelier_agents::{build_graph, NodeContext};
use atelier_checkpoint::{CheckpointStore, FileCheckpointStore};
use atelier_core::{
    CancellationFlag, EngineConfig, EngineError, EngineEvent, EventSink, GraphOutcome, Result,
    WorkflowState, WorkspaceWriter,
};
use atelier_toolbus::ToolBus;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Process-wide registry enforcing exclusive workspace ownership.
#[derive(Clone, Default)]
pub struct WorkspaceRegistry {
    bound: Arc<Mutex<HashSet<PathBuf>>>,
}

impl WorkspaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a workspace for one session. Fails precisely when another
    /// session already holds it.
    pub fn claim(&self, workspace: &Path) -> Result<()> {
        let mut bound = self.bound.lock().expect("registry poisoned");
        if !bound.insert(workspace.to_path_buf()) {
            return Err(EngineError::Workspace(format!(
                "workspace already bound to another session: {}",
                workspace.display()
            )));
        }
        Ok(())
    }

    pub fn release(&self, workspace: &Path) {
        self.bound
            .lock()
            .expect("registry poisoned")
            .remove(workspace);
    }
}

struct SessionInner {
    config: Arc<EngineConfig>,
    models: Arc<ModelSet>,
    bus: Arc<ToolBus>,
    registry: WorkspaceRegistry,
    events: EventSink,
    session_id: String,
    broker: Arc<ApprovalBroker>,
    workspace: Mutex<Option<Arc<WorkspaceWriter>>>,
    current_cancel: Mutex<Option<CancellationFlag>>,
}

/// One client connection's view of the engine.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<SessionInner>,
}

impl SessionController {
    /// Create a session and greet the client.
    pub fn new(
        config: Arc<EngineConfig>,
        models: Arc<ModelSet>,
        bus: Arc<ToolBus>,
        registry: WorkspaceRegistry,
        events: EventSink,
    ) -> Self {
        let broker = Arc::new(ApprovalBroker::new(
            events.clone(),
            Duration::from_millis(config.approval_timeout_ms),
        ));
        let session_id = Uuid::new_v4().to_string();
        events.publish(EngineEvent::Welcome {});

        Self {
            inner: Arc::new(SessionInner {
                config,
                models,
                bus,
                registry,
                events,
                session_id,
                broker,
                workspace: Mutex::new(None),
                current_cancel: Mutex::new(None),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn approval_broker(&self) -> Arc<ApprovalBroker> {
        Arc::clone(&self.inner.broker)
    }

    /// Bind the workspace. Must happen exactly once, before any query.
    pub fn handle_init(&self, workspace_path: &Path) -> Result<()> {
        let mut slot = self.inner.workspace.lock().expect("workspace slot poisoned");
        if slot.is_some() {
            return Err(EngineError::Workspace(
                "session already initialized".to_string(),
            ));
        }

        let writer = WorkspaceWriter::bind(workspace_path)?;
        self.inner.registry.claim(writer.root())?;

        info!(
            session_id = %self.inner.session_id,
            workspace = %writer.root().display(),
            "session initialized"
        );
        self.inner.events.publish(EngineEvent::SessionInitialized {
            session_id: self.inner.session_id.clone(),
            workspace_path: writer.root().display().to_string(),
        });

        *slot = Some(Arc::new(writer));
        Ok(())
    }

    /// Run one workflow for a user query, to termination.
    pub async fn run_query(&self, text: &str) -> Result<GraphOutcome> {
        let workspace = self
            .inner
            .workspace
            .lock()
            .expect("workspace slot poisoned")
            .clone()
            .ok_or_else(|| {
                EngineError::Workspace("session not initialized: send init first".to_string())
            })?;

        let cancel = CancellationFlag::new();
        {
            let mut slot = self
                .inner
                .current_cancel
                .lock()
                .expect("cancel slot poisoned");
            if slot.is_some() {
                return Err(EngineError::Internal(
                    "a query is already running on this session".to_string(),
                ));
            }
            *slot = Some(cancel.clone());
        }

        let outcome = self.execute(text, workspace, cancel).await;

        self.inner
            .current_cancel
            .lock()
            .expect("cancel slot poisoned")
            .take();
        outcome
    }

    async fn execute(
        &self,
        text: &str,
        workspace: Arc<WorkspaceWriter>,
        cancel: CancellationFlag,
    ) -> Result<GraphOutcome> {
        let inner = &self.inner;
        inner.events.begin_run();

        let adapter = inner.models.adapter(inner.events.clone(), cancel.clone());
        let ctx = NodeContext::new(
            Arc::new(adapter),
            Arc::clone(&inner.bus),
            inner.events.clone(),
            Arc::clone(&workspace),
            cancel,
        );

        let checkpoints: Option<Arc<dyn CheckpointStore>> = if inner.config.checkpoint.enabled {
            let dir = inner.config.checkpoint.directory_under(workspace.root());
            let store = FileCheckpointStore::new(dir);
            store.ensure_writable().await?;
            Some(Arc::new(store))
        } else {
            None
        };

        let graph = build_graph((*inner.config).clone(), ctx, checkpoints)?;
        let state = WorkflowState::new(text, workspace.root(), inner.session_id.clone());
        Ok(graph.run(state).await)
    }

    /// Cooperatively cancel the in-flight run, if any.
    pub fn cancel(&self) {
        if let Some(flag) = self
            .inner
            .current_cancel
            .lock()
            .expect("cancel slot poisoned")
            .as_ref()
        {
            info!(session_id = %self.inner.session_id, "cancellation requested");
            flag.cancel();
        }
    }

    /// Route a client's approval verdict.
    pub fn handle_approval(
        &self,
        correlation_id: &str,
        decision: ApprovalDecision,
        feedback: Option<String>,
    ) {
        self.inner.broker.resolve(correlation_id, decision, feedback);
    }

    /// Tear the session down: abandon in-flight work and release the
    /// workspace claim.
    pub fn close(&self) {
        self.cancel();
        if let Some(workspace) = self
            .inner
            .workspace
            .lock()
            .expect("workspace slot poisoned")
            .take()
        {
            self.inner.registry.release(workspace.root());
        }
        self.inner.events.close();
        info!(session_id = %self.inner.session_id, "session closed");
    }
}
