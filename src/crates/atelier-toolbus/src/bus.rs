//! The tool bus: uniform access to every registered tool server.
//!
//! Servers are spawned lazily on first call and kept warm. Request ids are
//! monotonically unique across the whole bus. Health accounting follows
//! the crash model: two consecutive non-protocol failures mark a server
//! `crashed`; the next call gets one respawn attempt before the server is
//! written off and calls fast-fail with `ServerUnavailable`.
//!
//! The server map is touched only under the bus's own lock; callers hold a
//! cloned connection handle while their request is in flight, so one slow
//! server never blocks calls to another.

use crate::connection::{ServerConnection, ToolDescriptor};
use crate::error::{BusError, Result};
use crate::transport::spawn_server;
use atelier_core::{CancellationFlag, EventSink, ToolServerManifest};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Lifecycle of one server slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Starting,
    Ready,
    Crashed,
    Stopped,
}

/// One call in a `call_many` batch.
#[derive(Debug, Clone)]
pub struct ToolCallSpec {
    pub server: String,
    pub tool: String,
    pub arguments: Value,
    pub timeout: Option<Duration>,
}

struct ServerEntry {
    status: ServerStatus,
    connection: Option<Arc<ServerConnection>>,
    consecutive_failures: u32,
    respawn_attempted: bool,
}

impl ServerEntry {
    fn empty(status: ServerStatus) -> Self {
        Self {
            status,
            connection: None,
            consecutive_failures: 0,
            respawn_attempted: false,
        }
    }
}

/// JSON-RPC multiplexer over tool-server subprocesses.
pub struct ToolBus {
    manifests: HashMap<String, ToolServerManifest>,
    servers: Mutex<HashMap<String, ServerEntry>>,
    ids: Arc<AtomicU64>,
    events: Option<EventSink>,
    cancel: CancellationFlag,
    default_timeout: Duration,
    boot_deadline: Duration,
}

impl ToolBus {
    pub fn new(manifests: Vec<ToolServerManifest>) -> Self {
        Self {
            manifests: manifests.into_iter().map(|m| (m.name.clone(), m)).collect(),
            servers: Mutex::new(HashMap::new()),
            ids: Arc::new(AtomicU64::new(1)),
            events: None,
            cancel: CancellationFlag::new(),
            default_timeout: Duration::from_secs(30),
            boot_deadline: Duration::from_secs(20),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_boot_deadline(mut self, deadline: Duration) -> Self {
        self.boot_deadline = deadline;
        self
    }

    /// Whether a server name is known to this bus at all.
    pub fn knows(&self, server: &str) -> bool {
        self.manifests.contains_key(server)
    }

    /// Inject an already-established connection (in-process fakes, tests).
    pub async fn register_connection(&self, connection: ServerConnection) {
        let name = connection.name().to_string();
        let mut servers = self.servers.lock().await;
        servers.insert(
            name,
            ServerEntry {
                status: ServerStatus::Ready,
                connection: Some(Arc::new(connection)),
                consecutive_failures: 0,
                respawn_attempted: false,
            },
        );
    }

    /// Current status of a server slot, if it has one.
    pub async fn server_status(&self, server: &str) -> Option<ServerStatus> {
        self.servers.lock().await.get(server).map(|e| e.status)
    }

    /// Tools a ready server declared at boot.
    pub async fn declared_tools(&self, server: &str) -> Result<Vec<ToolDescriptor>> {
        let connection = self.ensure_ready(server).await?;
        Ok(connection.declared_tools().to_vec())
    }

    /// Single `tools/call`, awaiting the id-matched response.
    ///
    /// `origin` labels the calling agent for progress-event correlation.
    pub async fn call(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        timeout: Option<Duration>,
        origin: Option<&str>,
    ) -> Result<Value> {
        if self.cancel.is_cancelled() {
            return Err(BusError::Cancelled);
        }

        let connection = self.ensure_ready(server).await?;
        let id = self
            .ids
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let timeout = timeout.unwrap_or(self.default_timeout);
        let params = json!({"name": tool, "arguments": arguments});

        let result = tokio::select! {
            result = connection.request(id, "tools/call", params, timeout, origin) => result,
            _ = self.cancel.cancelled() => Err(BusError::Cancelled),
        };

        self.account(server, &result).await;
        result
    }

    /// Concurrent dispatch; one result per call, in spec order. A failing
    /// call surfaces as an error in its slot, never aborting siblings.
    pub async fn call_many(
        &self,
        calls: Vec<ToolCallSpec>,
        origin: Option<&str>,
    ) -> Vec<Result<Value>> {
        let futures = calls.into_iter().map(|spec| {
            let origin = origin.map(str::to_string);
            async move {
                self.call(
                    &spec.server,
                    &spec.tool,
                    spec.arguments,
                    spec.timeout,
                    origin.as_deref(),
                )
                .await
            }
        });
        futures::future::join_all(futures).await
    }

    /// Stop every server and forget the slots.
    pub async fn shutdown(&self) {
        let mut servers = self.servers.lock().await;
        for (name, entry) in servers.iter_mut() {
            if let Some(connection) = entry.connection.take() {
                info!(server = %name, "stopping tool server");
                connection.shutdown().await;
            }
            entry.status = ServerStatus::Stopped;
        }
    }

    /// Get a ready connection, spawning or respawning as the health model
    /// allows.
    async fn ensure_ready(&self, server: &str) -> Result<Arc<ServerConnection>> {
        let mut servers = self.servers.lock().await;

        if let Some(entry) = servers.get_mut(server) {
            match entry.status {
                ServerStatus::Ready => {
                    if let Some(connection) = &entry.connection {
                        if connection.is_alive() {
                            return Ok(Arc::clone(connection));
                        }
                        // Pipe died underneath us.
                        entry.status = ServerStatus::Crashed;
                        entry.connection = None;
                    }
                }
                ServerStatus::Starting | ServerStatus::Crashed => {}
                ServerStatus::Stopped => {
                    return Err(BusError::ServerUnavailable {
                        server: server.to_string(),
                    })
                }
            }

            if entry.status == ServerStatus::Crashed {
                if entry.respawn_attempted {
                    entry.status = ServerStatus::Stopped;
                    return Err(BusError::ServerUnavailable {
                        server: server.to_string(),
                    });
                }
                entry.respawn_attempted = true;
                warn!(server, "tool server crashed, attempting one respawn");
                match self.spawn_and_connect(server).await {
                    Ok(connection) => {
                        let connection = Arc::new(connection);
                        entry.status = ServerStatus::Ready;
                        entry.consecutive_failures = 0;
                        entry.connection = Some(Arc::clone(&connection));
                        return Ok(connection);
                    }
                    Err(e) => {
                        entry.status = ServerStatus::Stopped;
                        warn!(server, error = %e, "respawn failed; server written off");
                        return Err(BusError::ServerUnavailable {
                            server: server.to_string(),
                        });
                    }
                }
            }
        }

        // First use: lazy spawn.
        if !self.manifests.contains_key(server) {
            return Err(BusError::ServerUnavailable {
                server: server.to_string(),
            });
        }
        servers.insert(server.to_string(), ServerEntry::empty(ServerStatus::Starting));
        match self.spawn_and_connect(server).await {
            Ok(connection) => {
                let connection = Arc::new(connection);
                servers.insert(
                    server.to_string(),
                    ServerEntry {
                        status: ServerStatus::Ready,
                        connection: Some(Arc::clone(&connection)),
                        consecutive_failures: 0,
                        respawn_attempted: false,
                    },
                );
                Ok(connection)
            }
            Err(e) => {
                servers.insert(server.to_string(), ServerEntry::empty(ServerStatus::Stopped));
                Err(e)
            }
        }
    }

    async fn spawn_and_connect(&self, server: &str) -> Result<ServerConnection> {
        let manifest = self
            .manifests
            .get(server)
            .ok_or_else(|| BusError::ServerUnavailable {
                server: server.to_string(),
            })?;
        let spawned = spawn_server(manifest)?;
        ServerConnection::establish(
            server,
            spawned.stdout,
            spawned.stdin,
            Some(spawned.child),
            Arc::clone(&self.ids),
            self.events.clone(),
            self.boot_deadline,
        )
        .await
    }

    /// Crash accounting: two consecutive transport-class failures mark the
    /// server crashed; protocol-level tool failures do not count.
    async fn account(&self, server: &str, result: &Result<Value>) {
        let mut servers = self.servers.lock().await;
        let Some(entry) = servers.get_mut(server) else {
            return;
        };
        match result {
            Ok(_) => entry.consecutive_failures = 0,
            Err(e) if e.counts_as_crash() => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= 2 && entry.status == ServerStatus::Ready {
                    warn!(server, "two consecutive failures; marking server crashed");
                    entry.status = ServerStatus::Crashed;
                    if let Some(connection) = entry.connection.take() {
                        connection.shutdown().await;
                    }
                }
            }
            Err(_) => {}
        }
    }
}
