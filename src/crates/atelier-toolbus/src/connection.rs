//! One live tool-server conversation.
//!
//! A [`ServerConnection`] owns the write half of the server's stdio and a
//! background reader task that demultiplexes inbound lines: responses are
//! routed to their waiting caller by request id, `$/progress` and other
//! notifications are forwarded as `agent_progress` events, and
//! server-to-client requests get an empty result so a chatty server never
//! stalls.

use crate::error::{BusError, Result};
use crate::protocol::{
    parse_line, RpcErrorObject, RpcIncoming, RpcNotification, RpcRequest, PROTOCOL_VERSION,
};
use atelier_core::{EngineEvent, EventSink};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One tool as declared by `tools/list`.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

enum Reply {
    Result(Value),
    Error(RpcErrorObject),
    TransportClosed,
}

type PendingMap = Arc<StdMutex<HashMap<u64, oneshot::Sender<Reply>>>>;
type OriginMap = Arc<StdMutex<HashMap<u64, String>>>;
type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// A live connection to one tool server.
pub struct ServerConnection {
    name: String,
    writer: SharedWriter,
    pending: PendingMap,
    origins: OriginMap,
    tools: Vec<ToolDescriptor>,
    alive: Arc<AtomicBool>,
    child: Mutex<Option<Child>>,
    reader_task: JoinHandle<()>,
}

impl ServerConnection {
    /// Connect over arbitrary reader/writer halves and run the boot
    /// handshake (`initialize`, `notifications/initialized`, `tools/list`).
    /// The server is `ready` only once `tools/list` answered within the
    /// boot deadline.
    pub async fn establish<R, W>(
        name: impl Into<String>,
        reader: R,
        writer: W,
        child: Option<Child>,
        ids: Arc<AtomicU64>,
        events: Option<EventSink>,
        boot_deadline: Duration,
    ) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let name = name.into();
        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let origins: OriginMap = Arc::new(StdMutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let writer: SharedWriter = Arc::new(Mutex::new(Box::new(writer)));

        let reader_task = tokio::spawn(reader_loop(
            name.clone(),
            reader,
            Arc::clone(&writer),
            Arc::clone(&pending),
            Arc::clone(&origins),
            Arc::clone(&alive),
            events,
        ));

        let mut connection = Self {
            name,
            writer,
            pending,
            origins,
            tools: Vec::new(),
            alive,
            child: Mutex::new(child),
            reader_task,
        };

        connection.handshake(&ids, boot_deadline).await?;
        Ok(connection)
    }

    async fn handshake(&mut self, ids: &AtomicU64, boot_deadline: Duration) -> Result<()> {
        let init_id = ids.fetch_add(1, Ordering::SeqCst);
        self.request(
            init_id,
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "atelier",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
            boot_deadline,
            None,
        )
        .await?;

        self.notify("notifications/initialized", json!({})).await?;

        let list_id = ids.fetch_add(1, Ordering::SeqCst);
        let listed = self
            .request(list_id, "tools/list", json!({}), boot_deadline, None)
            .await?;

        self.tools = listed
            .get("tools")
            .and_then(Value::as_array)
            .map(|tools| {
                tools
                    .iter()
                    .map(|t| ToolDescriptor {
                        name: t.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                        description: t
                            .get("description")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string(),
                        input_schema: t.get("inputSchema").cloned().unwrap_or(Value::Null),
                    })
                    .collect()
            })
            .unwrap_or_default();

        debug!(server = %self.name, tools = self.tools.len(), "tool server ready");
        Ok(())
    }

    /// Send one request and await its id-matched response.
    pub async fn request(
        &self,
        id: u64,
        method: &str,
        params: Value,
        timeout: Duration,
        origin: Option<&str>,
    ) -> Result<Value> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(BusError::Transport {
                server: self.name.clone(),
                reason: "connection closed".to_string(),
            });
        }

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(id, tx);
        if let Some(origin) = origin {
            self.origins
                .lock()
                .expect("origin map poisoned")
                .insert(id, origin.to_string());
        }

        let tool_label = params
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(method)
            .to_string();
        let line = RpcRequest::new(id, method, params).to_line();

        let write_result = {
            let mut writer = self.writer.lock().await;
            write_wire_line(&mut *writer, &line).await
        };
        if let Err(e) = write_result {
            self.forget(id);
            return Err(BusError::Transport {
                server: self.name.clone(),
                reason: e.to_string(),
            });
        }

        let reply = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                self.forget(id);
                return Err(BusError::Transport {
                    server: self.name.clone(),
                    reason: "reader task gone".to_string(),
                });
            }
            Err(_) => {
                self.forget(id);
                return Err(BusError::CallTimeout {
                    server: self.name.clone(),
                    tool: tool_label,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };
        self.forget(id);

        match reply {
            Reply::Result(value) => Ok(value),
            Reply::Error(error) => Err(BusError::CallFailed {
                server: self.name.clone(),
                tool: tool_label,
                code: error.code,
                message: error.message,
            }),
            Reply::TransportClosed => Err(BusError::Transport {
                server: self.name.clone(),
                reason: "server closed its output stream".to_string(),
            }),
        }
    }

    /// Send a notification (no response expected).
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let line = RpcNotification::new(method, params).to_line();
        let mut writer = self.writer.lock().await;
        write_wire_line(&mut *writer, &line)
            .await
            .map_err(|e| BusError::Transport {
                server: self.name.clone(),
                reason: e.to_string(),
            })
    }

    fn forget(&self, id: u64) {
        self.pending.lock().expect("pending map poisoned").remove(&id);
        self.origins.lock().expect("origin map poisoned").remove(&id);
    }

    /// Tools declared during the handshake.
    pub fn declared_tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the reader side still has the pipe open.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Kill the subprocess (if any) and stop the reader.
    pub async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
        self.reader_task.abort();
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn write_wire_line(
    writer: &mut (dyn AsyncWrite + Send + Unpin),
    line: &str,
) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

/// Background task: demultiplex inbound lines until EOF.
async fn reader_loop<R>(
    server: String,
    reader: R,
    writer: SharedWriter,
    pending: PendingMap,
    origins: OriginMap,
    alive: Arc<AtomicBool>,
    events: Option<EventSink>,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(server = %server, error = %e, "tool server read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_line(&line) {
            Ok(RpcIncoming::Response { id, result, error }) => {
                let sender = pending.lock().expect("pending map poisoned").remove(&id);
                if let Some(sender) = sender {
                    let reply = match error {
                        Some(error) => Reply::Error(error),
                        None => Reply::Result(result.unwrap_or(Value::Null)),
                    };
                    let _ = sender.send(reply);
                } else {
                    debug!(server = %server, id, "response for unknown request id");
                }
            }
            Ok(RpcIncoming::Notification { method, params }) => {
                forward_notification(&server, &method, params, &origins, events.as_ref());
            }
            Ok(RpcIncoming::Request { id, method, .. }) => {
                // We are not a full peer; answer politely so the server
                // does not block on us.
                debug!(server = %server, method = %method, "answering server-side request with empty result");
                let response = json!({"jsonrpc": "2.0", "id": id, "result": {}}).to_string();
                let mut writer = writer.lock().await;
                let _ = write_wire_line(&mut *writer, &response).await;
            }
            Err(reason) => {
                warn!(server = %server, %reason, "ignoring malformed line from tool server");
            }
        }
    }

    alive.store(false, Ordering::SeqCst);

    // Fail whoever is still waiting.
    let stranded: Vec<_> = pending
        .lock()
        .expect("pending map poisoned")
        .drain()
        .collect();
    for (_, sender) in stranded {
        let _ = sender.send(Reply::TransportClosed);
    }
}

/// Turn `$/progress` (and friends) into an `agent_progress` event,
/// attributed to the calling agent via the in-flight request id.
fn forward_notification(
    server: &str,
    method: &str,
    params: Value,
    origins: &OriginMap,
    events: Option<&EventSink>,
) {
    let Some(events) = events else { return };
    if method != "$/progress" && !method.starts_with("notifications/") {
        return;
    }

    let origin = params
        .get("requestId")
        .and_then(Value::as_u64)
        .and_then(|id| origins.lock().expect("origin map poisoned").get(&id).cloned());

    let message = params
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| params.to_string());

    events.publish(EngineEvent::AgentProgress {
        agent: origin.unwrap_or_else(|| server.to_string()),
        message,
    });
}
