//! Bus behavior against an in-memory tool server.
//!
//! The fake server speaks the same line-delimited JSON-RPC the subprocess
//! transport does, over a duplex pipe, which lets these tests exercise the
//! handshake, routing, health accounting, and progress forwarding without
//! spawning real processes.

use atelier_core::{event_stream, ToolServerManifest};
use atelier_toolbus::{BusError, ServerConnection, ServerStatus, ToolBus, ToolCallSpec};
use serde_json::{json, Value};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

#[derive(Clone, Copy, PartialEq)]
enum ServerScript {
    /// Serve tools forever.
    Serve,
    /// Complete the handshake, then hang up.
    DieAfterBoot,
}

async fn write_line(writer: &mut (impl tokio::io::AsyncWrite + Unpin), value: Value) {
    let mut line = value.to_string();
    line.push('\n');
    writer.write_all(line.as_bytes()).await.unwrap();
    writer.flush().await.unwrap();
}

/// Run a fake tool server on one end of a duplex pipe.
fn spawn_fake_server(io: DuplexStream, script: ServerScript) {
    tokio::spawn(async move {
        let (read, mut write) = tokio::io::split(io);
        let mut lines = BufReader::new(read).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let message: Value = match serde_json::from_str(&line) {
                Ok(message) => message,
                Err(_) => continue,
            };
            let id = message.get("id").and_then(Value::as_u64);
            let method = message.get("method").and_then(Value::as_str).unwrap_or("");

            match (id, method) {
                (Some(id), "initialize") => {
                    write_line(
                        &mut write,
                        json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": {
                                "protocolVersion": "2025-03-26",
                                "capabilities": {"tools": {}},
                                "serverInfo": {"name": "fake", "version": "0.0.1"}
                            }
                        }),
                    )
                    .await;
                }
                (None, "notifications/initialized") => {}
                (Some(id), "tools/list") => {
                    write_line(
                        &mut write,
                        json!({
                            "jsonrpc": "2.0",
                            "id": id,
                            "result": {
                                "tools": [
                                    {"name": "echo", "description": "echo arguments", "inputSchema": {"type": "object"}},
                                    {"name": "boom", "description": "always fails", "inputSchema": {"type": "object"}}
                                ]
                            }
                        }),
                    )
                    .await;
                    if script == ServerScript::DieAfterBoot {
                        return;
                    }
                }
                (Some(id), "tools/call") => {
                    let name = message["params"]["name"].as_str().unwrap_or("");
                    let arguments = message["params"]["arguments"].clone();
                    match name {
                        "echo" => {
                            write_line(
                                &mut write,
                                json!({
                                    "jsonrpc": "2.0",
                                    "id": id,
                                    "result": {"content": [{"type": "text", "text": arguments.to_string()}]}
                                }),
                            )
                            .await;
                        }
                        "boom" => {
                            write_line(
                                &mut write,
                                json!({
                                    "jsonrpc": "2.0",
                                    "id": id,
                                    "error": {"code": -32000, "message": "tool exploded"}
                                }),
                            )
                            .await;
                        }
                        "progress" => {
                            write_line(
                                &mut write,
                                json!({
                                    "jsonrpc": "2.0",
                                    "method": "$/progress",
                                    "params": {"requestId": id, "message": "halfway"}
                                }),
                            )
                            .await;
                            write_line(
                                &mut write,
                                json!({"jsonrpc": "2.0", "id": id, "result": {"content": []}}),
                            )
                            .await;
                        }
                        // "slow" and anything unknown: never answer.
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    });
}

/// Connect a bus-registered fake server; returns the bus.
async fn bus_with_fake(name: &str, script: ServerScript) -> ToolBus {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    spawn_fake_server(server_io, script);

    let (client_read, client_write) = tokio::io::split(client_io);
    let connection = ServerConnection::establish(
        name,
        client_read,
        client_write,
        None,
        Arc::new(AtomicU64::new(1)),
        None,
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let bus = ToolBus::new(vec![]);
    bus.register_connection(connection).await;
    bus
}

#[tokio::test]
async fn test_call_routes_and_matches_response() {
    let bus = bus_with_fake("tools", ServerScript::Serve).await;

    let result = bus
        .call("tools", "echo", json!({"q": "hello"}), None, None)
        .await
        .unwrap();
    let text = result["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("hello"));
}

#[tokio::test]
async fn test_handshake_declares_tools() {
    let bus = bus_with_fake("tools", ServerScript::Serve).await;
    let tools = bus.declared_tools("tools").await.unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "boom"]);
}

#[tokio::test]
async fn test_tool_error_surfaces_as_call_failed() {
    let bus = bus_with_fake("tools", ServerScript::Serve).await;

    let err = bus
        .call("tools", "boom", json!({}), None, None)
        .await
        .unwrap_err();
    match err {
        BusError::CallFailed { code, message, .. } => {
            assert_eq!(code, -32000);
            assert!(message.contains("exploded"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // A protocol-level failure is not a crash.
    assert_eq!(
        bus.server_status("tools").await,
        Some(ServerStatus::Ready)
    );
}

#[tokio::test]
async fn test_call_many_preserves_order_and_isolates_failures() {
    let bus = bus_with_fake("tools", ServerScript::Serve).await;

    let results = bus
        .call_many(
            vec![
                ToolCallSpec {
                    server: "tools".to_string(),
                    tool: "echo".to_string(),
                    arguments: json!({"n": 1}),
                    timeout: None,
                },
                ToolCallSpec {
                    server: "tools".to_string(),
                    tool: "boom".to_string(),
                    arguments: json!({}),
                    timeout: None,
                },
                ToolCallSpec {
                    server: "tools".to_string(),
                    tool: "echo".to_string(),
                    arguments: json!({"n": 3}),
                    timeout: None,
                },
            ],
            None,
        )
        .await;

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(BusError::CallFailed { .. })));
    assert!(results[2].as_ref().unwrap()["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains('3'));
}

#[tokio::test]
async fn test_unanswered_call_times_out() {
    let bus = bus_with_fake("tools", ServerScript::Serve).await;

    let err = bus
        .call(
            "tools",
            "slow",
            json!({}),
            Some(Duration::from_millis(100)),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::CallTimeout { .. }));
}

#[tokio::test]
async fn test_progress_notifications_forward_as_events() {
    let (sink, sub) = event_stream("sess", 64);
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    spawn_fake_server(server_io, ServerScript::Serve);

    let (client_read, client_write) = tokio::io::split(client_io);
    let connection = ServerConnection::establish(
        "tools",
        client_read,
        client_write,
        None,
        Arc::new(AtomicU64::new(1)),
        Some(sink),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let bus = ToolBus::new(vec![]);
    bus.register_connection(connection).await;

    bus.call("tools", "progress", json!({}), None, Some("research"))
        .await
        .unwrap();

    let progress: Vec<_> = sub
        .try_drain()
        .into_iter()
        .filter(|e| e.event.event_type() == "agent_progress")
        .collect();
    assert_eq!(progress.len(), 1);
    let json = serde_json::to_value(&progress[0].event).unwrap();
    assert_eq!(json["data"]["agent"], "research");
    assert_eq!(json["data"]["message"], "halfway");
}

#[tokio::test]
async fn test_dead_server_fails_then_respawn_is_refused() {
    let bus = bus_with_fake("tools", ServerScript::DieAfterBoot).await;

    // Give the fake server a moment to hang up.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // First call: the pipe is gone, so this is a transport-class failure
    // (or the bus already noticed and wrote the server off).
    let err = bus
        .call("tools", "echo", json!({}), None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BusError::Transport { .. } | BusError::ServerUnavailable { .. }
    ));

    // With no manifest to respawn from, the slot is written off; at the
    // latest the third call fast-fails with `ServerUnavailable`.
    let err = bus
        .call("tools", "echo", json!({}), None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BusError::Transport { .. } | BusError::ServerUnavailable { .. }
    ));
    let err = bus
        .call("tools", "echo", json!({}), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::ServerUnavailable { .. }));
    assert_eq!(
        bus.server_status("tools").await,
        Some(ServerStatus::Stopped)
    );
}

#[tokio::test]
async fn test_unknown_server_is_unavailable() {
    let bus = ToolBus::new(vec![ToolServerManifest {
        name: "known".to_string(),
        command: "definitely-not-a-real-binary".to_string(),
        args: vec![],
        working_dir: None,
        env: Default::default(),
        required: false,
    }]);

    let err = bus
        .call("unknown", "echo", json!({}), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::ServerUnavailable { .. }));
}

#[tokio::test]
async fn test_unspawnable_manifest_server_is_unavailable() {
    let bus = ToolBus::new(vec![ToolServerManifest {
        name: "ghost".to_string(),
        command: "/nonexistent/atelier-test-binary".to_string(),
        args: vec![],
        working_dir: None,
        env: Default::default(),
        required: false,
    }]);

    let err = bus
        .call("ghost", "echo", json!({}), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Spawn { .. }));

    // The slot is now stopped; later calls fast-fail.
    let err = bus
        .call("ghost", "echo", json!({}), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::ServerUnavailable { .. }));
}
