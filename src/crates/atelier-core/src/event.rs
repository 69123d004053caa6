//! Typed event stream to the external subscriber.
//!
//! Events are published in FIFO order per workflow and wrapped in an
//! envelope carrying `{session_id, sequence, timestamp}`. Publication is
//! non-blocking: the sink buffers up to a bounded window and, on overflow,
//! discards the oldest chatter-class events (`agent_thinking`,
//! `agent_progress`) first. Terminal-class events (`workflow_complete`,
//! `error`) are never discarded, and nothing is accepted after
//! `workflow_complete`.

use crate::agent::AgentKind;
use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::warn;

/// Drop-priority classes for the bounded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventClass {
    /// Discardable progress chatter.
    Chatter = 0,
    /// Standard lifecycle updates.
    Normal = 1,
    /// Must never be dropped.
    Terminal = 2,
}

/// Everything the engine can tell its subscriber.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Sent once on connect.
    Welcome {},

    /// Workspace bound, session ready for queries.
    SessionInitialized {
        session_id: String,
        workspace_path: String,
    },

    /// The supervisor chose the next target.
    SupervisorDecision { next: String, reasoning: String },

    /// Free-form narration from an agent.
    AgentThinking { agent: AgentKind, message: String },

    /// Forwarded `$/progress` from a tool server, correlated to the
    /// calling agent.
    AgentProgress { agent: String, message: String },

    /// An agent began a tool call.
    AgentToolStart {
        agent: AgentKind,
        server: String,
        tool: String,
    },

    /// A tool call finished.
    AgentToolComplete {
        agent: AgentKind,
        server: String,
        tool: String,
        ok: bool,
        duration_ms: u64,
    },

    /// An agent finished its turn.
    AgentComplete { agent: AgentKind, summary: String },

    /// A file was materialized into the workspace.
    FileWritten { path: String, bytes: u64 },

    /// A later block replaced an earlier write of the same path.
    FileOverwritten { path: String },

    /// Human-in-the-loop gate; the engine awaits a matching
    /// `approval_response`.
    ApprovalRequest {
        correlation_id: String,
        action_type: String,
        payload: Value,
    },

    /// Exactly one per run, always last.
    WorkflowComplete {
        quality_score: Option<f64>,
        summary: String,
    },

    /// A recoverable or terminal failure.
    Error {
        kind: ErrorKind,
        message: String,
        #[serde(rename = "where")]
        location: String,
        retriable: bool,
    },
}

impl EngineEvent {
    /// Drop-priority class of this event.
    pub fn class(&self) -> EventClass {
        match self {
            EngineEvent::AgentThinking { .. } | EngineEvent::AgentProgress { .. } => {
                EventClass::Chatter
            }
            EngineEvent::WorkflowComplete { .. } | EngineEvent::Error { .. } => {
                EventClass::Terminal
            }
            _ => EventClass::Normal,
        }
    }

    /// Event type tag, as it appears on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::Welcome { .. } => "welcome",
            EngineEvent::SessionInitialized { .. } => "session_initialized",
            EngineEvent::SupervisorDecision { .. } => "supervisor_decision",
            EngineEvent::AgentThinking { .. } => "agent_thinking",
            EngineEvent::AgentProgress { .. } => "agent_progress",
            EngineEvent::AgentToolStart { .. } => "agent_tool_start",
            EngineEvent::AgentToolComplete { .. } => "agent_tool_complete",
            EngineEvent::AgentComplete { .. } => "agent_complete",
            EngineEvent::FileWritten { .. } => "file_written",
            EngineEvent::FileOverwritten { .. } => "file_overwritten",
            EngineEvent::ApprovalRequest { .. } => "approval_request",
            EngineEvent::WorkflowComplete { .. } => "workflow_complete",
            EngineEvent::Error { .. } => "error",
        }
    }
}

/// An event plus its delivery envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub session_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

struct StreamShared {
    session_id: String,
    capacity: usize,
    sequence: AtomicU64,
    buffer: Mutex<VecDeque<EventEnvelope>>,
    notify: Notify,
    closed: AtomicBool,
    terminal_seen: AtomicBool,
}

/// Cloneable publishing handle for one workflow's event stream.
#[derive(Clone)]
pub struct EventSink {
    shared: Arc<StreamShared>,
}

/// The single subscriber end of one workflow's event stream.
pub struct EventSubscriber {
    shared: Arc<StreamShared>,
}

/// Default buffered-window size before the drop policy engages.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Create a sink/subscriber pair for a session.
pub fn event_stream(session_id: impl Into<String>, capacity: usize) -> (EventSink, EventSubscriber) {
    let shared = Arc::new(StreamShared {
        session_id: session_id.into(),
        capacity: capacity.max(1),
        sequence: AtomicU64::new(0),
        buffer: Mutex::new(VecDeque::new()),
        notify: Notify::new(),
        closed: AtomicBool::new(false),
        terminal_seen: AtomicBool::new(false),
    });
    (
        EventSink {
            shared: Arc::clone(&shared),
        },
        EventSubscriber { shared },
    )
}

impl EventSink {
    /// Publish one event. Non-blocking; returns the assigned sequence
    /// number, or `None` if the event was refused (stream already saw its
    /// terminal `workflow_complete`).
    pub fn publish(&self, event: EngineEvent) -> Option<u64> {
        let shared = &self.shared;

        if shared.terminal_seen.load(Ordering::SeqCst) {
            warn!(
                session_id = %shared.session_id,
                event = event.event_type(),
                "event dropped: published after workflow_complete"
            );
            return None;
        }

        let is_complete = matches!(event, EngineEvent::WorkflowComplete { .. });
        let sequence = shared.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            session_id: shared.session_id.clone(),
            sequence,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = shared.buffer.lock().expect("event buffer poisoned");
            if buffer.len() >= shared.capacity {
                Self::evict_one(&mut buffer);
            }
            buffer.push_back(envelope);
        }

        if is_complete {
            shared.terminal_seen.store(true, Ordering::SeqCst);
        }
        shared.notify.notify_one();
        Some(sequence)
    }

    /// Evict the oldest chatter-class event, falling back to the oldest
    /// non-terminal one. Terminal events are never evicted.
    fn evict_one(buffer: &mut VecDeque<EventEnvelope>) {
        if let Some(idx) = buffer
            .iter()
            .position(|e| e.event.class() == EventClass::Chatter)
        {
            buffer.remove(idx);
            return;
        }
        if let Some(idx) = buffer
            .iter()
            .position(|e| e.event.class() != EventClass::Terminal)
        {
            buffer.remove(idx);
        }
        // All-terminal buffer: let it grow rather than lose a terminal.
    }

    /// Session this sink publishes for.
    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Whether the terminal `workflow_complete` has been published.
    pub fn is_terminal(&self) -> bool {
        self.shared.terminal_seen.load(Ordering::SeqCst)
    }

    /// Re-arm the stream for the next workflow run on this session. The
    /// no-events-after-`workflow_complete` guarantee is per run; a session
    /// serving a second query calls this before dispatching it.
    pub fn begin_run(&self) {
        self.shared.terminal_seen.store(false, Ordering::SeqCst);
    }

    /// Close the stream; the subscriber drains what remains then ends.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }
}

impl EventSubscriber {
    /// Await the next event in publish order. Returns `None` once the sink
    /// is closed and the buffer drained.
    pub async fn recv(&self) -> Option<EventEnvelope> {
        loop {
            // Register interest before checking state so a publish or
            // close landing in between cannot strand us.
            let mut notified = std::pin::pin!(self.shared.notify.notified());
            notified.as_mut().enable();
            {
                let mut buffer = self.shared.buffer.lock().expect("event buffer poisoned");
                if let Some(envelope) = buffer.pop_front() {
                    return Some(envelope);
                }
            }
            if self.shared.closed.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    /// Drain whatever is currently buffered, without waiting.
    pub fn try_drain(&self) -> Vec<EventEnvelope> {
        let mut buffer = self.shared.buffer.lock().expect("event buffer poisoned");
        buffer.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thinking(msg: &str) -> EngineEvent {
        EngineEvent::AgentThinking {
            agent: AgentKind::Research,
            message: msg.to_string(),
        }
    }

    fn complete() -> EngineEvent {
        EngineEvent::WorkflowComplete {
            quality_score: Some(0.9),
            summary: "done".to_string(),
        }
    }

    #[test]
    fn test_publish_assigns_increasing_sequence() {
        let (sink, sub) = event_stream("s", 16);
        assert_eq!(sink.publish(EngineEvent::Welcome {}), Some(0));
        assert_eq!(sink.publish(thinking("a")), Some(1));

        let drained = sub.try_drain();
        assert_eq!(drained.len(), 2);
        assert!(drained[0].sequence < drained[1].sequence);
    }

    #[test]
    fn test_no_events_after_workflow_complete() {
        let (sink, sub) = event_stream("s", 16);
        sink.publish(complete());
        assert!(sink.publish(thinking("late")).is_none());
        assert!(sink.is_terminal());

        let drained = sub.try_drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].event.event_type(), "workflow_complete");
    }

    #[test]
    fn test_overflow_drops_chatter_first() {
        let (sink, sub) = event_stream("s", 3);
        sink.publish(thinking("old-chatter"));
        sink.publish(EngineEvent::FileWritten {
            path: "a.rs".to_string(),
            bytes: 1,
        });
        sink.publish(EngineEvent::FileWritten {
            path: "b.rs".to_string(),
            bytes: 1,
        });
        // Buffer full: this pushes out the chatter, not the file events.
        sink.publish(complete());

        let types: Vec<&str> = sub
            .try_drain()
            .iter()
            .map(|e| e.event.event_type())
            .collect();
        assert_eq!(types, vec!["file_written", "file_written", "workflow_complete"]);
    }

    #[test]
    fn test_overflow_never_drops_terminal() {
        let (sink, sub) = event_stream("s", 2);
        sink.publish(EngineEvent::Error {
            kind: ErrorKind::ToolCallFailed,
            message: "boom".to_string(),
            location: "research".to_string(),
            retriable: true,
        });
        sink.publish(EngineEvent::SessionInitialized {
            session_id: "s".to_string(),
            workspace_path: "/ws".to_string(),
        });
        // Overflow evicts the normal event, not the error.
        sink.publish(complete());

        let types: Vec<&str> = sub
            .try_drain()
            .iter()
            .map(|e| e.event.event_type())
            .collect();
        assert_eq!(types, vec!["error", "workflow_complete"]);
    }

    #[tokio::test]
    async fn test_recv_in_fifo_order() {
        let (sink, sub) = event_stream("s", 16);
        sink.publish(thinking("one"));
        sink.publish(thinking("two"));
        sink.close();

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        assert!(first.sequence < second.sequence);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_event_wire_format() {
        let event = EngineEvent::SupervisorDecision {
            next: "architect".to_string(),
            reasoning: "needs a plan".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "supervisor_decision");
        assert_eq!(json["data"]["next"], "architect");
    }

    #[test]
    fn test_envelope_carries_session_and_sequence() {
        let (sink, sub) = event_stream("sess-9", 4);
        sink.publish(EngineEvent::Welcome {});
        let envelope = sub.try_drain().pop().unwrap();
        assert_eq!(envelope.session_id, "sess-9");
        assert_eq!(envelope.sequence, 0);
    }
}
