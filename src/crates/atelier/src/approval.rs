//! Human-in-the-loop approval broker.
//!
//! A node (or the session) can gate an action on client approval: the
//! broker publishes an `approval_request` event with a correlation id and
//! awaits the matching `approval_response`. A missing reply is an implicit
//! rejection once the configured deadline passes.

use crate::messages::ApprovalDecision;
use atelier_core::{EngineEvent, EventSink};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

/// The resolved outcome of one approval request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalOutcome {
    pub decision: ApprovalDecision,
    pub feedback: Option<String>,
}

/// Correlates approval requests with client responses.
pub struct ApprovalBroker {
    events: EventSink,
    timeout: Duration,
    pending: Mutex<HashMap<String, oneshot::Sender<ApprovalOutcome>>>,
}

impl ApprovalBroker {
    pub fn new(events: EventSink, timeout: Duration) -> Self {
        Self {
            events,
            timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Publish an approval request and await the client's verdict.
    pub async fn request(&self, action_type: &str, payload: Value) -> ApprovalOutcome {
        let correlation_id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("approval map poisoned")
            .insert(correlation_id.clone(), tx);

        self.events.publish(EngineEvent::ApprovalRequest {
            correlation_id: correlation_id.clone(),
            action_type: action_type.to_string(),
            payload,
        });

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            _ => {
                // No reply (or the session dropped): implicit rejection.
                warn!(correlation_id, "approval timed out; treating as rejected");
                self.pending
                    .lock()
                    .expect("approval map poisoned")
                    .remove(&correlation_id);
                ApprovalOutcome {
                    decision: ApprovalDecision::Rejected,
                    feedback: Some("no approval response before the deadline".to_string()),
                }
            }
        }
    }

    /// Route a client's `approval_response` to its waiting requester.
    /// Unknown correlation ids are ignored (the request may have already
    /// timed out).
    pub fn resolve(&self, correlation_id: &str, decision: ApprovalDecision, feedback: Option<String>) {
        let sender = self
            .pending
            .lock()
            .expect("approval map poisoned")
            .remove(correlation_id);
        match sender {
            Some(sender) => {
                let _ = sender.send(ApprovalOutcome { decision, feedback });
            }
            None => debug!(correlation_id, "approval response with no pending request"),
        }
    }
}
