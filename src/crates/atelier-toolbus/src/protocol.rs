//! JSON-RPC 2.0 line protocol.
//!
//! One JSON object per line over the server's stdio. Only the shapes the
//! bus actually speaks are modeled; anything else on the wire is a
//! protocol error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version advertised in `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// An outbound request.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize as one wire line (no trailing newline).
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).expect("request serialization cannot fail")
    }
}

/// An outbound notification (no response expected).
#[derive(Debug, Clone, Serialize)]
pub struct RpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Value,
}

impl RpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }

    pub fn to_line(&self) -> String {
        serde_json::to_string(self).expect("notification serialization cannot fail")
    }
}

/// The error member of a response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Anything the server can send us.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcIncoming {
    /// Response to one of our requests.
    Response {
        id: u64,
        result: Option<Value>,
        error: Option<RpcErrorObject>,
    },
    /// Unsolicited notification (`$/progress`, `notifications/*`).
    Notification { method: String, params: Value },
    /// Server-to-client request (rare; answered with an empty result).
    Request {
        id: u64,
        method: String,
        params: Value,
    },
}

/// Parse one wire line.
pub fn parse_line(line: &str) -> Result<RpcIncoming, String> {
    let value: Value =
        serde_json::from_str(line.trim()).map_err(|e| format!("invalid JSON: {e}"))?;
    let obj = value
        .as_object()
        .ok_or_else(|| "JSON-RPC message must be an object".to_string())?;

    let id = obj.get("id").and_then(Value::as_u64);
    let method = obj.get("method").and_then(Value::as_str);

    match (id, method) {
        (Some(id), Some(method)) => Ok(RpcIncoming::Request {
            id,
            method: method.to_string(),
            params: obj.get("params").cloned().unwrap_or(Value::Null),
        }),
        (None, Some(method)) => Ok(RpcIncoming::Notification {
            method: method.to_string(),
            params: obj.get("params").cloned().unwrap_or(Value::Null),
        }),
        (Some(id), None) => {
            let error = match obj.get("error") {
                Some(e) => Some(
                    serde_json::from_value(e.clone())
                        .map_err(|e| format!("malformed error object: {e}"))?,
                ),
                None => None,
            };
            Ok(RpcIncoming::Response {
                id,
                result: obj.get("result").cloned(),
                error,
            })
        }
        (None, None) => Err("message has neither id nor method".to_string()),
    }
}
