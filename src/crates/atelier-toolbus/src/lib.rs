//! JSON-RPC tool bus for the atelier engine.
//!
//! Every cross-process call a node makes goes through the [`ToolBus`]:
//! it spawns tool-server subprocesses lazily from the configured manifest,
//! speaks line-delimited JSON-RPC 2.0 over their stdio, demultiplexes
//! responses by monotonically unique request id, forwards `$/progress`
//! notifications as engine events, and applies the crash/respawn health
//! model. Nodes never shell out directly; routing everything through the
//! bus keeps cancellation, timeout, and event semantics uniform.

pub mod bus;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod transport;

pub use bus::{ServerStatus, ToolBus, ToolCallSpec};
pub use connection::{ServerConnection, ToolDescriptor};
pub use error::{BusError, Result};
pub use protocol::{parse_line, RpcErrorObject, RpcIncoming, RpcNotification, RpcRequest};
