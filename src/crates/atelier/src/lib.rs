//! Atelier: a supervisor-routed multi-agent coding engine.
//!
//! This crate is the assembly point: configuration load, provider and
//! tool-bus wiring, and the per-connection session controller. The
//! engine's pieces live in the sibling crates (`atelier-core`,
//! `atelier-agents`, `atelier-llm`, `atelier-toolbus`,
//! `atelier-checkpoint`); the binary in `src/main.rs` fronts a session
//! with a JSON-lines stdio protocol.

pub mod approval;
pub mod bootstrap;
pub mod messages;
pub mod session;

pub use approval::{ApprovalBroker, ApprovalOutcome};
pub use bootstrap::{build_bus, init_tracing, ModelSet};
pub use messages::{ApprovalDecision, ClientMessage};
pub use session::{SessionController, WorkspaceRegistry};
