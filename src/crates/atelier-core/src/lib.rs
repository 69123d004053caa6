//! Core engine primitives for atelier.
//!
//! This crate holds everything the rest of the workspace builds on: the
//! typed workflow state and its merge policy, the supervisor command
//! vocabulary, the workflow graph that hosts nodes and enforces global
//! policies (recursion limit, node budgets, cancellation, checkpointing),
//! the ordered event stream, workspace path safety, and configuration.
//!
//! The crate is deliberately free of LLM and subprocess concerns; those
//! live in `atelier-llm` and `atelier-toolbus` and reach nodes through a
//! side-channel context owned by `atelier-agents`.

pub mod agent;
pub mod cancel;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod state;
pub mod workspace;

pub use agent::AgentKind;
pub use cancel::CancellationFlag;
pub use command::{Command, Goto};
pub use config::{CheckpointSettings, EngineConfig, LlmConfig, ProviderConfig, ToolServerManifest};
pub use error::{EngineError, ErrorKind, Result};
pub use event::{
    event_stream, EngineEvent, EventClass, EventEnvelope, EventSink, EventSubscriber,
    DEFAULT_EVENT_CAPACITY,
};
pub use graph::{GraphBuilder, GraphOutcome, NodeFn, RunStatus, SupervisorFn, WorkflowGraph};
pub use state::{
    AgentError, AgentMessage, AgentResult, Architecture, Component, GeneratedFile, IssueSeverity,
    ResearchEntry, ResearchKind, ReviewIssue, ReviewReport, StateUpdate, WorkflowState,
};
pub use workspace::{content_hash, WorkspaceWriter, WriteOutcome};
