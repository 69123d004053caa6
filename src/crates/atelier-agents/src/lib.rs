//! The supervisor and worker agents of the atelier engine.
//!
//! Five stateless workers (research, architect, codesmith, reviewfix,
//! responder) each consume the shared workflow state and return a typed
//! update. All routing lives in the [`Supervisor`]; a prior revision of
//! this system let every agent evaluate what should happen next, which
//! produced exponential coupling and inconsistent termination, so workers
//! here are pure and branch-free.
//!
//! [`wiring::build_graph`] assembles the pieces into a runnable
//! [`atelier_core::WorkflowGraph`].

pub mod architect;
pub mod codesmith;
pub mod context;
pub mod file_blocks;
pub mod node;
pub mod prompts;
pub mod research;
pub mod responder;
pub mod reviewfix;
pub mod supervisor;
pub mod wiring;

pub use architect::ArchitectNode;
pub use codesmith::CodesmithNode;
pub use context::NodeContext;
pub use file_blocks::{parse_file_blocks, FileBlock, RejectedBlock};
pub use node::AgentNode;
pub use research::ResearchNode;
pub use responder::ResponderNode;
pub use reviewfix::ReviewFixNode;
pub use supervisor::{decision_schema, fallback_policy, Supervisor, SupervisorDecision};
pub use wiring::build_graph;
