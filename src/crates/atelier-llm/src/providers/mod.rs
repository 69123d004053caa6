//! Bundled providers.

pub mod openai;
pub mod scripted;

pub use openai::{OpenAiCompatConfig, OpenAiCompatModel};
pub use scripted::{ScriptedFailure, ScriptedModel};
