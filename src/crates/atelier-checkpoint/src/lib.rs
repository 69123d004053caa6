//! Checkpoint persistence for atelier workflow runs.
//!
//! A checkpoint is a serialized snapshot of the workflow state taken after
//! each node transition, together with the command that produced it. The
//! graph records checkpoints to an in-memory log and, when configured, to a
//! [`CheckpointStore`] backend so a run can be inspected or replayed.
//!
//! Backends implement the [`CheckpointStore`] trait; this crate ships an
//! in-memory store for tests and short-lived sessions, and a filesystem
//! store that writes one JSON file per transition under the workspace's
//! checkpoint directory.
//!
//! Snapshots are plain JSON: state must round-trip through the
//! [`JsonSerializer`] unchanged, which is why the workflow state type
//! carries no live handles.

pub mod checkpoint;
pub mod error;
pub mod fs;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::Checkpoint;
pub use error::{CheckpointError, Result};
pub use fs::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;
pub use serializer::{JsonSerializer, SerializerProtocol};
pub use traits::CheckpointStore;
