//! # duragraph-checkpoint - Versioned thread state
//!
//! Checkpoints are **immutable, parent-linked snapshots** of a thread's channel
//! values. They make run execution resumable (a paused run records where it
//! stopped), inspectable (thread state and history views) and forkable (a
//! copied thread starts from a root checkpoint seeded with the source values).
//!
//! ## Core pieces
//!
//! - [`Checkpoint`] / [`CheckpointWrite`] - the data model
//! - [`CheckpointStore`] - async storage trait with an expected-parent guard
//! - [`InMemoryCheckpointStore`] - reference store for development and tests
//! - [`state`] - thread-state operations: update, snapshot, fork, views
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use duragraph_checkpoint::{state, InMemoryCheckpointStore};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemoryCheckpointStore::new();
//!
//!     let mut values = serde_json::Map::new();
//!     values.insert("topic".to_string(), json!("billing"));
//!     state::update_thread_state(&store, "thread-1", "", values, None).await?;
//!
//!     let view = state::get_thread_state(&store, "thread-1", "").await?;
//!     println!("{:?}", view.values);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod state;
pub mod traits;

pub use checkpoint::{
    is_reserved_channel, ChannelValues, Checkpoint, CheckpointWrite, METADATA_CHANNEL,
    NEXT_CHANNEL, TASKS_CHANNEL,
};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointStore;
pub use state::ThreadState;
pub use traits::{CheckpointStore, HistoryQuery};
