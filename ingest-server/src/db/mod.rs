//! PostgreSQL persistence
//!
//! Two stores over one pool: the per-partition checkpoint cursor and the
//! current-state/ledger writer. Both are trait-shaped so the consumer can be
//! exercised against in-memory doubles.

pub mod checkpoints;
pub mod writer;

pub use checkpoints::{CheckpointStore, PgCheckpointStore};
pub use writer::{PgStateWriter, StateWriter};
