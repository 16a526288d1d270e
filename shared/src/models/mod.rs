//! Domain models for the ingestion pipeline

mod item_state;
mod snapshot;

pub use item_state::{CurrentItemState, LedgerRow};
pub use snapshot::{ItemFact, PartitionKey, Snapshot, SnapshotKind};
