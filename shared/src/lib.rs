//! Shared types for the price ingestion pipeline
//!
//! Domain types, the pipeline error taxonomy, and the pure reconciliation
//! engine used by the ingest-server workers. Enable the `db` feature to get
//! sqlx row derives and error conversions.

pub mod error;
pub mod models;
pub mod reconcile;

// Re-exports
pub use error::{BoxError, PipelineError};
pub use models::{CurrentItemState, ItemFact, LedgerRow, PartitionKey, Snapshot, SnapshotKind};
