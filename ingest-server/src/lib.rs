//! ingest-server — price/promotion ingestion workers
//!
//! Long-running service that:
//! - Consumes normalized price/promo snapshots from a work queue (SQS)
//! - Resolves pointer messages against bulk objects in S3
//! - Reconciles facts into the current-state projection (PostgreSQL)
//! - Records unprocessable messages in the dead-letter store

pub mod backoff;
pub mod blob;
pub mod config;
pub mod consumer;
pub mod db;
pub mod dead_letter;
pub mod queue;
pub mod resolve;
pub mod state;
