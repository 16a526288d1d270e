//! Per-partition checkpoint cursor
//!
//! One row per (provider, branch, kind) holding the highest snapshot
//! timestamp applied so far. The cursor is advisory: a read failure returns
//! `None` (process rather than stall, the merge rules keep reprocessing
//! harmless) and a write failure is logged and dropped (the next delivery of
//! the same snapshot re-runs as a no-op).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use shared::PartitionKey;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Highest applied timestamp for the partition, or `None` when there is
    /// no checkpoint or it cannot be read.
    async fn get(&self, key: &PartitionKey) -> Option<DateTime<Utc>>;

    /// Advance the cursor to `ts`. Never moves it backwards, never fails
    /// the caller.
    async fn set(&self, key: &PartitionKey, ts: DateTime<Utc>, source_ref: Option<&str>);
}

pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn get(&self, key: &PartitionKey) -> Option<DateTime<Utc>> {
        let res: Result<Option<(DateTime<Utc>,)>, _> =
            sqlx::query_as("SELECT last_ts FROM checkpoints WHERE partition_key = $1")
                .bind(key.storage_key())
                .fetch_optional(&self.pool)
                .await;
        match res {
            Ok(row) => row.map(|(ts,)| ts),
            Err(e) => {
                tracing::warn!(partition = %key, error = %e, "checkpoint read failed, processing anyway");
                None
            }
        }
    }

    async fn set(&self, key: &PartitionKey, ts: DateTime<Utc>, source_ref: Option<&str>) {
        let res = sqlx::query(
            r#"
            INSERT INTO checkpoints (partition_key, last_ts, last_source_ref, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (partition_key) DO UPDATE SET
                last_ts = GREATEST(checkpoints.last_ts, EXCLUDED.last_ts),
                last_source_ref = EXCLUDED.last_source_ref,
                updated_at = NOW()
            "#,
        )
        .bind(key.storage_key())
        .bind(ts)
        .bind(source_ref)
        .execute(&self.pool)
        .await;
        if let Err(e) = res {
            tracing::warn!(partition = %key, error = %e, "checkpoint write failed");
        }
    }
}
