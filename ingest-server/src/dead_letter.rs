//! Dead-letter recording
//!
//! A message that cannot be processed is captured with its error and the
//! original payload, then deleted from the work queue so it stops looping.
//! Recording must never fail the pipeline: every error here is logged and
//! swallowed. The DB table is the durable record; mirroring to an outbound
//! dead-letter queue is optional.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::queue::WorkQueue;

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Record a failed message. Infallible by contract.
    async fn record(&self, payload: &str, error: &str);
}

pub struct DeadLetterHandler {
    pool: PgPool,
    dlq: Option<Arc<dyn WorkQueue>>,
}

impl DeadLetterHandler {
    pub fn new(pool: PgPool, dlq: Option<Arc<dyn WorkQueue>>) -> Self {
        Self { pool, dlq }
    }
}

#[async_trait]
impl DeadLetterSink for DeadLetterHandler {
    async fn record(&self, payload: &str, error: &str) {
        let res = sqlx::query(
            "INSERT INTO dead_letters (original_payload, error) VALUES ($1, $2)",
        )
        .bind(payload)
        .bind(error)
        .execute(&self.pool)
        .await;
        if let Err(e) = res {
            tracing::warn!(error = %e, "failed to persist dead letter");
        }

        if let Some(dlq) = &self.dlq {
            let envelope = serde_json::json!({
                "error": error,
                "original": payload,
                "timestamp": Utc::now(),
            });
            if let Err(e) = dlq.send(&envelope.to_string()).await {
                tracing::warn!(error = %e, "failed to publish dead letter to queue");
            }
        }
    }
}
