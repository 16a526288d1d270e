//! Snapshot consumer
//!
//! Poll loop with at-least-once semantics: a message is deleted only after
//! its snapshot has been committed or recorded as a dead letter. Redelivery
//! of an already-applied snapshot re-runs as a no-op through the checkpoint
//! gate and the timestamp-gated merge.
//!
//! Error classes map to dispositions:
//! - parse/validation: poison, dead-letter then delete, never retried
//! - transport: leave the message on the queue, redelivered after the
//!   visibility timeout
//! - storage: retried up to the budget, then dead-lettered and deleted, or
//!   left on the queue when `requeue_on_storage_error` is set

use std::sync::Arc;

use shared::reconcile::{build_ledger_rows, merge_price_facts, merge_promo_facts};
use shared::{PipelineError, SnapshotKind};

use crate::backoff::Backoff;
use crate::blob::BlobStore;
use crate::db::{CheckpointStore, StateWriter};
use crate::dead_letter::DeadLetterSink;
use crate::queue::{QueueMessage, WorkQueue};
use crate::resolve::resolve_snapshot;

/// Per-message handling policy
#[derive(Debug, Clone, Default)]
pub struct ProcessPolicy {
    /// Extra attempts on storage errors before the final disposition
    pub retry_budget: u32,
    /// Leave storage-failed messages on the queue instead of dead-lettering
    pub requeue_on_storage_error: bool,
}

/// What to do with the queue message after handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Delete,
    Requeue,
}

/// Result of processing one message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied { upserts: usize, ledger: usize },
    SkippedByCheckpoint,
}

#[derive(Clone)]
pub struct Worker {
    queue: Arc<dyn WorkQueue>,
    blobs: Arc<dyn BlobStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    writer: Arc<dyn StateWriter>,
    dead_letters: Arc<dyn DeadLetterSink>,
    policy: ProcessPolicy,
    backoff: Backoff,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        blobs: Arc<dyn BlobStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        writer: Arc<dyn StateWriter>,
        dead_letters: Arc<dyn DeadLetterSink>,
        policy: ProcessPolicy,
        backoff: Backoff,
    ) -> Self {
        Self {
            queue,
            blobs,
            checkpoints,
            writer,
            dead_letters,
            policy,
            backoff,
        }
    }

    /// Resolve, gate, reconcile and commit one snapshot.
    ///
    /// No writes happen for a snapshot at or behind the partition
    /// checkpoint. The checkpoint itself advances only after the commit, so
    /// a crash between the two re-applies the snapshot harmlessly.
    async fn process(&self, body: &str) -> Result<Outcome, PipelineError> {
        let snapshot = resolve_snapshot(body, self.blobs.as_ref(), &self.backoff).await?;
        snapshot.validate()?;

        let partition = snapshot.partition_key();
        if let Some(last) = self.checkpoints.get(&partition).await
            && snapshot.timestamp <= last
        {
            tracing::info!(
                partition = %partition,
                ts = %snapshot.timestamp,
                checkpoint = %last,
                "snapshot at or behind checkpoint, skipping"
            );
            return Ok(Outcome::SkippedByCheckpoint);
        }

        let chain_id = snapshot.provider.to_lowercase();
        let store_id = snapshot.branch.as_str();
        let codes = snapshot.codes();
        let existing = self.writer.fetch_existing(store_id, &codes).await?;

        let upserts = match snapshot.kind {
            SnapshotKind::Prices => merge_price_facts(
                &chain_id,
                store_id,
                snapshot.timestamp,
                &snapshot.items,
                &existing,
            ),
            SnapshotKind::Promos => {
                merge_promo_facts(snapshot.timestamp, &snapshot.items, &existing)
            }
        };
        let ledger = build_ledger_rows(&snapshot, &upserts);

        self.writer.apply(&upserts, &ledger).await?;
        self.checkpoints
            .set(&partition, snapshot.timestamp, snapshot.src_key.as_deref())
            .await;

        Ok(Outcome::Applied {
            upserts: upserts.len(),
            ledger: ledger.len(),
        })
    }

    /// Handle one message end to end and decide its queue disposition.
    pub async fn handle_message(&self, msg: &QueueMessage) -> Disposition {
        let mut attempt = 0u32;
        loop {
            match self.process(&msg.body).await {
                Ok(Outcome::Applied { upserts, ledger }) => {
                    tracing::info!(message_id = %msg.id, upserts, ledger, "snapshot applied");
                    return Disposition::Delete;
                }
                Ok(Outcome::SkippedByCheckpoint) => {
                    return Disposition::Delete;
                }
                Err(e @ (PipelineError::Parse(_) | PipelineError::Validation(_))) => {
                    tracing::warn!(message_id = %msg.id, error = %e, "poison message, dead-lettering");
                    self.dead_letters.record(&msg.body, &e.to_string()).await;
                    return Disposition::Delete;
                }
                Err(e @ PipelineError::Transport(_)) => {
                    tracing::warn!(message_id = %msg.id, error = %e, "transport failure, leaving message for redelivery");
                    return Disposition::Requeue;
                }
                Err(e @ PipelineError::Storage(_)) => {
                    if attempt < self.policy.retry_budget {
                        attempt += 1;
                        let pause = self.backoff.delay(attempt);
                        tracing::warn!(
                            message_id = %msg.id,
                            attempt,
                            error = %e,
                            "storage failure, retrying"
                        );
                        tokio::time::sleep(pause).await;
                        continue;
                    }
                    if self.policy.requeue_on_storage_error {
                        tracing::warn!(message_id = %msg.id, error = %e, "storage failure, leaving message for redelivery");
                        return Disposition::Requeue;
                    }
                    tracing::error!(message_id = %msg.id, error = %e, "storage failure, dead-lettering");
                    self.dead_letters.record(&msg.body, &e.to_string()).await;
                    return Disposition::Delete;
                }
            }
        }
    }

    /// Poll loop. Returns only when the queue stays unreachable past the
    /// receive retry budget.
    pub async fn run(&self) -> Result<(), PipelineError> {
        loop {
            let messages = self
                .backoff
                .retry("queue receive", || self.queue.receive())
                .await?;

            for msg in messages {
                match self.handle_message(&msg).await {
                    Disposition::Delete => {
                        if let Err(e) = self.queue.delete(&msg.receipt).await {
                            // redelivery is safe; the next pass no-ops
                            tracing::warn!(message_id = %msg.id, error = %e, "delete failed");
                        }
                    }
                    Disposition::Requeue => {}
                }
            }
        }
    }
}
