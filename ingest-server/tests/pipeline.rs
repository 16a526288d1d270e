//! End-to-end consumer tests over in-memory stores
//!
//! Exercises the full message path (resolve, checkpoint gate, reconcile,
//! commit, dead-letter) without PostgreSQL or AWS.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ingest_server::backoff::Backoff;
use ingest_server::blob::BlobStore;
use ingest_server::consumer::{Disposition, ProcessPolicy, Worker};
use ingest_server::db::{CheckpointStore, StateWriter};
use ingest_server::dead_letter::DeadLetterSink;
use ingest_server::queue::{QueueMessage, WorkQueue};
use shared::{CurrentItemState, LedgerRow, PartitionKey, PipelineError};

#[derive(Default)]
struct InMemoryQueue {
    deleted: Mutex<Vec<String>>,
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn receive(&self) -> Result<Vec<QueueMessage>, PipelineError> {
        Ok(Vec::new())
    }

    async fn delete(&self, receipt: &str) -> Result<(), PipelineError> {
        self.deleted.lock().unwrap().push(receipt.to_string());
        Ok(())
    }

    async fn send(&self, body: &str) -> Result<(), PipelineError> {
        self.sent.lock().unwrap().push(body.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryBlob {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryBlob {
    fn put(&self, bucket: &str, key: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert((bucket.to_string(), key.to_string()), bytes.to_vec());
    }
}

#[async_trait]
impl BlobStore for InMemoryBlob {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>, PipelineError> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| PipelineError::Transport(format!("no object {bucket}/{key}")))
    }
}

#[derive(Default)]
struct InMemoryCheckpoints {
    cursors: Mutex<HashMap<String, DateTime<Utc>>>,
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpoints {
    async fn get(&self, key: &PartitionKey) -> Option<DateTime<Utc>> {
        self.cursors.lock().unwrap().get(&key.storage_key()).copied()
    }

    async fn set(&self, key: &PartitionKey, ts: DateTime<Utc>, _source_ref: Option<&str>) {
        let mut cursors = self.cursors.lock().unwrap();
        let entry = cursors.entry(key.storage_key()).or_insert(ts);
        if ts > *entry {
            *entry = ts;
        }
    }
}

#[derive(Default)]
struct InMemoryState {
    rows: Mutex<HashMap<(String, String), CurrentItemState>>,
    ledger: Mutex<Vec<LedgerRow>>,
    apply_calls: AtomicU32,
    failures_left: AtomicU32,
}

impl InMemoryState {
    fn fail_next_applies(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    fn row(&self, store_id: &str, code: &str) -> Option<CurrentItemState> {
        self.rows
            .lock()
            .unwrap()
            .get(&(store_id.to_string(), code.to_string()))
            .cloned()
    }
}

#[async_trait]
impl StateWriter for InMemoryState {
    async fn fetch_existing(
        &self,
        store_id: &str,
        codes: &[String],
    ) -> Result<HashMap<String, CurrentItemState>, PipelineError> {
        let rows = self.rows.lock().unwrap();
        Ok(codes
            .iter()
            .filter_map(|c| rows.get(&(store_id.to_string(), c.clone())).cloned())
            .map(|r| (r.code.clone(), r))
            .collect())
    }

    async fn apply(
        &self,
        upserts: &[CurrentItemState],
        ledger: &[LedgerRow],
    ) -> Result<(), PipelineError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if self.failures_left.load(Ordering::SeqCst) > 0 {
            self.failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(PipelineError::storage("simulated write failure"));
        }
        let mut rows = self.rows.lock().unwrap();
        for row in upserts {
            rows.insert((row.store_id.clone(), row.code.clone()), row.clone());
        }
        let mut stored = self.ledger.lock().unwrap();
        for entry in ledger {
            let dup = stored.iter().any(|l| {
                l.provider == entry.provider
                    && l.branch == entry.branch
                    && l.kind == entry.kind
                    && l.ts == entry.ts
                    && l.code == entry.code
            });
            if !dup {
                stored.push(entry.clone());
            }
        }
        Ok(())
    }

    async fn expire_promos(&self, now: DateTime<Utc>) -> Result<u64, PipelineError> {
        let mut rows = self.rows.lock().unwrap();
        Ok(shared::reconcile::expire_stale_promos(rows.values_mut(), now))
    }
}

#[derive(Default)]
struct RecordingDeadLetters {
    records: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl DeadLetterSink for RecordingDeadLetters {
    async fn record(&self, payload: &str, error: &str) {
        self.records
            .lock()
            .unwrap()
            .push((payload.to_string(), error.to_string()));
    }
}

struct Harness {
    queue: Arc<InMemoryQueue>,
    blobs: Arc<InMemoryBlob>,
    checkpoints: Arc<InMemoryCheckpoints>,
    state: Arc<InMemoryState>,
    dead_letters: Arc<RecordingDeadLetters>,
    worker: Worker,
}

fn harness(policy: ProcessPolicy) -> Harness {
    let queue = Arc::new(InMemoryQueue::default());
    let blobs = Arc::new(InMemoryBlob::default());
    let checkpoints = Arc::new(InMemoryCheckpoints::default());
    let state = Arc::new(InMemoryState::default());
    let dead_letters = Arc::new(RecordingDeadLetters::default());
    let worker = Worker::new(
        queue.clone(),
        blobs.clone(),
        checkpoints.clone(),
        state.clone(),
        dead_letters.clone(),
        policy,
        Backoff::new(2, Duration::ZERO, Duration::ZERO),
    );
    Harness {
        queue,
        blobs,
        checkpoints,
        state,
        dead_letters,
        worker,
    }
}

fn message(body: &str) -> QueueMessage {
    QueueMessage {
        id: "m-1".into(),
        receipt: "r-1".into(),
        body: body.into(),
    }
}

fn price_doc(ts: &str) -> String {
    format!(
        r#"{{
            "provider": "keshet", "branch": "001", "type": "pricesFull",
            "timestamp": "{ts}",
            "items": [
                {{"code": "729000001", "name": "Milk 3%", "price": 6.9}},
                {{"code": "729000002", "name": "Bread", "price": 8.5}}
            ]
        }}"#
    )
}

#[tokio::test]
async fn test_applied_snapshot_writes_state_and_checkpoint() {
    let h = harness(ProcessPolicy::default());
    let msg = message(&price_doc("2025-01-01T10:00:00Z"));

    assert_eq!(h.worker.handle_message(&msg).await, Disposition::Delete);

    let milk = h.state.row("001", "729000001").expect("row written");
    assert_eq!(milk.chain_id, "keshet");
    assert_eq!(milk.name.as_deref(), Some("Milk 3%"));
    assert_eq!(h.state.ledger.lock().unwrap().len(), 2);

    let pk = PartitionKey {
        provider: "keshet".into(),
        branch: "001".into(),
        kind: shared::SnapshotKind::Prices,
    };
    let cursor = h.checkpoints.get(&pk).await.expect("checkpoint set");
    assert_eq!(cursor.to_rfc3339(), "2025-01-01T10:00:00+00:00");
}

#[tokio::test]
async fn test_snapshot_behind_checkpoint_is_skipped_without_writes() {
    let h = harness(ProcessPolicy::default());
    let pk = PartitionKey {
        provider: "keshet".into(),
        branch: "001".into(),
        kind: shared::SnapshotKind::Prices,
    };
    let ahead: DateTime<Utc> = "2025-01-02T00:00:00Z".parse().unwrap();
    h.checkpoints.set(&pk, ahead, None).await;

    let msg = message(&price_doc("2025-01-01T10:00:00Z"));
    assert_eq!(h.worker.handle_message(&msg).await, Disposition::Delete);

    assert_eq!(h.state.apply_calls.load(Ordering::SeqCst), 0);
    assert!(h.state.row("001", "729000001").is_none());
    assert_eq!(h.checkpoints.get(&pk).await, Some(ahead));
}

#[tokio::test]
async fn test_duplicate_delivery_is_a_no_op() {
    let h = harness(ProcessPolicy::default());
    let msg = message(&price_doc("2025-01-01T10:00:00Z"));

    assert_eq!(h.worker.handle_message(&msg).await, Disposition::Delete);
    let first = h.state.row("001", "729000001").unwrap();

    assert_eq!(h.worker.handle_message(&msg).await, Disposition::Delete);
    assert_eq!(h.state.row("001", "729000001").unwrap(), first);
    assert_eq!(h.state.apply_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.state.ledger.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_poison_message_dead_lettered_once_then_deleted() {
    let h = harness(ProcessPolicy::default());
    let msg = message("this is not json");

    assert_eq!(h.worker.handle_message(&msg).await, Disposition::Delete);

    let records = h.dead_letters.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].0, "this is not json");
    assert!(records[0].1.contains("parse error"));
}

#[tokio::test]
async fn test_codeless_snapshot_is_validation_dead_letter() {
    let h = harness(ProcessPolicy::default());
    let msg = message(
        r#"{"provider": "keshet", "branch": "001", "type": "pricesFull",
            "timestamp": "2025-01-01T10:00:00Z", "items": []}"#,
    );

    assert_eq!(h.worker.handle_message(&msg).await, Disposition::Delete);
    assert_eq!(h.dead_letters.records.lock().unwrap().len(), 1);
    assert_eq!(h.state.apply_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_storage_failure_dead_letters_by_default() {
    let h = harness(ProcessPolicy::default());
    h.state.fail_next_applies(10);
    let msg = message(&price_doc("2025-01-01T10:00:00Z"));

    assert_eq!(h.worker.handle_message(&msg).await, Disposition::Delete);

    assert_eq!(h.dead_letters.records.lock().unwrap().len(), 1);
    assert!(h.state.row("001", "729000001").is_none());
    // checkpoint must not advance past an uncommitted snapshot
    let pk = PartitionKey {
        provider: "keshet".into(),
        branch: "001".into(),
        kind: shared::SnapshotKind::Prices,
    };
    assert_eq!(h.checkpoints.get(&pk).await, None);
}

#[tokio::test]
async fn test_storage_failure_requeues_when_configured() {
    let h = harness(ProcessPolicy {
        retry_budget: 0,
        requeue_on_storage_error: true,
    });
    h.state.fail_next_applies(10);
    let msg = message(&price_doc("2025-01-01T10:00:00Z"));

    assert_eq!(h.worker.handle_message(&msg).await, Disposition::Requeue);
    assert!(h.dead_letters.records.lock().unwrap().is_empty());
    assert!(h.queue.deleted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_retry_budget_recovers_transient_storage_failure() {
    let h = harness(ProcessPolicy {
        retry_budget: 2,
        requeue_on_storage_error: false,
    });
    h.state.fail_next_applies(1);
    let msg = message(&price_doc("2025-01-01T10:00:00Z"));

    assert_eq!(h.worker.handle_message(&msg).await, Disposition::Delete);

    assert!(h.dead_letters.records.lock().unwrap().is_empty());
    assert!(h.state.row("001", "729000001").is_some());
    assert_eq!(h.state.apply_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_pointer_message_resolves_bulk_object() {
    let h = harness(ProcessPolicy::default());
    h.blobs.put(
        "snapshots",
        "keshet/001/items.json",
        br#"[{"code": "729000001", "price": 6.9}]"#,
    );
    let msg = message(
        r#"{"provider": "keshet", "branch": "001", "type": "pricesFull",
            "timestamp": "2025-01-01T10:00:00Z",
            "s3": {"bucket": "snapshots", "key": "keshet/001/items.json"}}"#,
    );

    assert_eq!(h.worker.handle_message(&msg).await, Disposition::Delete);
    assert!(h.state.row("001", "729000001").is_some());

    // blob key recorded as the checkpoint source reference via src_key
    let ledger = h.state.ledger.lock().unwrap();
    assert_eq!(ledger[0].source_ref.as_deref(), Some("keshet/001/items.json"));
}

#[tokio::test]
async fn test_missing_bulk_object_leaves_message_on_queue() {
    let h = harness(ProcessPolicy::default());
    let msg = message(
        r#"{"provider": "keshet", "branch": "001", "type": "pricesFull",
            "timestamp": "2025-01-01T10:00:00Z",
            "s3": {"bucket": "snapshots", "key": "gone.json"}}"#,
    );

    assert_eq!(h.worker.handle_message(&msg).await, Disposition::Requeue);
    assert!(h.dead_letters.records.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_sweep_clears_expired_promo_and_keeps_price() {
    let h = harness(ProcessPolicy::default());
    let price = message(&price_doc("2025-01-01T10:00:00Z"));
    assert_eq!(h.worker.handle_message(&price).await, Disposition::Delete);

    let promo = message(
        r#"{"provider": "keshet", "branch": "001", "type": "promoFull",
            "timestamp": "2025-01-01T12:00:00Z",
            "items": [{"code": "729000001", "discounted_price": 5.5,
                       "end_at": "2025-02-01T00:00:00Z"}]}"#,
    );
    assert_eq!(h.worker.handle_message(&promo).await, Disposition::Delete);
    assert!(h.state.row("001", "729000001").unwrap().promo_price.is_some());

    let now: DateTime<Utc> = "2025-03-01T00:00:00Z".parse().unwrap();
    let cleared = h.state.expire_promos(now).await.unwrap();
    assert_eq!(cleared, 1);

    let milk = h.state.row("001", "729000001").unwrap();
    assert_eq!(milk.promo_price, None);
    assert_eq!(milk.promo_end, None);
    assert_eq!(milk.regular_price, Some(rust_decimal::Decimal::new(69, 1)));
    assert_eq!(
        milk.last_price_ts,
        Some("2025-01-01T10:00:00Z".parse().unwrap())
    );

    // running the sweep again finds nothing
    assert_eq!(h.state.expire_promos(now).await.unwrap(), 0);
}

#[tokio::test]
async fn test_promo_snapshot_applies_over_priced_items() {
    let h = harness(ProcessPolicy::default());
    let price = message(&price_doc("2025-01-01T10:00:00Z"));
    assert_eq!(h.worker.handle_message(&price).await, Disposition::Delete);

    let promo = message(
        r#"{"provider": "keshet", "branch": "001", "type": "promoFull",
            "timestamp": "2025-01-01T12:00:00Z",
            "items": [{"code": "729000001", "discounted_price": 5.5}]}"#,
    );
    assert_eq!(h.worker.handle_message(&promo).await, Disposition::Delete);

    let milk = h.state.row("001", "729000001").unwrap();
    assert_eq!(milk.promo_price, Some(rust_decimal::Decimal::new(55, 1)));
    // independent cursor per kind
    let prices_pk = PartitionKey {
        provider: "keshet".into(),
        branch: "001".into(),
        kind: shared::SnapshotKind::Prices,
    };
    let promos_pk = PartitionKey {
        kind: shared::SnapshotKind::Promos,
        ..prices_pk.clone()
    };
    assert!(h.checkpoints.get(&prices_pk).await < h.checkpoints.get(&promos_pk).await);
}
