//! In-memory reference implementations of every trait in [`crate::traits`],
//! plus an in-memory [`fluxa_ledger::Ledger`].
//!
//! These exist for tests and local development (§10.1, §10.5)
//! and double as the fakes integration tests in `fluxa-ingest` /
//! `fluxa-processor` run against. The pattern — `Arc<Mutex<HashMap<...>>>`
//! behind a small async-trait impl, with a `Default` and a handful of
//! inspection helpers — mirrors `toka-store-memory`'s `MemoryBackend` and
//! `toka-bus-core`'s `InMemoryBus`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fluxa_ledger::{
    ClaimOutcome, FluxaError, Ledger, LedgerEntry, LedgerStatus, DEFAULT_LIVENESS_WINDOW_SECS,
};
use fluxa_types::EventId;
use tokio::sync::{broadcast, Mutex};

use crate::traits::{
    BlobError, BlobStore, NotificationBus, NotificationError, PersistedEvent, QueueError,
    QueueMessage, QueueTransport, ReceivedMessage, RelationalStore,
};

//─────────────────────────────
//  Relational store + ledger
//─────────────────────────────

/// In-memory relational store and idempotency ledger.
///
/// Both tables live behind a single `Mutex` so that `claim`'s row-lock +
/// insert-or-update sequence (§4.2) is trivially serializable, matching the
/// "single serializable transaction" contract without needing a real
/// database in tests.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    liveness_window: Duration,
}

struct Inner {
    events: HashMap<EventId, PersistedEvent>,
    ledger: HashMap<EventId, LedgerEntry>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_LIVENESS_WINDOW_SECS))
    }
}

impl MemoryStore {
    /// Create an empty store with the given liveness window (§4.2 step 4).
    pub fn new(liveness_window: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                events: HashMap::new(),
                ledger: HashMap::new(),
            })),
            liveness_window,
        }
    }

    /// Number of persisted event rows. Test/inspection helper.
    pub async fn event_count(&self) -> usize {
        self.inner.lock().await.events.len()
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    async fn insert_event(&self, event: PersistedEvent) -> Result<bool, FluxaError> {
        let mut inner = self.inner.lock().await;
        if inner.events.contains_key(&event.event_id) {
            return Ok(false);
        }
        inner.events.insert(event.event_id.clone(), event);
        Ok(true)
    }

    async fn get_event(&self, event_id: &EventId) -> Result<Option<PersistedEvent>, FluxaError> {
        Ok(self.inner.lock().await.events.get(event_id).cloned())
    }
}

#[async_trait]
impl Ledger for MemoryStore {
    async fn claim(&self, event_id: &EventId) -> Result<ClaimOutcome, FluxaError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();

        match inner.ledger.get(event_id).cloned() {
            None => {
                inner.ledger.insert(
                    event_id.clone(),
                    LedgerEntry {
                        event_id: event_id.clone(),
                        status: LedgerStatus::Processing,
                        first_seen_at: now,
                        last_seen_at: now,
                        attempts: 1,
                        error_reason: None,
                    },
                );
                Ok(ClaimOutcome::Fresh)
            }
            Some(entry) if entry.status == LedgerStatus::Success => Ok(ClaimOutcome::AlreadyDone),
            Some(entry)
                if entry.status == LedgerStatus::Processing
                    && now - entry.last_seen_at < self.liveness_window =>
            {
                Ok(ClaimOutcome::AlreadyDone)
            }
            Some(mut entry) => {
                entry.status = LedgerStatus::Processing;
                entry.last_seen_at = now;
                entry.attempts += 1;
                inner.ledger.insert(event_id.clone(), entry);
                Ok(ClaimOutcome::Retry)
            }
        }
    }

    async fn commit_success(&self, event_id: &EventId) -> Result<(), FluxaError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let entry = inner
            .ledger
            .entry(event_id.clone())
            .or_insert_with(|| fresh_entry(event_id, now));
        entry.status = LedgerStatus::Success;
        entry.last_seen_at = now;
        Ok(())
    }

    async fn commit_failed(&self, event_id: &EventId, reason: &str) -> Result<(), FluxaError> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let entry = inner
            .ledger
            .entry(event_id.clone())
            .or_insert_with(|| fresh_entry(event_id, now));
        entry.status = LedgerStatus::Failed;
        entry.last_seen_at = now;
        entry.error_reason = Some(fluxa_ledger::truncate_reason(reason));
        Ok(())
    }

    async fn status(&self, event_id: &EventId) -> Result<Option<LedgerEntry>, FluxaError> {
        Ok(self.inner.lock().await.ledger.get(event_id).cloned())
    }
}

fn fresh_entry(event_id: &EventId, now: DateTime<Utc>) -> LedgerEntry {
    LedgerEntry {
        event_id: event_id.clone(),
        status: LedgerStatus::Processing,
        first_seen_at: now,
        last_seen_at: now,
        attempts: 1,
        error_reason: None,
    }
}

//─────────────────────────────
//  Blob store
//─────────────────────────────

/// In-memory blob store.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    /// Create an empty blob store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        self.objects.lock().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.objects
            .lock()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_string()))
    }
}

//─────────────────────────────
//  Queue transport
//─────────────────────────────

/// In-memory, at-least-once queue with a configurable max-receive-count
/// before dead-lettering (transport-owned per §9).
#[derive(Clone)]
pub struct MemoryQueue {
    inner: Arc<Mutex<QueueInner>>,
    max_receives: u32,
}

struct QueueInner {
    in_flight: HashMap<String, (Vec<u8>, u32)>,
    ready: Vec<String>,
    next_handle: u64,
    dead_letter: Vec<Vec<u8>>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(3)
    }
}

impl MemoryQueue {
    /// Create an empty queue with the given max-receive-count.
    pub fn new(max_receives: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                in_flight: HashMap::new(),
                ready: Vec::new(),
                next_handle: 0,
                dead_letter: Vec::new(),
            })),
            max_receives,
        }
    }

    /// Messages that exceeded `max_receives` without being acked.
    pub async fn dead_letters(&self) -> Vec<Vec<u8>> {
        self.inner.lock().await.dead_letter.clone()
    }

    /// Number of messages awaiting delivery or in flight.
    pub async fn len(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.ready.len() + inner.in_flight.len()
    }

    /// `true` if no messages are ready, in flight, or dead-lettered.
    pub async fn is_empty(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.ready.is_empty() && inner.in_flight.is_empty()
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn send(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let bytes = serde_json::to_vec(message)
            .map_err(|e| QueueError::Transient(format!("encode failure: {e}")))?;
        let mut inner = self.inner.lock().await;
        let handle = format!("h-{}", inner.next_handle);
        inner.next_handle += 1;
        inner.in_flight.insert(handle.clone(), (bytes, 0));
        inner.ready.push(handle);
        Ok(())
    }

    async fn receive_batch(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut inner = self.inner.lock().await;
        let mut out = Vec::new();
        while out.len() < max_messages {
            let Some(handle) = inner.ready.pop() else {
                break;
            };
            let Some((bytes, receive_count)) = inner.in_flight.get_mut(&handle) else {
                continue;
            };
            *receive_count += 1;
            out.push(ReceivedMessage {
                body: bytes.clone(),
                receipt_handle: handle,
                receive_count: *receive_count,
            });
        }
        Ok(out)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.inner.lock().await.in_flight.remove(receipt_handle);
        Ok(())
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let Some((bytes, receive_count)) = inner.in_flight.get(receipt_handle).cloned() else {
            return Ok(());
        };
        if receive_count >= self.max_receives {
            inner.in_flight.remove(receipt_handle);
            inner.dead_letter.push(bytes);
        } else {
            inner.ready.push(receipt_handle.to_string());
        }
        Ok(())
    }
}

//─────────────────────────────
//  Notification bus
//─────────────────────────────

/// In-memory notification bus backed by a broadcast channel, mirroring
/// `toka-bus-core`'s `InMemoryBus`.
#[derive(Clone)]
pub struct MemoryNotificationBus {
    tx: Arc<broadcast::Sender<ProcessedNotification>>,
}

/// A `{event_id, status: processed}` notification (§4.4 step 8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedNotification {
    /// The event that finished processing.
    pub event_id: EventId,
    /// The correlation id attached as a transport attribute.
    pub correlation_id: fluxa_types::CorrelationId,
}

impl Default for MemoryNotificationBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl MemoryNotificationBus {
    /// Create a new bus with the given broadcast ring-buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to the live notification stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessedNotification> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationBus for MemoryNotificationBus {
    async fn notify_processed(
        &self,
        event_id: &EventId,
        correlation_id: &fluxa_types::CorrelationId,
    ) -> Result<(), NotificationError> {
        let _ = self.tx.send(ProcessedNotification {
            event_id: event_id.clone(),
            correlation_id: correlation_id.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_id() -> EventId {
        EventId("evt-1".to_string())
    }

    #[tokio::test]
    async fn fresh_claim_then_already_done() {
        let store = MemoryStore::default();
        assert_eq!(store.claim(&event_id()).await.unwrap(), ClaimOutcome::Fresh);
        assert_eq!(
            store.claim(&event_id()).await.unwrap(),
            ClaimOutcome::AlreadyDone
        );
    }

    #[tokio::test]
    async fn stale_processing_allows_retry() {
        let store = MemoryStore::new(Duration::milliseconds(5));
        assert_eq!(store.claim(&event_id()).await.unwrap(), ClaimOutcome::Fresh);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(store.claim(&event_id()).await.unwrap(), ClaimOutcome::Retry);
        let entry = store.status(&event_id()).await.unwrap().unwrap();
        assert_eq!(entry.attempts, 2);
    }

    #[tokio::test]
    async fn success_is_terminal() {
        let store = MemoryStore::default();
        store.claim(&event_id()).await.unwrap();
        store.commit_success(&event_id()).await.unwrap();
        assert_eq!(
            store.claim(&event_id()).await.unwrap(),
            ClaimOutcome::AlreadyDone
        );
    }

    #[tokio::test]
    async fn failed_allows_retry_claim() {
        let store = MemoryStore::default();
        store.claim(&event_id()).await.unwrap();
        store.commit_failed(&event_id(), "hash_mismatch").await.unwrap();
        assert_eq!(store.claim(&event_id()).await.unwrap(), ClaimOutcome::Retry);
    }

    #[tokio::test]
    async fn event_insert_is_unique_key_idempotent() {
        let store = MemoryStore::default();
        let event = sample_event();
        assert!(store.insert_event(event.clone()).await.unwrap());
        assert!(!store.insert_event(event).await.unwrap());
        assert_eq!(store.event_count().await, 1);
    }

    fn sample_event() -> PersistedEvent {
        PersistedEvent {
            event_id: event_id(),
            correlation_id: fluxa_types::CorrelationId("corr-1".to_string()),
            user_id: "u1".to_string(),
            amount: rust_decimal::Decimal::new(1000, 2),
            currency: "USD".to_string(),
            merchant: "m1".to_string(),
            timestamp: Utc::now(),
            metadata: None,
            payload_mode: crate::traits::PayloadMode::Inline,
            s3_key: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn queue_dead_letters_after_max_receives() {
        let queue = MemoryQueue::new(2);
        let msg = sample_message();
        queue.send(&msg).await.unwrap();

        let received = queue.receive_batch(1).await.unwrap();
        assert_eq!(received.len(), 1);
        queue.nack(&received[0].receipt_handle).await.unwrap();

        let received = queue.receive_batch(1).await.unwrap();
        queue.nack(&received[0].receipt_handle).await.unwrap();

        assert_eq!(queue.dead_letters().await.len(), 1);
        assert!(queue.is_empty().await);
    }

    fn sample_message() -> QueueMessage {
        QueueMessage {
            event_id: event_id(),
            correlation_id: fluxa_types::CorrelationId("corr-1".to_string()),
            payload_mode: crate::traits::PayloadMode::Inline.as_wire_str().to_string(),
            payload_sha256: "deadbeef".to_string(),
            payload_inline: Some("{}".to_string()),
            s3_bucket: None,
            s3_key: None,
            received_at: Utc::now(),
        }
    }
}
