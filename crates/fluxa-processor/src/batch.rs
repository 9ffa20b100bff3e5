//! Batch loop (§4.4 "Batch contract", "Concurrency across messages").
//!
//! The transport hands the processor a non-empty ordered batch; messages
//! within one batch are handled sequentially by one worker, matching
//! §5's "within a single handler invocation the logic is sequential"
//! scheduling model. Parallelism across batches comes from running
//! multiple workers, each calling [`run_batch`] in its own task.

use fluxa_ledger::Ledger;
use fluxa_storage::{BlobStore, NotificationBus, QueueTransport, RelationalStore};
use tracing::warn;

use crate::process::{process_message, MessageOutcome};

/// Tally of outcomes for one call to [`run_batch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Messages deleted from the transport (success or idempotent skip).
    pub acked: usize,
    /// Messages left for redelivery.
    pub nacked: usize,
    /// Messages acknowledged after being marked poisoned.
    pub poisoned: usize,
}

impl BatchSummary {
    /// Total messages this batch handled.
    pub fn total(&self) -> usize {
        self.acked + self.nacked + self.poisoned
    }
}

/// Receive up to `max_messages` from `queue` and run the per-message
/// algorithm against each, sequentially, acking or nacking as it goes.
pub async fn run_batch(
    queue: &dyn QueueTransport,
    max_messages: usize,
    ledger: &dyn Ledger,
    blob_store: &dyn BlobStore,
    relational: &dyn RelationalStore,
    notifier: &dyn NotificationBus,
) -> BatchSummary {
    let messages = match queue.receive_batch(max_messages).await {
        Ok(messages) => messages,
        Err(e) => {
            warn!(error = %e, "batch receive failed; will retry on next poll");
            return BatchSummary::default();
        }
    };

    let mut summary = BatchSummary::default();

    for message in &messages {
        let outcome =
            process_message(message, ledger, blob_store, relational, notifier).await;

        match outcome {
            MessageOutcome::Ack => {
                summary.acked += 1;
                if let Err(e) = queue.ack(&message.receipt_handle).await {
                    warn!(error = %e, "ack failed; message may be redelivered");
                }
            }
            MessageOutcome::NackRetry { reason_code } => {
                summary.nacked += 1;
                warn!(reason_code, receive_count = message.receive_count, "nacking for retry");
                if let Err(e) = queue.nack(&message.receipt_handle).await {
                    warn!(error = %e, "nack failed");
                }
            }
            MessageOutcome::AckPoisoned { reason_code } => {
                summary.poisoned += 1;
                warn!(reason_code, "acking poisoned message");
                if let Err(e) = queue.ack(&message.receipt_handle).await {
                    warn!(error = %e, "ack (poisoned) failed; message may be redelivered");
                }
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fluxa_storage::{
        MemoryBlobStore, MemoryNotificationBus, MemoryQueue, MemoryStore, PayloadMode,
        QueueMessage,
    };
    use fluxa_types::{CorrelationId, Event, EventId};
    use sha2::{Digest, Sha256};

    fn sample_message(event_id: &str) -> QueueMessage {
        let event: Event = serde_json::from_value(serde_json::json!({
            "event_id": event_id,
            "user_id": "user-1",
            "amount": "10.00",
            "currency": "USD",
            "merchant": "acme",
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .unwrap();
        let bytes = serde_json::to_vec(&event).unwrap();
        let digest = format!("{:x}", Sha256::digest(&bytes));
        QueueMessage {
            event_id: EventId(event_id.to_string()),
            correlation_id: CorrelationId("corr-1".to_string()),
            payload_mode: PayloadMode::Inline.as_wire_str().to_string(),
            payload_sha256: digest,
            payload_inline: Some(String::from_utf8(bytes).unwrap()),
            s3_bucket: None,
            s3_key: None,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn processes_a_full_batch_and_acks_each() {
        let queue = MemoryQueue::default();
        let store = MemoryStore::default();
        let blobs = MemoryBlobStore::new();
        let notifier = MemoryNotificationBus::default();

        queue.send(&sample_message("evt-1")).await.unwrap();
        queue.send(&sample_message("evt-2")).await.unwrap();

        let summary = run_batch(&queue, 10, &store, &blobs, &store, &notifier).await;

        assert_eq!(summary.acked, 2);
        assert_eq!(summary.total(), 2);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn empty_queue_yields_empty_summary() {
        let queue = MemoryQueue::default();
        let store = MemoryStore::default();
        let blobs = MemoryBlobStore::new();
        let notifier = MemoryNotificationBus::default();

        let summary = run_batch(&queue, 10, &store, &blobs, &store, &notifier).await;

        assert_eq!(summary, BatchSummary::default());
    }

    #[tokio::test]
    async fn poisoned_message_is_acked_not_redelivered() {
        let queue = MemoryQueue::default();
        let store = MemoryStore::default();
        let blobs = MemoryBlobStore::new();
        let notifier = MemoryNotificationBus::default();

        let mut message = sample_message("evt-3");
        message.payload_sha256 = "0".repeat(64);
        queue.send(&message).await.unwrap();

        let summary = run_batch(&queue, 10, &store, &blobs, &store, &notifier).await;

        assert_eq!(summary.poisoned, 1);
        assert!(queue.is_empty().await);
    }
}
