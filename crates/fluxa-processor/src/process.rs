//! Per-message processing algorithm (§4.4 "Per-message algorithm").

use chrono::Utc;
use fluxa_ledger::{ClaimOutcome, Ledger};
use fluxa_storage::{
    BlobError, BlobStore, NotificationBus, PayloadMode, PersistedEvent, QueueMessage,
    ReceivedMessage, RelationalStore,
};
use fluxa_types::Event;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

/// The disposition the transport must apply to a delivered message (§4.4
/// "Batch contract").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Success, or an idempotent skip; delete the message.
    Ack,
    /// Retriable fault; let the transport redeliver.
    NackRetry {
        /// Machine-readable reason, matching [`fluxa_ledger::FluxaError::reason_code`].
        reason_code: &'static str,
    },
    /// Unrecoverable; acknowledge (to stop retry storms) after marking the
    /// ledger `failed`.
    AckPoisoned {
        /// Machine-readable reason recorded in the ledger.
        reason_code: &'static str,
    },
}

/// Run the full per-message algorithm against one delivered message.
///
/// This function never panics on malformed input; every failure mode in
/// §4.4 maps to a [`MessageOutcome`] variant instead.
pub async fn process_message(
    received: &ReceivedMessage,
    ledger: &dyn Ledger,
    blob_store: &dyn BlobStore,
    relational: &dyn RelationalStore,
    notifier: &dyn NotificationBus,
) -> MessageOutcome {
    // Step 1: parse the envelope. No ledger entry exists yet, so there is
    // nothing to mark poisoned; we can only refuse and let the transport
    // delete it.
    let message: QueueMessage = match serde_json::from_slice(&received.body) {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, reason_code = "parse_error", "message body is not a valid queue envelope");
            return MessageOutcome::AckPoisoned {
                reason_code: "parse_error",
            };
        }
    };

    let event_id = &message.event_id;
    let correlation_id = &message.correlation_id;

    // Step 2: claim.
    match ledger.claim(event_id).await {
        Ok(ClaimOutcome::AlreadyDone) => {
            info!(event_id = %event_id, correlation_id = %correlation_id, "idempotent skip: already processed");
            return MessageOutcome::Ack;
        }
        Ok(ClaimOutcome::Fresh) | Ok(ClaimOutcome::Retry) => {}
        Err(e) => {
            warn!(event_id = %event_id, correlation_id = %correlation_id, error = %e, "ledger claim failed transiently");
            return MessageOutcome::NackRetry {
                reason_code: e.reason_code(),
            };
        }
    }

    // Step 3: materialize payload bytes. An unrecognized disposition is
    // distinct from a malformed envelope: the envelope parsed fine, so a
    // ledger claim already exists, and the failure is poisoned rather than
    // silently dropped.
    let disposition = match PayloadMode::parse(&message.payload_mode) {
        Some(mode) => mode,
        None => {
            return poison(
                ledger,
                event_id,
                "invalid_payload_mode",
                &format!("unrecognized payload_mode: {}", message.payload_mode),
            )
            .await;
        }
    };
    let bytes = match disposition {
        PayloadMode::Inline => match &message.payload_inline {
            Some(inline) => inline.clone().into_bytes(),
            None => {
                return poison(ledger, event_id, "unmarshal_error", "missing inline payload").await;
            }
        },
        PayloadMode::S3 => {
            let Some(key) = &message.s3_key else {
                return poison(ledger, event_id, "missing_s3_key", "s3 disposition without s3_key")
                    .await;
            };
            match blob_store.get(key).await {
                Ok(bytes) => bytes,
                Err(BlobError::NotFound(_)) => {
                    return poison(ledger, event_id, "missing_s3_key", &format!("no object at {key}"))
                        .await;
                }
                Err(BlobError::Transient(msg)) => {
                    warn!(event_id = %event_id, correlation_id = %correlation_id, error = %msg, "blob fetch failed transiently");
                    return MessageOutcome::NackRetry {
                        reason_code: "blob_fetch_failed",
                    };
                }
            }
        }
    };

    // Step 4: verify digest.
    let actual_digest = format!("{:x}", Sha256::digest(&bytes));
    if actual_digest != message.payload_sha256 {
        return poison(
            ledger,
            event_id,
            "hash_mismatch",
            "payload digest does not match queue message",
        )
        .await;
    }

    // Step 5: deserialize and re-validate.
    let event: Event = match serde_json::from_slice(&bytes) {
        Ok(event) => event,
        Err(e) => return poison(ledger, event_id, "unmarshal_error", &e.to_string()).await,
    };
    if let Err(errors) = event.validate(Utc::now()) {
        let joined = errors
            .into_iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        return poison(ledger, event_id, "validation_error", &joined).await;
    }

    // Step 6: persist, binding event_id to the message's authoritative id.
    let persisted = PersistedEvent {
        event_id: event_id.clone(),
        correlation_id: correlation_id.clone(),
        user_id: event.user_id,
        amount: event.amount,
        currency: event.currency,
        merchant: event.merchant,
        timestamp: event.timestamp,
        metadata: event.metadata,
        payload_mode: disposition,
        s3_key: message.s3_key.clone(),
        created_at: Utc::now(),
    };
    if let Err(e) = relational.insert_event(persisted).await {
        warn!(event_id = %event_id, correlation_id = %correlation_id, error = %e, "event persistence failed transiently");
        return MessageOutcome::NackRetry {
            reason_code: "db_insert_failed",
        };
    }

    // Step 7: commit success. Non-fatal if it fails; a later redelivery
    // will re-enter at claim and retry the commit.
    if let Err(e) = ledger.commit_success(event_id).await {
        warn!(event_id = %event_id, correlation_id = %correlation_id, error = %e, "commit_success failed; will be retried on redelivery");
    }

    // Step 8: best-effort notification.
    if let Err(e) = notifier.notify_processed(event_id, correlation_id).await {
        warn!(event_id = %event_id, correlation_id = %correlation_id, error = %e, "notification emission failed (non-fatal)");
    }

    info!(event_id = %event_id, correlation_id = %correlation_id, "event processed");
    MessageOutcome::Ack
}

async fn poison(
    ledger: &dyn Ledger,
    event_id: &fluxa_types::EventId,
    reason_code: &'static str,
    detail: &str,
) -> MessageOutcome {
    if let Err(e) = ledger.commit_failed(event_id, detail).await {
        error!(event_id = %event_id, error = %e, "commit_failed itself failed; acknowledging anyway");
    }
    error!(event_id = %event_id, reason_code, detail, "event poisoned");
    MessageOutcome::AckPoisoned { reason_code }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use fluxa_storage::{MemoryBlobStore, MemoryNotificationBus, MemoryStore};
    use fluxa_types::{CorrelationId, EventId};
    use serde_json::json;

    fn message_for(event: &Event) -> QueueMessage {
        let bytes = serde_json::to_vec(event).unwrap();
        let digest = format!("{:x}", Sha256::digest(&bytes));
        QueueMessage {
            event_id: event.event_id.clone().unwrap(),
            correlation_id: CorrelationId("corr-1".to_string()),
            payload_mode: PayloadMode::Inline.as_wire_str().to_string(),
            payload_sha256: digest,
            payload_inline: Some(String::from_utf8(bytes).unwrap()),
            s3_bucket: None,
            s3_key: None,
            received_at: Utc::now(),
        }
    }

    fn sample_event() -> Event {
        serde_json::from_value(json!({
            "event_id": "evt-1",
            "user_id": "user-1",
            "amount": "10.00",
            "currency": "USD",
            "merchant": "acme",
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .unwrap()
    }

    fn received(message: &QueueMessage) -> ReceivedMessage {
        ReceivedMessage {
            body: serde_json::to_vec(message).unwrap(),
            receipt_handle: "h-1".to_string(),
            receive_count: 1,
        }
    }

    #[tokio::test]
    async fn happy_path_persists_and_acks() {
        let ledger = MemoryStore::default();
        let blobs = MemoryBlobStore::new();
        let notifier = MemoryNotificationBus::default();
        let event = sample_event();
        let message = message_for(&event);

        let outcome =
            process_message(&received(&message), &ledger, &blobs, &ledger, &notifier).await;

        assert_eq!(outcome, MessageOutcome::Ack);
        let stored = ledger
            .get_event(&EventId("evt-1".to_string()))
            .await
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn already_processed_is_idempotent_ack_without_reinsert() {
        let ledger = MemoryStore::default();
        let blobs = MemoryBlobStore::new();
        let notifier = MemoryNotificationBus::default();
        let event = sample_event();
        let message = message_for(&event);

        process_message(&received(&message), &ledger, &blobs, &ledger, &notifier).await;
        let outcome =
            process_message(&received(&message), &ledger, &blobs, &ledger, &notifier).await;

        assert_eq!(outcome, MessageOutcome::Ack);
        assert_eq!(ledger.event_count().await, 1);
    }

    #[tokio::test]
    async fn hash_mismatch_is_poisoned() {
        let ledger = MemoryStore::default();
        let blobs = MemoryBlobStore::new();
        let notifier = MemoryNotificationBus::default();
        let event = sample_event();
        let mut message = message_for(&event);
        message.payload_sha256 = "0".repeat(64);

        let outcome =
            process_message(&received(&message), &ledger, &blobs, &ledger, &notifier).await;

        assert_eq!(
            outcome,
            MessageOutcome::AckPoisoned {
                reason_code: "hash_mismatch"
            }
        );
        let entry = ledger
            .status(&EventId("evt-1".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, fluxa_ledger::LedgerStatus::Failed);
    }

    #[tokio::test]
    async fn missing_blob_object_is_poisoned() {
        let ledger = MemoryStore::default();
        let blobs = MemoryBlobStore::new();
        let notifier = MemoryNotificationBus::default();
        let event = sample_event();
        let mut message = message_for(&event);
        message.payload_mode = PayloadMode::S3.as_wire_str().to_string();
        message.payload_inline = None;
        message.s3_key = Some("raw/2026-07-28/evt-1.json".to_string());

        let outcome =
            process_message(&received(&message), &ledger, &blobs, &ledger, &notifier).await;

        assert_eq!(
            outcome,
            MessageOutcome::AckPoisoned {
                reason_code: "missing_s3_key"
            }
        );
    }

    #[tokio::test]
    async fn unrecognized_payload_mode_is_poisoned_with_ledger_entry() {
        let ledger = MemoryStore::default();
        let blobs = MemoryBlobStore::new();
        let notifier = MemoryNotificationBus::default();
        let event = sample_event();
        let mut message = message_for(&event);
        message.payload_mode = "FTP".to_string();

        let outcome =
            process_message(&received(&message), &ledger, &blobs, &ledger, &notifier).await;

        assert_eq!(
            outcome,
            MessageOutcome::AckPoisoned {
                reason_code: "invalid_payload_mode"
            }
        );
        // Unlike an unparseable envelope, the envelope itself was valid, so
        // a claim landed in the ledger before the disposition was rejected.
        let entry = ledger
            .status(&EventId("evt-1".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, fluxa_ledger::LedgerStatus::Failed);
    }

    #[tokio::test]
    async fn unparseable_envelope_is_poisoned_without_ledger_entry() {
        let ledger = MemoryStore::default();
        let blobs = MemoryBlobStore::new();
        let notifier = MemoryNotificationBus::default();

        let garbage = ReceivedMessage {
            body: b"not json".to_vec(),
            receipt_handle: "h-1".to_string(),
            receive_count: 1,
        };

        let outcome = process_message(&garbage, &ledger, &blobs, &ledger, &notifier).await;

        assert_eq!(
            outcome,
            MessageOutcome::AckPoisoned {
                reason_code: "parse_error"
            }
        );
        assert_eq!(ledger.event_count().await, 0);
    }

    #[tokio::test]
    async fn stale_processing_claim_allows_retry_and_eventual_success() {
        let ledger = MemoryStore::new(Duration::milliseconds(5));
        let blobs = MemoryBlobStore::new();
        let notifier = MemoryNotificationBus::default();
        let event = sample_event();
        let message = message_for(&event);

        ledger.claim(&EventId("evt-1".to_string())).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let outcome =
            process_message(&received(&message), &ledger, &blobs, &ledger, &notifier).await;

        assert_eq!(outcome, MessageOutcome::Ack);
    }
}
