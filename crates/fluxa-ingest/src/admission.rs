//! Ingest Admission (§4.3): accepts a single raw event body and admits it
//! for asynchronous processing.

use chrono::Utc;
use fluxa_ledger::FluxaError;
use fluxa_storage::{BlobStore, PayloadMode, QueueMessage, QueueTransport};
use fluxa_types::{CorrelationId, Event, EventId};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::router::{self, RoutedPayload};

/// The response returned to the HTTP layer on a successful submission
/// (§6 `POST /events`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResponse {
    /// The assigned (or caller-supplied) event identifier.
    pub event_id: EventId,
    /// The assigned (or caller-supplied) correlation identifier.
    pub correlation_id: CorrelationId,
}

/// Parse, validate, route, and enqueue `raw_body` (§4.3 steps 1-8).
///
/// Malformed JSON and validation failures fail fast with no enqueue
/// (`FluxaError::MalformedRequest` / `FluxaError::ValidationFailure`).
/// Blob-write or queue-send failures surface as retriable
/// (`FluxaError::BlobWriteFailure` / `FluxaError::QueueSendFailure`); the
/// caller may retry with the same `event_id` and rely on the ledger to
/// deduplicate downstream.
pub async fn submit(
    raw_body: &[u8],
    caller_correlation_id: Option<CorrelationId>,
    blob_store: &dyn BlobStore,
    queue: &dyn QueueTransport,
) -> Result<SubmitResponse, FluxaError> {
    submit_with_threshold(
        raw_body,
        caller_correlation_id,
        blob_store,
        queue,
        router::MAX_INLINE_BYTES,
    )
    .await
}

/// Like [`submit`], but with the router's inline/offload threshold taken
/// from `max_inline_bytes` instead of [`router::MAX_INLINE_BYTES`] (§9:
/// `MAX_INLINE_BYTES` must be configurable).
pub async fn submit_with_threshold(
    raw_body: &[u8],
    caller_correlation_id: Option<CorrelationId>,
    blob_store: &dyn BlobStore,
    queue: &dyn QueueTransport,
    max_inline_bytes: usize,
) -> Result<SubmitResponse, FluxaError> {
    let mut event: Event = serde_json::from_slice(raw_body)
        .map_err(|e| FluxaError::MalformedRequest(e.to_string()))?;

    let event_id = event
        .event_id
        .clone()
        .unwrap_or_else(EventId::generate);
    let correlation_id = caller_correlation_id.unwrap_or_else(CorrelationId::generate);
    event.event_id = Some(event_id.clone());

    event.validate(Utc::now()).map_err(|errors| {
        let joined = errors
            .into_iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        FluxaError::ValidationFailure(joined)
    })?;

    let canonical_bytes = serde_json::to_vec(&event)
        .map_err(|e| FluxaError::MalformedRequest(format!("canonicalize failed: {e}")))?;
    let digest = format!("{:x}", Sha256::digest(&canonical_bytes));

    let routed = router::route_with_threshold(
        blob_store,
        canonical_bytes.clone(),
        event_id.0.as_str(),
        max_inline_bytes,
    )
    .await?;

    let message = match routed {
        RoutedPayload::Inline(bytes) => QueueMessage {
            event_id: event_id.clone(),
            correlation_id: correlation_id.clone(),
            payload_mode: PayloadMode::Inline.as_wire_str().to_string(),
            payload_sha256: digest,
            payload_inline: Some(String::from_utf8_lossy(&bytes).into_owned()),
            s3_bucket: None,
            s3_key: None,
            received_at: Utc::now(),
        },
        RoutedPayload::Offloaded { key } => QueueMessage {
            event_id: event_id.clone(),
            correlation_id: correlation_id.clone(),
            payload_mode: PayloadMode::S3.as_wire_str().to_string(),
            payload_sha256: digest,
            payload_inline: None,
            s3_bucket: None,
            s3_key: Some(key),
            received_at: Utc::now(),
        },
    };

    queue
        .send(&message)
        .await
        .map_err(|e| FluxaError::QueueSendFailure(e.to_string()))?;

    info!(
        event_id = %event_id,
        correlation_id = %correlation_id,
        payload_mode = ?message.payload_mode,
        "event admitted"
    );

    Ok(SubmitResponse {
        event_id,
        correlation_id,
    })
}

/// Convenience wrapper that logs a warning before returning a submit error,
/// so callers get one structured log line per rejected request regardless
/// of which layer (parse, validate, infra) rejected it.
pub async fn submit_logged(
    raw_body: &[u8],
    caller_correlation_id: Option<CorrelationId>,
    blob_store: &dyn BlobStore,
    queue: &dyn QueueTransport,
    max_inline_bytes: usize,
) -> Result<SubmitResponse, FluxaError> {
    match submit_with_threshold(
        raw_body,
        caller_correlation_id,
        blob_store,
        queue,
        max_inline_bytes,
    )
    .await
    {
        Ok(response) => Ok(response),
        Err(err) => {
            warn!(error = %err, reason_code = err.reason_code(), "event rejected at ingest");
            Err(err)
        }
    }
}
