//! The closed Fluxa error taxonomy (§7) shared by ingest and the processor.
//!
//! Every failure the core can produce maps to exactly one variant here. The
//! taxonomy is deliberately a flat, inspectable sum type rather than a
//! `Box<dyn Error>` trail: the ingest handler and the processor's batch loop
//! are the *only* places that interpret it via [`FluxaError::retriable`] /
//! [`FluxaError::is_poison`] (see the Design Notes' "data, not control flow"
//! rule in §9). Individual steps just construct and return the
//! variant that describes what happened.

use thiserror::Error;

/// The closed set of failures the Fluxa core can produce.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FluxaError {
    /// The ingest request body was not valid JSON.
    #[error("malformed request body: {0}")]
    MalformedRequest(String),

    /// An [`fluxa_types::Event`] failed §3 validation, at ingest or at
    /// processor re-validation time.
    #[error("validation failed: {0}")]
    ValidationFailure(String),

    /// Informational only: the router decided a payload must be offloaded.
    /// Never actually surfaced as an error to a caller; kept in the
    /// taxonomy because §7 enumerates it as a named origin.
    #[error("payload too large for inline wire transport")]
    PayloadTooLargeForWire,

    /// The blob store could not be written to.
    #[error("blob write failed: {0}")]
    BlobWriteFailure(String),

    /// The blob store could not be read from (transient; the coordinate is
    /// believed to exist). See [`FluxaError::MissingPayload`] for the
    /// not-found case.
    #[error("blob fetch failed: {0}")]
    BlobFetchFailure(String),

    /// The queue transport rejected or failed to deliver the message.
    #[error("queue send failed: {0}")]
    QueueSendFailure(String),

    /// A ledger transaction failed for a transient reason (deadlock,
    /// connection loss, timeout).
    #[error("ledger transaction failed: {0}")]
    LedgerTransient(String),

    /// The event insert into the relational store failed for a transient
    /// reason.
    #[error("event persistence failed: {0}")]
    PersistTransient(String),

    /// The fetched payload's SHA-256 digest did not match the digest
    /// recorded on the queue message.
    #[error("payload digest mismatch")]
    HashMismatch,

    /// The fetched payload bytes could not be deserialized into an
    /// [`fluxa_types::Event`].
    #[error("failed to deserialize event payload: {0}")]
    UnmarshalError(String),

    /// The queue message named a disposition other than `INLINE` or `S3`.
    #[error("unknown payload disposition: {0}")]
    InvalidPayloadMode(String),

    /// The message claimed an offloaded payload but carried no blob
    /// coordinate, or the blob store reports the coordinate does not
    /// exist.
    #[error("payload missing: {0}")]
    MissingPayload(String),

    /// The read path found no row for the requested event id.
    #[error("event not found")]
    NotFound,
}

impl FluxaError {
    /// `true` if the same input will plausibly succeed on a later attempt
    /// (network blip, transient DB lock, momentary blob unavailability).
    ///
    /// Mirrors §7's disposition table. Mutually exclusive with
    /// [`Self::is_poison`].
    pub fn retriable(&self) -> bool {
        matches!(
            self,
            FluxaError::BlobWriteFailure(_)
                | FluxaError::BlobFetchFailure(_)
                | FluxaError::QueueSendFailure(_)
                | FluxaError::LedgerTransient(_)
                | FluxaError::PersistTransient(_)
        )
    }

    /// `true` if the same input will fail identically forever and should
    /// never be retried (malformed JSON, hash mismatch, validation
    /// failure, unknown disposition, missing payload coordinate).
    pub fn is_poison(&self) -> bool {
        matches!(
            self,
            FluxaError::MalformedRequest(_)
                | FluxaError::ValidationFailure(_)
                | FluxaError::HashMismatch
                | FluxaError::UnmarshalError(_)
                | FluxaError::InvalidPayloadMode(_)
                | FluxaError::MissingPayload(_)
        )
    }

    /// A short, stable machine-readable reason string, suitable for
    /// `idempotency_keys.error_reason` (§6) and dead-letter triage. Truncated
    /// to [`crate::state::MAX_ERROR_REASON_LEN`] by the ledger before
    /// persistence.
    pub fn reason_code(&self) -> &'static str {
        match self {
            FluxaError::MalformedRequest(_) => "parse_error",
            FluxaError::ValidationFailure(_) => "validation_error",
            FluxaError::PayloadTooLargeForWire => "payload_too_large",
            FluxaError::BlobWriteFailure(_) => "blob_write_failed",
            FluxaError::BlobFetchFailure(_) => "blob_fetch_failed",
            FluxaError::QueueSendFailure(_) => "queue_send_failed",
            FluxaError::LedgerTransient(_) => "ledger_transient",
            FluxaError::PersistTransient(_) => "db_insert_failed",
            FluxaError::HashMismatch => "hash_mismatch",
            FluxaError::UnmarshalError(_) => "unmarshal_error",
            FluxaError::InvalidPayloadMode(_) => "invalid_payload_mode",
            FluxaError::MissingPayload(_) => "missing_s3_key",
            FluxaError::NotFound => "not_found",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_and_poison_are_mutually_exclusive() {
        let all = [
            FluxaError::MalformedRequest("x".into()),
            FluxaError::ValidationFailure("x".into()),
            FluxaError::PayloadTooLargeForWire,
            FluxaError::BlobWriteFailure("x".into()),
            FluxaError::BlobFetchFailure("x".into()),
            FluxaError::QueueSendFailure("x".into()),
            FluxaError::LedgerTransient("x".into()),
            FluxaError::PersistTransient("x".into()),
            FluxaError::HashMismatch,
            FluxaError::UnmarshalError("x".into()),
            FluxaError::InvalidPayloadMode("x".into()),
            FluxaError::MissingPayload("x".into()),
            FluxaError::NotFound,
        ];
        for e in &all {
            assert!(!(e.retriable() && e.is_poison()), "{e:?} is both retriable and poison");
        }
    }

    #[test]
    fn poison_path_covers_every_hard_failure() {
        assert!(FluxaError::HashMismatch.is_poison());
        assert!(FluxaError::UnmarshalError("bad".into()).is_poison());
        assert!(FluxaError::InvalidPayloadMode("WEIRD".into()).is_poison());
        assert!(FluxaError::MissingPayload("no key".into()).is_poison());
    }

    #[test]
    fn retriable_path_covers_every_transient_failure() {
        assert!(FluxaError::LedgerTransient("timeout".into()).retriable());
        assert!(FluxaError::PersistTransient("timeout".into()).retriable());
        assert!(FluxaError::BlobFetchFailure("timeout".into()).retriable());
    }
}
