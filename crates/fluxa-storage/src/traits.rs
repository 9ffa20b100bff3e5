//! Trait abstractions for the core's external collaborators (§3 "Ownership",
//! §6). These model the queue transport, blob store, relational store, and
//! notification bus treated here as abstract interfaces; this
//! crate supplies the concrete adapters.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxa_types::{CorrelationId, EventId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

//─────────────────────────────
//  Payload disposition
//─────────────────────────────

/// Where a queue message's payload bytes live (§3 "Queue Message").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadMode {
    /// Payload bytes travel inline inside the queue message.
    #[serde(rename = "INLINE")]
    Inline,
    /// Payload bytes were offloaded to the blob store.
    #[serde(rename = "S3")]
    S3,
}

impl PayloadMode {
    /// Parses a wire-format disposition tag, returning `None` for anything
    /// other than the two dispositions this build understands. Used on
    /// [`QueueMessage::payload_mode`], which carries the raw tag rather than
    /// this enum so that an unrecognized value still reaches the processor's
    /// `invalid_payload_mode` poison path instead of failing envelope
    /// deserialization outright.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "INLINE" => Some(Self::Inline),
            "S3" => Some(Self::S3),
            _ => None,
        }
    }

    /// The wire-format tag for this disposition.
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Self::Inline => "INLINE",
            Self::S3 => "S3",
        }
    }
}

//─────────────────────────────
//  Queue message (wire format, §6)
//─────────────────────────────

/// The queue message wire format (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    /// The event this message carries.
    pub event_id: EventId,
    /// Correlation identifier, propagated end-to-end.
    pub correlation_id: CorrelationId,
    /// Inline vs offloaded disposition, carried as the raw wire tag rather
    /// than [`PayloadMode`] so a producer-side disposition this build does
    /// not recognize still deserializes: it is only rejected once the
    /// processor reaches step 3 of its per-message algorithm and poisons it
    /// with `invalid_payload_mode` instead of a bare `parse_error`.
    pub payload_mode: String,
    /// Lowercase hex SHA-256 of the canonical payload bytes.
    pub payload_sha256: String,
    /// Present iff `payload_mode == Inline`: the canonicalized event JSON.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload_inline: Option<String>,
    /// Present iff `payload_mode == S3`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub s3_bucket: Option<String>,
    /// Present iff `payload_mode == S3`: `raw/YYYY-MM-DD/<event_id>.json`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub s3_key: Option<String>,
    /// When the message was produced by ingest.
    pub received_at: DateTime<Utc>,
}

/// A message handed to the processor by the transport, together with
/// enough bookkeeping to ack/nack it and to know how many times it has
/// been delivered.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// The parsed (or unparseable-but-present) message body.
    pub body: Vec<u8>,
    /// Opaque handle the transport needs to ack/nack this specific
    /// delivery.
    pub receipt_handle: String,
    /// How many times this message has been delivered, inclusive of this
    /// delivery. The core assumes the transport's max-receive-count is
    /// `>= 2` (§9).
    pub receive_count: u32,
}

/// Errors a [`QueueTransport`] can produce.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The transport could not accept or deliver a message right now; the
    /// same operation will plausibly succeed later.
    #[error("queue transient failure: {0}")]
    Transient(String),
}

/// Abstract queue transport (§3 "Queue Message", §4.4 "Batch contract").
///
/// Implementations own message durability, visibility timeouts, and
/// dead-letter redrive; this trait only exposes the operations the core
/// needs.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Enqueue `message`, attaching `{correlation_id, event_id}` as
    /// transport-level attributes (§4.3 step 7).
    async fn send(&self, message: &QueueMessage) -> Result<(), QueueError>;

    /// Receive up to `max_messages` messages (§4.4 "Batch contract": the
    /// core handles `1..N`). May return fewer than requested, including
    /// zero.
    async fn receive_batch(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Acknowledge successful (or deliberately poisoned) processing;
    /// deletes the message.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Signal a retriable failure; the transport redelivers after its
    /// visibility timeout, eventually dead-lettering after
    /// max-receive-count.
    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError>;
}

//─────────────────────────────
//  Blob store
//─────────────────────────────

/// Errors a [`BlobStore`] can produce.
///
/// [`BlobError::NotFound`] is distinguished from
/// [`BlobError::Transient`] per §9's resolution of the
/// "permanent 404 vs transient fetch error" open question: a missing
/// object is poison, a transient I/O failure is retriable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlobError {
    /// No object exists at the requested key.
    #[error("blob not found: {0}")]
    NotFound(String),
    /// The store could not be read from or written to right now.
    #[error("blob store transient failure: {0}")]
    Transient(String),
}

/// Abstract blob store (§4.1, §6 "Blob object layout").
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` at `key`, overwriting any existing object.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError>;

    /// Fetch the exact bytes previously written at `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError>;
}

//─────────────────────────────
//  Notification bus
//─────────────────────────────

/// Errors a [`NotificationBus`] can produce. Notification failures are
/// always non-fatal to the processor (§4.4 step 8); this type exists so
/// implementations have something to log.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotificationError {
    /// The bus could not accept the notification.
    #[error("notification bus failure: {0}")]
    Failed(String),
}

/// Abstract best-effort notification bus (§4.4 step 8, §9).
#[async_trait]
pub trait NotificationBus: Send + Sync {
    /// Emit a `{event_id, status: processed}` notification, carrying
    /// `{event_id, correlation_id}` as attributes.
    async fn notify_processed(
        &self,
        event_id: &EventId,
        correlation_id: &CorrelationId,
    ) -> Result<(), NotificationError>;
}

//─────────────────────────────
//  Relational store
//─────────────────────────────

/// The persisted event row (§3 "Persisted Event", §6 `events` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEvent {
    /// Unique key.
    pub event_id: EventId,
    /// Propagated correlation identifier.
    pub correlation_id: CorrelationId,
    /// Submitting user.
    pub user_id: String,
    /// Transaction amount.
    pub amount: Decimal,
    /// Currency code.
    pub currency: String,
    /// Merchant.
    pub merchant: String,
    /// Transaction instant.
    pub timestamp: DateTime<Utc>,
    /// Free-form metadata, if any.
    pub metadata: Option<HashMap<String, String>>,
    /// How this event's payload was transported.
    pub payload_mode: PayloadMode,
    /// Blob coordinate, present iff `payload_mode == S3`.
    pub s3_key: Option<String>,
    /// Server-assigned instant the row was written.
    pub created_at: DateTime<Utc>,
}

/// The relational store's event-persistence surface (§4.4 step 6, §4.5).
///
/// Implementations exclusively own the `events` table (§3 "Ownership") and
/// must enforce the unique key on `event_id` at the storage layer
/// regardless of what the ledger believes, per §4.2's "belt-and-braces"
/// rationale.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Insert `event`, doing nothing if a row with the same `event_id`
    /// already exists (`INSERT ... ON CONFLICT (event_id) DO NOTHING`).
    /// Returns `true` if a new row was written, `false` if the row already
    /// existed.
    async fn insert_event(&self, event: PersistedEvent) -> Result<bool, fluxa_ledger::FluxaError>;

    /// Fetch the persisted event by identifier (§4.5).
    async fn get_event(
        &self,
        event_id: &EventId,
    ) -> Result<Option<PersistedEvent>, fluxa_ledger::FluxaError>;
}
