//! Shared application state (§10.1 "service binary"): the trait objects the
//! HTTP handlers and the processor poll loop both reach through, and the
//! runtime knobs (§9 "Config values that must be configurable") resolved
//! from [`crate::config::AppConfig`].

use std::sync::Arc;
use std::time::Duration;

use fluxa_ledger::Ledger;
use fluxa_storage::{BlobStore, NotificationBus, QueueTransport, RelationalStore};

/// Everything an `axum` handler or the poll loop needs, cloned cheaply per
/// request via `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Idempotency ledger (§4.2).
    pub ledger: Arc<dyn Ledger>,
    /// Relational event store (§4.4 step 6, §4.5).
    pub relational: Arc<dyn RelationalStore>,
    /// Blob store for offloaded payloads (§4.1).
    pub blob_store: Arc<dyn BlobStore>,
    /// Queue transport carrying admitted events to the processor (§4.3,
    /// §4.4).
    pub queue: Arc<dyn QueueTransport>,
    /// Best-effort notification bus (§4.4 step 8).
    pub notifier: Arc<dyn NotificationBus>,
    /// Processor batch size (§4.4 "Batch contract").
    pub batch_size: usize,
    /// Processor poll cadence.
    pub poll_interval: Duration,
    /// Inline/offload threshold for the Payload Router (§4.1, §9).
    pub max_inline_bytes: usize,
}
