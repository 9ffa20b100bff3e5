//! Deadline-bounding decorators for the storage traits (§5 "Cancellation &
//! timeouts"): every external call the core makes MUST be bounded so a
//! wedged connection or a stalled blob read can never hang a worker
//! forever. Rather than thread a `Duration` through every adapter, these
//! wrappers sit between the service binary and whichever concrete backend
//! it selected, the same "wrap the inner backend" shape
//! `toka-store-raft`'s distributed kernel uses around its storage calls
//! (`tokio::time::timeout` around each operation, mapped back to the
//! crate's own error type on elapse).

use std::time::Duration;

use async_trait::async_trait;
use fluxa_ledger::{ClaimOutcome, FluxaError, Ledger, LedgerEntry};
use fluxa_types::EventId;
use tokio::time::timeout;
use tracing::warn;

use crate::traits::{BlobError, BlobStore, PersistedEvent, RelationalStore};

/// Wraps a [`Ledger`] so every operation is bounded by `deadline` (§5: "per
/// op DB timeout, default 5s").
pub struct TimeoutLedger<L> {
    inner: L,
    deadline: Duration,
}

impl<L> TimeoutLedger<L> {
    /// Bound every call to `inner` by `deadline`.
    pub fn new(inner: L, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl<L: Ledger> Ledger for TimeoutLedger<L> {
    async fn claim(&self, event_id: &EventId) -> Result<ClaimOutcome, FluxaError> {
        timeout(self.deadline, self.inner.claim(event_id)).await.unwrap_or_else(|_| {
            warn!(event_id = %event_id, deadline = ?self.deadline, "ledger claim exceeded deadline");
            Err(FluxaError::LedgerTransient("claim timed out".to_string()))
        })
    }

    async fn commit_success(&self, event_id: &EventId) -> Result<(), FluxaError> {
        timeout(self.deadline, self.inner.commit_success(event_id))
            .await
            .map_err(|_| FluxaError::LedgerTransient("commit_success timed out".to_string()))?
    }

    async fn commit_failed(&self, event_id: &EventId, reason: &str) -> Result<(), FluxaError> {
        timeout(self.deadline, self.inner.commit_failed(event_id, reason))
            .await
            .map_err(|_| FluxaError::LedgerTransient("commit_failed timed out".to_string()))?
    }

    async fn status(&self, event_id: &EventId) -> Result<Option<LedgerEntry>, FluxaError> {
        timeout(self.deadline, self.inner.status(event_id))
            .await
            .map_err(|_| FluxaError::LedgerTransient("status timed out".to_string()))?
    }
}

/// Wraps a [`RelationalStore`] so every operation is bounded by `deadline`.
pub struct TimeoutRelationalStore<R> {
    inner: R,
    deadline: Duration,
}

impl<R> TimeoutRelationalStore<R> {
    /// Bound every call to `inner` by `deadline`.
    pub fn new(inner: R, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl<R: RelationalStore> RelationalStore for TimeoutRelationalStore<R> {
    async fn insert_event(&self, event: PersistedEvent) -> Result<bool, FluxaError> {
        timeout(self.deadline, self.inner.insert_event(event))
            .await
            .map_err(|_| FluxaError::PersistTransient("insert_event timed out".to_string()))?
    }

    async fn get_event(&self, event_id: &EventId) -> Result<Option<PersistedEvent>, FluxaError> {
        timeout(self.deadline, self.inner.get_event(event_id))
            .await
            .map_err(|_| FluxaError::PersistTransient("get_event timed out".to_string()))?
    }
}

/// Wraps a [`BlobStore`] so every operation is bounded by `deadline` (§5:
/// "blob-fetch timeout, default 10s").
pub struct TimeoutBlobStore<B> {
    inner: B,
    deadline: Duration,
}

impl<B> TimeoutBlobStore<B> {
    /// Bound every call to `inner` by `deadline`.
    pub fn new(inner: B, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl<B: BlobStore> BlobStore for TimeoutBlobStore<B> {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobError> {
        timeout(self.deadline, self.inner.put(key, bytes))
            .await
            .map_err(|_| BlobError::Transient(format!("put {key} timed out")))?
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        timeout(self.deadline, self.inner.get(key))
            .await
            .map_err(|_| BlobError::Transient(format!("get {key} timed out")))?
    }
}
