//! The idempotency ledger state machine (§4.2).
//!
//! The three-state machine (`processing`, `success`, `failed`) is modeled as
//! an explicit tagged enum at the interface boundary, per §9:
//! transition logic lives in one place (the [`Ledger`] trait's
//! implementations), never as ad-hoc boolean flags scattered through
//! callers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxa_types::EventId;
use serde::{Deserialize, Serialize};

use crate::error::FluxaError;

/// Default liveness window (§4.2 step 4): how long a `processing` claim is
/// considered held by a live peer before a concurrent claimant may take
/// over.
pub const DEFAULT_LIVENESS_WINDOW_SECS: i64 = 60;

/// Maximum length an `error_reason` is truncated to before persistence
/// (§4.2).
pub const MAX_ERROR_REASON_LEN: usize = 500;

/// Terminal-ish status of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    /// A worker currently holds (or recently held) the claim.
    Processing,
    /// The event was persisted and the ledger entry is terminal.
    Success,
    /// The event was poisoned; the ledger entry is terminal but retriable
    /// via a fresh claim (§4.2: `failed → processing` is allowed).
    Failed,
}

/// A single row of the idempotency ledger (§3 "Ledger Entry").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// The event this entry tracks.
    pub event_id: EventId,
    /// Current status.
    pub status: LedgerStatus,
    /// Instant of the first claim.
    pub first_seen_at: DateTime<Utc>,
    /// Instant of the most recent claim or commit.
    pub last_seen_at: DateTime<Utc>,
    /// Number of times this event has been claimed; strictly increases on
    /// each re-entry (§4.2).
    pub attempts: u32,
    /// Reason recorded by `commit_failed`, if any, truncated to
    /// [`MAX_ERROR_REASON_LEN`].
    pub error_reason: Option<String>,
}

/// Outcome of calling [`Ledger::claim`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// No prior entry existed; the caller now holds a fresh claim at
    /// `attempts = 1`.
    Fresh,
    /// The event is already terminally `success`, or another worker holds a
    /// live `processing` claim within the liveness window. The caller must
    /// not process this event.
    AlreadyDone,
    /// The prior entry was `failed` or a stale `processing` claim; the
    /// caller now holds the claim with `attempts` incremented and must
    /// process the event.
    Retry,
}

/// Truncate an error reason to the ledger's storage bound (§4.2).
pub fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_ERROR_REASON_LEN {
        reason.to_string()
    } else {
        reason.chars().take(MAX_ERROR_REASON_LEN).collect()
    }
}

/// The idempotency ledger's atomic claim-or-reject and terminal-transition
/// primitives (§4.2).
///
/// Implementations MUST run `claim` inside a single serializable
/// transaction against the backing store (row lock + insert-or-update) so
/// that at most one caller ever observes [`ClaimOutcome::Fresh`] or
/// [`ClaimOutcome::Retry`] for a given event within the liveness window.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Atomically claim the right to process `event_id`. See §4.2 for the
    /// exact transition table.
    async fn claim(&self, event_id: &EventId) -> Result<ClaimOutcome, FluxaError>;

    /// Transition a held claim to `success`. Idempotent: committing success
    /// twice is not an error.
    async fn commit_success(&self, event_id: &EventId) -> Result<(), FluxaError>;

    /// Transition a held claim to `failed`, recording `reason` (truncated
    /// to [`MAX_ERROR_REASON_LEN`]).
    async fn commit_failed(&self, event_id: &EventId, reason: &str) -> Result<(), FluxaError>;

    /// Look up the current ledger entry for `event_id`, if any.
    async fn status(&self, event_id: &EventId) -> Result<Option<LedgerEntry>, FluxaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_reason_is_a_no_op_under_the_limit() {
        let short = "hash_mismatch";
        assert_eq!(truncate_reason(short), short);
    }

    #[test]
    fn truncate_reason_clamps_long_messages() {
        let long = "x".repeat(MAX_ERROR_REASON_LEN + 50);
        let truncated = truncate_reason(&long);
        assert_eq!(truncated.chars().count(), MAX_ERROR_REASON_LEN);
    }
}
