#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fluxa-ledger** – The idempotency ledger state machine and the shared
//! Fluxa error taxonomy.
//!
//! This crate owns no I/O. It defines the [`Ledger`] trait that
//! `fluxa-storage` implements against concrete backends, and the
//! [`FluxaError`] sum type that every other Fluxa crate returns up the call
//! stack instead of ad-hoc error handling (§9).

mod error;
mod state;

pub use error::FluxaError;
pub use state::{
    truncate_reason, ClaimOutcome, Ledger, LedgerEntry, LedgerStatus,
    DEFAULT_LIVENESS_WINDOW_SECS, MAX_ERROR_REASON_LEN,
};
