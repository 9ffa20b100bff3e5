#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fluxa-types** – Shared primitive data structures for Fluxa.
//!
//! The crate sits at the bottom of the dependency graph: it performs no I/O
//! and makes no assumptions about storage, transport, or hashing. Every
//! other Fluxa crate depends on it.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of keys allowed in an event's `metadata` map (§3).
pub const MAX_METADATA_KEYS: usize = 10;

/// How far into the future an event timestamp may be dated (§3).
pub const MAX_TIMESTAMP_SKEW: Duration = Duration::minutes(5);

//─────────────────────────────
//  Identifiers
//─────────────────────────────

/// Opaque, caller- or system-assigned identifier for an [`Event`].
///
/// Carried unchanged through the queue, ledger, and relational store once
/// assigned at ingest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Generate a fresh, random event identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque identifier propagated end-to-end for log correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// Generate a fresh, random correlation identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

//─────────────────────────────
//  Event
//─────────────────────────────

/// A user-submitted transaction event (§3).
///
/// `event_id` is optional on the wire (assigned at ingest if absent) but
/// always populated once the event has been admitted; downstream code
/// should treat it as required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Identifier assigned at ingest (or supplied by the caller).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub event_id: Option<EventId>,
    /// Submitting user.
    pub user_id: String,
    /// Transaction amount; must be strictly positive.
    pub amount: Decimal,
    /// ISO-4217-shaped currency code, not itself validated beyond non-empty.
    pub currency: String,
    /// Merchant identifier or name.
    pub merchant: String,
    /// Instant the transaction occurred.
    pub timestamp: DateTime<Utc>,
    /// Free-form metadata, bounded to [`MAX_METADATA_KEYS`] entries.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<HashMap<String, String>>,
}

/// A single reason an [`Event`] failed validation (§3), carrying a
/// machine-readable code per §4.3 step 3.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Name of the offending field.
    pub field: &'static str,
    /// Machine-readable classification.
    pub code: ValidationErrorCode,
    /// Human-readable detail.
    pub message: String,
}

/// Machine-readable validation failure codes (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationErrorCode {
    /// A required field was empty or absent.
    MissingField,
    /// A field was present but held an out-of-range or malformed value.
    InvalidValue,
}

/// Whether `c` is allowed in an `event_id`. Event identifiers are used
/// verbatim as the primary key, the idempotency ledger key, and (via
/// `fluxa-ingest::router::blob_key`) a path component of the blob store
/// key, so this is deliberately a narrow allowlist rather than a denylist
/// of specific dangerous characters.
fn is_safe_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

impl Event {
    /// Validate this event against every invariant in §3.
    ///
    /// Validation is total: every field is checked, even after the first
    /// failure, so a caller can report (or log) every offending field at
    /// once instead of stopping at the first error.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.user_id.trim().is_empty() {
            errors.push(ValidationError {
                field: "user_id",
                code: ValidationErrorCode::MissingField,
                message: "user_id must not be empty".to_string(),
            });
        }

        if let Some(event_id) = &self.event_id {
            if event_id.0.is_empty() || !event_id.0.chars().all(is_safe_identifier_char) {
                errors.push(ValidationError {
                    field: "event_id",
                    code: ValidationErrorCode::InvalidValue,
                    message: "event_id must be non-empty and contain only ASCII letters, digits, '-' or '_' (no path separators or '.')".to_string(),
                });
            }
        }

        if self.amount <= Decimal::ZERO {
            errors.push(ValidationError {
                field: "amount",
                code: ValidationErrorCode::InvalidValue,
                message: "amount must be strictly positive".to_string(),
            });
        }

        if self.currency.trim().is_empty() {
            errors.push(ValidationError {
                field: "currency",
                code: ValidationErrorCode::MissingField,
                message: "currency must not be empty".to_string(),
            });
        }

        if self.merchant.trim().is_empty() {
            errors.push(ValidationError {
                field: "merchant",
                code: ValidationErrorCode::MissingField,
                message: "merchant must not be empty".to_string(),
            });
        }

        if self.timestamp.timestamp() == 0 {
            errors.push(ValidationError {
                field: "timestamp",
                code: ValidationErrorCode::InvalidValue,
                message: "timestamp must not be the zero instant".to_string(),
            });
        } else if self.timestamp > now + MAX_TIMESTAMP_SKEW {
            errors.push(ValidationError {
                field: "timestamp",
                code: ValidationErrorCode::InvalidValue,
                message: format!(
                    "timestamp {} is more than {} in the future",
                    self.timestamp, MAX_TIMESTAMP_SKEW
                ),
            });
        }

        if let Some(metadata) = &self.metadata {
            if metadata.len() > MAX_METADATA_KEYS {
                errors.push(ValidationError {
                    field: "metadata",
                    code: ValidationErrorCode::InvalidValue,
                    message: format!(
                        "metadata has {} keys, exceeding the maximum of {}",
                        metadata.len(),
                        MAX_METADATA_KEYS
                    ),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
