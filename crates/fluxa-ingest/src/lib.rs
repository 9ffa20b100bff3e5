#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fluxa-ingest** – The ingest-side half of Fluxa: the Payload Router
//! (§4.1) and Ingest Admission (§4.3).
//!
//! [`admission::submit`] is the single entry point the HTTP handler in
//! `fluxa-service` calls; [`router::route`] is exposed separately because
//! the processor's tests exercise disposition logic in isolation.

pub mod admission;
pub mod router;

pub use admission::{submit, submit_logged, submit_with_threshold, SubmitResponse};
pub use router::{blob_key, route, route_with_threshold, RoutedPayload, MAX_INLINE_BYTES};
