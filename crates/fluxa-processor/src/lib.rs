#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **fluxa-processor** – The exactly-once batch processing protocol (§4.4).
//!
//! [`batch::run_batch`] is what `fluxa-service`'s poll loop calls; it
//! receives a batch from the transport and runs [`process::process_message`]
//! against each message sequentially, acking or nacking as it goes.

pub mod batch;
pub mod process;

pub use batch::{run_batch, BatchSummary};
pub use process::{process_message, MessageOutcome};
