//! The processor's polling loop (§4.4, §5 "Scheduling model": "the
//! processor is invoked concurrently per batch by the transport").
//!
//! The in-memory queue this binary wires up by default has no push-based
//! delivery mechanism, so the loop below polls it on a fixed cadence,
//! mirroring how a real SQS/Kinesis consumer would long-poll. Each tick
//! runs one [`fluxa_processor::run_batch`] to completion before sleeping;
//! under real parallel-worker deployment, multiple instances of this loop
//! would run in separate processes/tasks against the same queue, which is
//! exactly the "multiple workers process disjoint batches in parallel"
//! model the ledger's claim primitive is designed to make safe.

use tracing::{debug, info};

use crate::state::AppState;

/// Run the poll loop forever (until the process is asked to shut down via
/// the `shutdown` future resolving).
pub async fn run(state: AppState, shutdown: impl std::future::Future<Output = ()>) {
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(state.poll_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let summary = fluxa_processor::run_batch(
                    state.queue.as_ref(),
                    state.batch_size,
                    state.ledger.as_ref(),
                    state.blob_store.as_ref(),
                    state.relational.as_ref(),
                    state.notifier.as_ref(),
                )
                .await;

                if summary.total() > 0 {
                    info!(
                        acked = summary.acked,
                        nacked = summary.nacked,
                        poisoned = summary.poisoned,
                        "processor batch complete"
                    );
                } else {
                    debug!("processor poll found nothing to do");
                }
            }
            _ = &mut shutdown => {
                info!("processor poll loop shutting down");
                return;
            }
        }
    }
}
