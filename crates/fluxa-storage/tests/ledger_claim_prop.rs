//! Property test for the ledger's claim monotonicity invariant (§8
//! "ledger row's `status` is monotonic modulo `processing <-> processing`
//! and `failed -> processing` retries; `success` is terminal within the
//! row's lifetime", §4.2 "`attempts` is non-decreasing"). Grounded on
//! `toka-auth`'s `tests/token_expiry_prop.rs` placement convention, applied
//! here to `fluxa-storage`'s `MemoryStore` since that is where a concrete
//! `Ledger` lives.
//!
//! Each step below mirrors one simulated processor attempt: claim, then
//! (only if the claim actually admitted processing) either commit success,
//! commit failed, or "crash" without committing at all -- the three
//! outcomes §4.4's per-message algorithm can produce.

use chrono::Duration;
use fluxa_ledger::{ClaimOutcome, Ledger, LedgerStatus};
use fluxa_storage::MemoryStore;
use fluxa_types::EventId;
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum StepOutcome {
    CommitSuccess,
    CommitFailed,
    CrashBeforeCommit,
}

fn step_outcome_strategy() -> impl Strategy<Value = StepOutcome> {
    prop_oneof![
        Just(StepOutcome::CommitSuccess),
        Just(StepOutcome::CommitFailed),
        Just(StepOutcome::CrashBeforeCommit),
    ]
}

proptest! {
    #[test]
    fn attempts_never_decrease_and_success_is_terminal(
        steps in prop::collection::vec(step_outcome_strategy(), 1..20),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            // Zero liveness window: every `processing` claim is immediately
            // stale, so a re-claim after a crash always takes the `Retry`
            // path instead of blocking on a "live peer" window.
            let store = MemoryStore::new(Duration::zero());
            let event_id = EventId("evt-prop-1".to_string());

            let mut last_attempts = 0u32;
            let mut terminally_succeeded = false;

            for step in steps {
                let claim_outcome = store.claim(&event_id).await.unwrap();

                if terminally_succeeded {
                    prop_assert_eq!(claim_outcome, ClaimOutcome::AlreadyDone);
                    continue;
                }

                match step {
                    StepOutcome::CommitSuccess => {
                        store.commit_success(&event_id).await.unwrap();
                        terminally_succeeded = true;
                    }
                    StepOutcome::CommitFailed => {
                        store.commit_failed(&event_id, "poison").await.unwrap();
                    }
                    StepOutcome::CrashBeforeCommit => {
                        // No commit call: the entry stays `processing`,
                        // exactly like a worker that died mid-flight.
                    }
                }

                let entry = store.status(&event_id).await.unwrap().unwrap();
                prop_assert!(entry.attempts >= last_attempts);
                last_attempts = entry.attempts;

                if terminally_succeeded {
                    prop_assert_eq!(entry.status, LedgerStatus::Success);
                }
            }
            Ok(())
        })?;
    }
}
