//! Property test for `Event::validate`'s totality (§8 "Validation is total":
//! `validate(e) = OK` iff every §3 constraint holds, with no hidden
//! rejections downstream). Grounded on `toka-auth`'s
//! `tests/token_expiry_prop.rs` — a dedicated `proptest!` block per
//! invariant, living in its crate's `tests/` directory.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use fluxa_types::{Event, MAX_METADATA_KEYS, MAX_TIMESTAMP_SKEW};
use proptest::prelude::*;
use rust_decimal::Decimal;

proptest! {
    #[test]
    fn validate_matches_the_independently_computed_constraints(
        user_id in "[a-zA-Z0-9 ]{0,8}",
        amount_cents in -500i64..500i64,
        currency in "[A-Z ]{0,4}",
        merchant in "[a-zA-Z0-9 ]{0,8}",
        skew_minutes in -20i64..20i64,
        metadata_keys in 0usize..15,
    ) {
        let now = Utc::now();
        let event = Event {
            event_id: None,
            user_id: user_id.clone(),
            amount: Decimal::new(amount_cents, 2),
            currency: currency.clone(),
            merchant: merchant.clone(),
            timestamp: now + Duration::minutes(skew_minutes),
            metadata: Some(
                (0..metadata_keys)
                    .map(|i| (i.to_string(), "v".to_string()))
                    .collect::<HashMap<_, _>>(),
            ),
        };

        let expected_ok = !user_id.trim().is_empty()
            && amount_cents > 0
            && !currency.trim().is_empty()
            && !merchant.trim().is_empty()
            && Duration::minutes(skew_minutes) <= MAX_TIMESTAMP_SKEW
            && metadata_keys <= MAX_METADATA_KEYS;

        prop_assert_eq!(event.validate(now).is_ok(), expected_ok);
    }
}
