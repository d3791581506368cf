//! Property-based test generators using proptest.
//!
//! Provides strategies for generating record sets that keep the
//! identity invariant: ids are unique within a set.

use crate::fixtures::fixed_time;
use chrono::Duration;
use packsync_model::{Record, SerializedRecord};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for record text, including non-ASCII.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::string::string_regex("[a-zA-Z0-9 ]{0,24}").expect("Invalid regex"),
        Just("Zahnbürste 🪥".to_string()),
        Just(String::new()),
    ]
}

/// Strategy for a single record with order >= 1.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    (
        1i64..10_000,
        text_strategy(),
        any::<bool>(),
        0i64..1_000_000,
        1i64..1_000,
    )
        .prop_map(|(id, text, done, offset_secs, order)| {
            Record::new(id, text, order)
                .with_done(done)
                .with_created_at(fixed_time() + Duration::seconds(offset_secs))
        })
}

/// Strategy for a record set with unique ids, sorted by order.
pub fn record_set_strategy(max_len: usize) -> impl Strategy<Value = Vec<Record>> {
    prop::collection::vec(record_strategy(), 0..=max_len).prop_map(|records| {
        let unique: BTreeMap<i64, Record> = records.into_iter().map(|r| (r.id, r)).collect();
        let mut records: Vec<Record> = unique.into_values().collect();
        packsync_model::sort_by_order(&mut records);
        records
    })
}

/// Strategy for wire-shaped records as they appear in an import payload.
pub fn serialized_record_strategy() -> impl Strategy<Value = SerializedRecord> {
    record_strategy().prop_map(|r| r.serialize())
}
