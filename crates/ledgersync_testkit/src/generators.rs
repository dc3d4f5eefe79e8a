//! Property-based test generators using proptest.
//!
//! Keys are drawn from a small pool so that generated datasets collide
//! often, which is where merge behaviour is interesting.

use chrono::{DateTime, Utc};
use ledgersync_protocol::{CollectionKind, Dataset, Record};
use proptest::prelude::*;
use serde_json::Value;

/// 2020-01-01T00:00:00Z in milliseconds.
const MIN_MILLIS: i64 = 1_577_836_800_000;
/// 2030-01-01T00:00:00Z in milliseconds.
const MAX_MILLIS: i64 = 1_893_456_000_000;

/// Strategy for instants between 2020 and 2030 at millisecond precision.
pub fn instant_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (MIN_MILLIS..MAX_MILLIS)
        .prop_map(|ms| DateTime::from_timestamp_millis(ms).unwrap_or_default())
}

/// Strategy for a timestamp in any accepted wire form.
pub fn timestamp_value_strategy() -> impl Strategy<Value = Value> {
    instant_strategy().prop_flat_map(|at| {
        prop_oneof![
            Just(Value::String(
                at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
            )),
            Just(Value::String(at.format("%Y-%m-%dT%H:%M:%S").to_string())),
            Just(Value::String(at.format("%Y-%m-%d").to_string())),
            Just(Value::from(at.timestamp_millis())),
        ]
    })
}

/// Strategy for merge keys drawn from a pool of 16.
pub fn merge_key_strategy() -> impl Strategy<Value = String> {
    (0u8..16).prop_map(|n| format!("K{:02}", n))
}

/// Strategy for a record keyed on `key_field` with a parseable `updatedAt`.
pub fn record_strategy(key_field: &'static str) -> impl Strategy<Value = Record> {
    (
        merge_key_strategy(),
        instant_strategy(),
        any::<u32>(),
        any::<bool>(),
    )
        .prop_map(move |(key, at, amount, deleted)| {
            let mut record = Record::new()
                .with(key_field, key)
                .with("monto", amount);
            record.touch(at);
            if deleted {
                record.set("deleted", true);
            }
            record
        })
}

/// Strategy for a record that may lack a key or carry an odd timestamp.
pub fn messy_record_strategy(key_field: &'static str) -> impl Strategy<Value = Record> {
    (
        prop::option::of(merge_key_strategy()),
        prop_oneof![
            timestamp_value_strategy().prop_map(Some),
            Just(Some(Value::String("not a date".into()))),
            Just(Some(Value::Null)),
            Just(None),
        ],
        any::<u16>(),
    )
        .prop_map(move |(key, updated_at, amount)| {
            let mut record = Record::new().with("monto", amount);
            if let Some(key) = key {
                record.set(key_field, key);
            }
            if let Some(value) = updated_at {
                record.set("updatedAt", value);
            }
            record
        })
}

/// Strategy for a dataset with every known collection populated.
pub fn dataset_strategy() -> impl Strategy<Value = Dataset> {
    let collections: Vec<_> = CollectionKind::ALL
        .iter()
        .map(|kind| prop::collection::vec(record_strategy(kind.merge_key()), 0..12))
        .collect();
    collections.prop_map(|per_kind| {
        let mut dataset = Dataset::empty_default();
        for (kind, records) in CollectionKind::ALL.iter().zip(per_kind) {
            dataset.insert_collection(kind.wire_name(), records);
        }
        dataset
    })
}

/// Strategy for a quotation-only dataset that may contain messy records.
pub fn messy_dataset_strategy() -> impl Strategy<Value = Dataset> {
    prop::collection::vec(messy_record_strategy("numero"), 0..16).prop_map(|records| {
        let mut dataset = Dataset::new();
        dataset.insert_collection("cotizaciones", records);
        dataset
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersync_protocol::parse_timestamp_value;

    proptest! {
        #[test]
        fn timestamp_values_parse(value in timestamp_value_strategy()) {
            prop_assert!(parse_timestamp_value(&value).is_some());
        }

        #[test]
        fn records_have_keys(record in record_strategy("rut")) {
            prop_assert!(record.key("rut").is_some());
            prop_assert!(record.effective_timestamp().is_present());
        }

        #[test]
        fn datasets_cover_known_collections(dataset in dataset_strategy()) {
            for kind in CollectionKind::ALL {
                prop_assert!(dataset.collection(kind.wire_name()).is_some());
            }
        }
    }
}
