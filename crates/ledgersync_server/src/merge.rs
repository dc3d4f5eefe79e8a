//! Last-write-wins merge of two dataset snapshots.
//!
//! Each collection is merged independently:
//!
//! 1. Existing records are indexed by their collection's merge key.
//! 2. Each incoming record either inserts a new key or, for a known key,
//!    replaces the existing record when its effective timestamp is greater
//!    than or equal to the existing one. When either side's timestamp is
//!    missing or unparseable the incoming record is assumed newer.
//! 3. The result keeps first-seen order. Records are replaced wholesale;
//!    there is no field-level merge.
//!
//! Non-collection fields are overwritten by the incoming value. Collections
//! that only exist on the stored side are carried over unchanged.
//!
//! Records without a merge key are handled asymmetrically. Incoming keyless
//! records are skipped and counted. Stored keyless records are kept and
//! appended after the keyed ones, where a strict keyed-map merge would drop
//! them.

use ledgersync_protocol::{merge_key_for, Dataset, Record, Timestamp};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Per-collection merge statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionReport {
    /// Records on the stored side.
    pub existing: usize,
    /// Records on the incoming side.
    pub incoming: usize,
    /// Incoming records with a key not seen before.
    pub inserted: usize,
    /// Incoming records that replaced a stored record.
    pub updated: usize,
    /// Incoming records discarded because the stored record is newer.
    pub skipped_older: usize,
    /// Incoming records discarded because they have no merge key.
    pub skipped_keyless: usize,
    /// Records in the merged collection.
    pub merged: usize,
}

/// Statistics for a whole-dataset merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Report per collection name.
    pub collections: BTreeMap<String, CollectionReport>,
}

impl MergeReport {
    /// Total records inserted across collections.
    pub fn inserted(&self) -> usize {
        self.collections.values().map(|c| c.inserted).sum()
    }

    /// Total records updated across collections.
    pub fn updated(&self) -> usize {
        self.collections.values().map(|c| c.updated).sum()
    }

    /// Returns true if the merge replaced or added no record.
    pub fn is_noop(&self) -> bool {
        self.inserted() == 0 && self.updated() == 0
    }
}

/// Result of [`merge`].
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The reconciled dataset.
    pub dataset: Dataset,
    /// What happened to each collection.
    pub report: MergeReport,
}

/// Merges an incoming snapshot into the stored one.
pub fn merge(existing: Dataset, incoming: Dataset) -> MergeOutcome {
    let (mut collections, mut fields) = existing.into_parts();
    let (incoming_collections, incoming_fields) = incoming.into_parts();
    let mut report = MergeReport::default();

    for (name, incoming_records) in incoming_collections {
        let stored = collections.remove(&name).unwrap_or_default();
        let (merged, collection_report) = merge_collection(&name, stored, incoming_records);
        debug!(
            collection = %name,
            existing = collection_report.existing,
            incoming = collection_report.incoming,
            merged = collection_report.merged,
            "merged collection"
        );
        report.collections.insert(name.clone(), collection_report);
        fields.remove(&name);
        collections.insert(name, merged);
    }

    for (name, value) in incoming_fields {
        collections.remove(&name);
        fields.insert(name, value);
    }

    MergeOutcome {
        dataset: Dataset::from_parts(collections, fields),
        report,
    }
}

/// Merges one collection. See the module docs for the rules.
pub fn merge_collection(
    name: &str,
    existing: Vec<Record>,
    incoming: Vec<Record>,
) -> (Vec<Record>, CollectionReport) {
    let key_field = merge_key_for(name);
    let mut report = CollectionReport {
        existing: existing.len(),
        incoming: incoming.len(),
        ..CollectionReport::default()
    };

    let mut slots: Vec<Record> = Vec::with_capacity(existing.len() + incoming.len());
    let mut keyless: Vec<Record> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::with_capacity(existing.len());

    for record in existing {
        match record.key(key_field) {
            Some(key) => match index.get(&key) {
                // Duplicate key on the stored side: the later copy wins, as a
                // map insert would.
                Some(&slot) => slots[slot] = record,
                None => {
                    index.insert(key, slots.len());
                    slots.push(record);
                }
            },
            None => keyless.push(record),
        }
    }

    for record in incoming {
        let Some(key) = record.key(key_field) else {
            warn!(collection = %name, field = key_field, "skipping incoming record without merge key");
            report.skipped_keyless += 1;
            continue;
        };

        match index.get(&key) {
            None => {
                debug!(collection = %name, key = %key, "inserted");
                index.insert(key, slots.len());
                slots.push(record);
                report.inserted += 1;
            }
            Some(&slot) => {
                if incoming_wins(&record, &slots[slot]) {
                    debug!(collection = %name, key = %key, "updated");
                    slots[slot] = record;
                    report.updated += 1;
                } else {
                    debug!(collection = %name, key = %key, "kept newer stored record");
                    report.skipped_older += 1;
                }
            }
        }
    }

    slots.extend(keyless);
    report.merged = slots.len();
    (slots, report)
}

/// Returns true if `incoming` should replace `existing`.
///
/// Ties go to the incoming record, and so does any comparison where either
/// timestamp is missing or unparseable.
pub fn incoming_wins(incoming: &Record, existing: &Record) -> bool {
    match (
        incoming.effective_timestamp(),
        existing.effective_timestamp(),
    ) {
        (Timestamp::At(new), Timestamp::At(old)) => new >= old,
        _ => true,
    }
}
