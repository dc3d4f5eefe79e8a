//! Semi-structured business records.

use crate::timestamp::Timestamp;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the last modification time.
pub const UPDATED_AT_FIELD: &str = "updatedAt";
/// Business date, used when `updatedAt` is absent.
pub const DATE_FIELD: &str = "fecha";
/// Tombstone flag.
pub const DELETED_FIELD: &str = "deleted";
/// Fields stripped from a record when it is tombstoned.
pub const ATTACHMENT_FIELDS: [&str; 3] = ["pdf", "attachments", "archivos"];

/// A single business record.
///
/// The payload is opaque: only the merge key, the timestamps and the
/// tombstone flag have meaning to the replication layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wraps an existing JSON object.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Returns the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consumes the record and returns the underlying JSON object.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Sets a field, returning the record (builder style).
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Sets a field.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Returns a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Removes a field, returning its previous value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Returns the record's identity under the given merge key field.
    ///
    /// Only non-empty strings and numbers qualify; anything else means the
    /// record cannot be matched across datasets.
    pub fn key(&self, field: &str) -> Option<String> {
        match self.0.get(field)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) if n.as_f64() != Some(0.0) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Returns true if the tombstone flag is set.
    pub fn is_deleted(&self) -> bool {
        matches!(self.0.get(DELETED_FIELD), Some(Value::Bool(true)))
    }

    /// Returns `updatedAt`, falling back to the business date.
    pub fn effective_timestamp(&self) -> Timestamp {
        let updated = Timestamp::from_value(self.0.get(UPDATED_AT_FIELD));
        if updated.is_present() {
            return updated;
        }
        Timestamp::from_value(self.0.get(DATE_FIELD))
    }

    /// Stamps `updatedAt` with the given instant.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.set(
            UPDATED_AT_FIELD,
            at.to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }

    /// Soft-deletes the record: sets the tombstone, stamps `updatedAt` and
    /// strips attachments.
    pub fn tombstone(&mut self, at: DateTime<Utc>) {
        self.set(DELETED_FIELD, true);
        self.touch(at);
        for field in ATTACHMENT_FIELDS {
            self.0.remove(field);
        }
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
