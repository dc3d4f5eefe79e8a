//! The full set of collections for one user identity.

use crate::collection::CollectionKind;
use crate::error::{ProtocolError, ProtocolResult};
use crate::record::Record;
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A user's dataset: named collections plus opaque top-level fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    collections: BTreeMap<String, Vec<Record>>,
    fields: BTreeMap<String, Value>,
}

impl Dataset {
    /// Creates a dataset with no collections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the default dataset: one empty collection per known kind.
    pub fn empty_default() -> Self {
        let mut dataset = Self::new();
        for kind in CollectionKind::ALL {
            dataset.insert_collection(kind.wire_name(), Vec::new());
        }
        dataset
    }

    /// Builds a dataset from a decoded JSON object.
    ///
    /// Arrays become collections and must contain only objects.
    pub fn from_json_map(map: Map<String, Value>) -> ProtocolResult<Self> {
        let mut dataset = Self::new();
        for (name, value) in map {
            match value {
                Value::Array(items) => {
                    let mut records = Vec::with_capacity(items.len());
                    for (index, item) in items.into_iter().enumerate() {
                        match item {
                            Value::Object(object) => records.push(Record::from_map(object)),
                            other => {
                                return Err(ProtocolError::malformed(format!(
                                    "collection '{}' item {} is not an object: {}",
                                    name,
                                    index,
                                    json_kind(&other)
                                )))
                            }
                        }
                    }
                    dataset.collections.insert(name, records);
                }
                other => {
                    dataset.fields.insert(name, other);
                }
            }
        }
        Ok(dataset)
    }

    /// Builds a dataset from any JSON value; the value must be an object.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        match value {
            Value::Object(map) => Self::from_json_map(map),
            other => Err(ProtocolError::malformed(format!(
                "dataset must be an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Decodes a dataset from JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> ProtocolResult<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    /// Converts the dataset into a JSON value.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.clone());
        }
        for (name, records) in &self.collections {
            map.insert(
                name.clone(),
                Value::Array(
                    records
                        .iter()
                        .map(|r| Value::Object(r.as_map().clone()))
                        .collect(),
                ),
            );
        }
        Value::Object(map)
    }

    /// Returns the records of a collection.
    pub fn collection(&self, name: &str) -> Option<&[Record]> {
        self.collections.get(name).map(Vec::as_slice)
    }

    /// Returns a mutable handle to a collection, creating it if absent.
    pub fn collection_mut(&mut self, name: &str) -> &mut Vec<Record> {
        self.fields.remove(name);
        self.collections.entry(name.to_string()).or_default()
    }

    /// Replaces a collection.
    pub fn insert_collection(&mut self, name: impl Into<String>, records: Vec<Record>) {
        let name = name.into();
        self.fields.remove(&name);
        self.collections.insert(name, records);
    }

    /// Adds a record to a collection (builder style).
    pub fn with_record(mut self, collection: &str, record: Record) -> Self {
        self.collection_mut(collection).push(record);
        self
    }

    /// Iterates over collections in name order.
    pub fn collections(&self) -> impl Iterator<Item = (&str, &[Record])> {
        self.collections
            .iter()
            .map(|(name, records)| (name.as_str(), records.as_slice()))
    }

    /// Iterates mutably over collections in name order.
    pub fn collections_mut(&mut self) -> impl Iterator<Item = (&str, &mut Vec<Record>)> {
        self.collections
            .iter_mut()
            .map(|(name, records)| (name.as_str(), records))
    }

    /// Returns a non-collection field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sets a non-collection field. Arrays are rejected; use collections.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) -> ProtocolResult<()> {
        let name = name.into();
        if value.is_array() {
            return Err(ProtocolError::malformed(format!(
                "field '{}' is an array; arrays are collections",
                name
            )));
        }
        self.collections.remove(&name);
        self.fields.insert(name, value);
        Ok(())
    }

    /// Iterates over non-collection fields.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Returns true if every collection is empty (or there are none).
    pub fn is_empty(&self) -> bool {
        self.collections.values().all(Vec::is_empty)
    }

    /// Returns the number of records in each collection.
    pub fn collection_sizes(&self) -> BTreeMap<String, usize> {
        self.collections
            .iter()
            .map(|(name, records)| (name.clone(), records.len()))
            .collect()
    }

    /// Returns the total number of records across collections.
    pub fn record_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    /// Returns true if the dataset has neither collections nor fields.
    pub fn has_no_entries(&self) -> bool {
        self.collections.is_empty() && self.fields.is_empty()
    }

    /// Splits the dataset into its collections and fields.
    pub fn into_parts(self) -> (BTreeMap<String, Vec<Record>>, BTreeMap<String, Value>) {
        (self.collections, self.fields)
    }

    /// Reassembles a dataset from collections and fields.
    ///
    /// A name present in both maps is kept as a collection.
    pub fn from_parts(
        collections: BTreeMap<String, Vec<Record>>,
        mut fields: BTreeMap<String, Value>,
    ) -> Self {
        fields.retain(|name, value| !collections.contains_key(name) && !value.is_array());
        Self {
            collections,
            fields,
        }
    }
}

impl Serialize for Dataset {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.collections.len() + self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        for (name, records) in &self.collections {
            map.serialize_entry(name, records)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Dataset {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Dataset::from_json_map(map).map_err(D::Error::custom)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
