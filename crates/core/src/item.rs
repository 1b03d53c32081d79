//! The unit of data flowing through every pipeline.
//!
//! An [`Item`] pairs an insertion-ordered [`Metadata`] object with an arbitrary
//! JSON payload. Items are owned values: a stage that turns one item into
//! several clones the metadata for each output, so two live items never share
//! one metadata instance.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Origin identifier, stable across restarts.
pub const SOURCE_URL: &str = "sourceUrl";
/// Wall-clock production time in epoch milliseconds.
pub const TIMESTAMP: &str = "timestamp";
/// Zero-based ordinal assigned by the source, unique per `sourceUrl`.
pub const STREAM_POSITION: &str = "streamPosition";

/// Insertion-ordered metadata attached to an item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(Map<String, Value>);

impl Metadata {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Sets a field, keeping its original position if it already exists.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn source_url(&self) -> Option<&str> {
        self.0.get(SOURCE_URL).and_then(Value::as_str)
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.0.get(TIMESTAMP).and_then(Value::as_i64)
    }

    pub fn stream_position(&self) -> Option<u64> {
        self.0.get(STREAM_POSITION).and_then(Value::as_u64)
    }

    pub fn set_source_url(&mut self, url: impl Into<String>) {
        self.insert(SOURCE_URL, url.into());
    }

    pub fn set_timestamp(&mut self, millis: i64) {
        self.insert(TIMESTAMP, millis);
    }

    pub fn set_stream_position(&mut self, position: u64) {
        self.insert(STREAM_POSITION, position);
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// One metadata/data pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub metadata: Metadata,
    pub data: Value,
}

impl Item {
    pub fn new(metadata: Metadata, data: Value) -> Self {
        Self { metadata, data }
    }

    /// Creates an item with empty metadata.
    pub fn from_data(data: Value) -> Self {
        Self {
            metadata: Metadata::new(),
            data,
        }
    }

    /// Derives a new item sharing a copy of this item's metadata.
    pub fn with_data(&self, data: Value) -> Self {
        Self {
            metadata: self.metadata.clone(),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_preserves_insertion_order() {
        let mut metadata = Metadata::new();
        metadata.insert("zeta", 1);
        metadata.insert("alpha", 2);
        metadata.set_stream_position(7);

        let keys: Vec<&String> = metadata.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "streamPosition"]);
    }

    #[test]
    fn test_reserved_accessors() {
        let mut metadata = Metadata::new();
        assert!(metadata.stream_position().is_none());

        metadata.set_source_url("file:///data/people.jsonl");
        metadata.set_timestamp(1_700_000_000_000);
        metadata.set_stream_position(42);

        assert_eq!(metadata.source_url(), Some("file:///data/people.jsonl"));
        assert_eq!(metadata.timestamp(), Some(1_700_000_000_000));
        assert_eq!(metadata.stream_position(), Some(42));
    }

    #[test]
    fn test_derived_items_do_not_share_metadata() {
        let mut original = Item::from_data(json!({"a": 1}));
        original.metadata.insert("tag", "x");

        let mut derived = original.with_data(json!({"b": 2}));
        derived.metadata.insert("tag", "y");

        assert_eq!(original.metadata.get("tag"), Some(&json!("x")));
        assert_eq!(derived.metadata.get("tag"), Some(&json!("y")));
    }

    #[test]
    fn test_item_serialization() {
        let mut item = Item::from_data(json!({"name": "Ada"}));
        item.metadata.set_stream_position(0);

        let json = serde_json::to_string(&item).unwrap();
        assert_eq!(
            json,
            r#"{"metadata":{"streamPosition":0},"data":{"name":"Ada"}}"#
        );
    }
}
