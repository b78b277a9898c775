#![allow(dead_code)]

use serde_json::Value;
use taskfeed::cache::CacheRecord;
use taskfeed::types::Payload;

/// Turn a `json!({...})` object literal into a [`Payload`].
///
/// Panics if `value` is not an object.
pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {other}"),
    }
}

/// A non-leaf record.
pub fn record(unique_id: &str, value: Value) -> CacheRecord {
    CacheRecord::new(unique_id, payload(value))
}

/// A leaf record.
pub fn leaf(unique_id: &str, value: Value) -> CacheRecord {
    record(unique_id, value).leaf()
}

/// Leaf records named `prefix0..prefixN`, each with an `index` field.
pub fn leaves(prefix: &str, n: usize) -> Vec<CacheRecord> {
    (0..n)
        .map(|i| leaf(&format!("{prefix}{i}"), serde_json::json!({ "index": i })))
        .collect()
}
