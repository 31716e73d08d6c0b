//! Row values, natural keys, and the identity derivation for each policy.

use crate::bucket::{Bucket, BucketPolicy};
use crate::error::{LogStoreError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Column values of a row, without its id.
///
/// Ordered so the canonical JSON encoding of a field map is stable.
pub type Fields = BTreeMap<String, Value>;

/// A persisted row as returned by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    /// Natural key the row was stored under.
    pub key: String,
    pub fields: Fields,
}

/// How a caller identifies the record it wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKey {
    /// Caller-chosen string for natural-key buckets (entity name, region
    /// name, ...). Matched exactly, case-sensitive, no normalization.
    Natural(String),
    /// Identity derived from the field map itself (log buckets).
    Fields,
}

impl From<&str> for RecordKey {
    fn from(key: &str) -> Self {
        RecordKey::Natural(key.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(key: String) -> Self {
        RecordKey::Natural(key)
    }
}

/// The value a bucket cache keeps for one id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CachedValue {
    Key(String),
    Fields(Fields),
}

impl From<&str> for CachedValue {
    fn from(key: &str) -> Self {
        CachedValue::Key(key.to_string())
    }
}

impl From<Fields> for CachedValue {
    fn from(fields: Fields) -> Self {
        CachedValue::Fields(fields)
    }
}

/// Convert a JSON object into a field map.
pub fn into_fields(value: Value) -> Result<Fields> {
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(LogStoreError::Other(format!(
            "Expected a JSON object for record fields, got {}",
            other
        ))),
    }
}

/// Read an integer counter out of a field map.
pub fn read_counter(fields: &Fields, counter: &str) -> Option<i64> {
    fields.get(counter).and_then(Value::as_i64)
}

/// Canonical identity of a counted record: its fields minus the counter.
pub fn counted_key(fields: &Fields, counter: &str) -> Result<String> {
    let identity: BTreeMap<&str, &Value> = fields
        .iter()
        .filter(|(name, _)| name.as_str() != counter)
        .map(|(name, value)| (name.as_str(), value))
        .collect();
    Ok(serde_json::to_string(&identity)?)
}

impl BucketPolicy {
    /// Resolve the natural key for a write, rejecting malformed input.
    pub fn identity(&self, bucket: Bucket, key: &RecordKey, fields: &Fields) -> Result<String> {
        if fields.contains_key("id") {
            return Err(LogStoreError::contract(
                bucket,
                "field map must not carry an id; ids are assigned by the backend",
            ));
        }

        match (self, key) {
            (BucketPolicy::NaturalKey, RecordKey::Natural(key)) => {
                if key.is_empty() {
                    return Err(LogStoreError::contract(bucket, "natural key is empty"));
                }
                Ok(key.clone())
            }
            (BucketPolicy::CountedFields { counter }, RecordKey::Fields) => {
                if read_counter(fields, counter).is_none() {
                    return Err(LogStoreError::contract(
                        bucket,
                        format!("counter field '{}' missing or not an integer", counter),
                    ));
                }
                counted_key(fields, counter)
            }
            (BucketPolicy::NaturalKey, RecordKey::Fields) => Err(LogStoreError::contract(
                bucket,
                "bucket is keyed by a natural key string, not by its fields",
            )),
            (BucketPolicy::CountedFields { .. }, RecordKey::Natural(_)) => {
                Err(LogStoreError::contract(
                    bucket,
                    "bucket is keyed by its fields; pass RecordKey::Fields",
                ))
            }
        }
    }

    /// Natural key of an already-cached value.
    pub fn key_of(&self, bucket: Bucket, value: &CachedValue) -> Result<String> {
        match (self, value) {
            (BucketPolicy::NaturalKey, CachedValue::Key(key)) => Ok(key.clone()),
            (BucketPolicy::CountedFields { counter }, CachedValue::Fields(fields)) => {
                counted_key(fields, counter)
            }
            (BucketPolicy::NaturalKey, CachedValue::Fields(_)) => Err(LogStoreError::contract(
                bucket,
                "expected a natural key string, got a field map",
            )),
            (BucketPolicy::CountedFields { .. }, CachedValue::Key(_)) => Err(
                LogStoreError::contract(bucket, "expected a field map, got a natural key string"),
            ),
        }
    }

    /// What the cache keeps for a row with this key and these fields.
    pub fn cached_value(&self, key: &str, fields: &Fields) -> CachedValue {
        match self {
            BucketPolicy::NaturalKey => CachedValue::Key(key.to_string()),
            BucketPolicy::CountedFields { .. } => CachedValue::Fields(fields.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log_fields(views: i64) -> Fields {
        into_fields(json!({
            "eventname": "\\core\\event\\course_viewed",
            "userid": 2,
            "numberview": views,
        }))
        .unwrap()
    }

    #[test]
    fn test_counted_key_ignores_counter() {
        let a = counted_key(&log_fields(1), "numberview").unwrap();
        let b = counted_key(&log_fields(5), "numberview").unwrap();
        assert_eq!(a, b);
        assert!(!a.contains("numberview"));
    }

    #[test]
    fn test_counted_key_is_order_independent() {
        let a = into_fields(json!({"a": 1, "b": "x", "numberview": 1})).unwrap();
        let mut b = Fields::new();
        b.insert("numberview".into(), json!(1));
        b.insert("b".into(), json!("x"));
        b.insert("a".into(), json!(1));
        assert_eq!(
            counted_key(&a, "numberview").unwrap(),
            counted_key(&b, "numberview").unwrap()
        );
    }

    #[test]
    fn test_identity_rejects_missing_counter() {
        let fields = into_fields(json!({"eventname": "x"})).unwrap();
        let err = Bucket::Log
            .policy()
            .identity(Bucket::Log, &RecordKey::Fields, &fields)
            .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_identity_rejects_non_integer_counter() {
        let fields = into_fields(json!({"eventname": "x", "numberview": "1"})).unwrap();
        assert!(Bucket::LogHistory
            .policy()
            .identity(Bucket::LogHistory, &RecordKey::Fields, &fields)
            .is_err());
    }

    #[test]
    fn test_identity_rejects_policy_mismatch() {
        let fields = into_fields(json!({"name": "North"})).unwrap();
        assert!(Bucket::Region
            .policy()
            .identity(Bucket::Region, &RecordKey::Fields, &fields)
            .unwrap_err()
            .is_contract_violation());
        assert!(Bucket::Log
            .policy()
            .identity(Bucket::Log, &"North".into(), &log_fields(1))
            .unwrap_err()
            .is_contract_violation());
    }

    #[test]
    fn test_identity_rejects_explicit_id_and_empty_key() {
        let fields = into_fields(json!({"id": 4, "name": "North"})).unwrap();
        assert!(Bucket::Region
            .policy()
            .identity(Bucket::Region, &"North".into(), &fields)
            .is_err());
        assert!(Bucket::Region
            .policy()
            .identity(Bucket::Region, &"".into(), &Fields::new())
            .is_err());
    }

    #[test]
    fn test_into_fields_requires_object() {
        assert!(into_fields(json!([1, 2])).is_err());
    }
}
