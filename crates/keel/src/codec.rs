//! Canonical serialization and fingerprinting of collection values.
//!
//! Records are compared by the fingerprint of their canonical text, never by deserialized
//! value. Two values are "equal" for every adapter exactly when their canonical texts are
//! byte-identical, so the serializer has to be canonical: [`CanonicalJson`] sorts object
//! keys and drops `null`-valued object fields, which makes `{"a":1,"b":null}` and `{"a":1}`
//! the same element.

use std::{fmt, sync::Arc};

use keel_crypto::{get_global_crypto_config, hash_text_with, HashAlgorithmChoice};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::{record::Record, KeelError, Result};

/// Canonical JSON text of a null element.
pub const NULL_JSON: &str = "null";

/// Pluggable canonical text encoding.
///
/// Implementations must map equal logical values to byte-equal text.
pub trait Serializer: Send + Sync + fmt::Debug {
    /// Encodes a value into canonical text.
    fn to_canonical(&self, value: &Value) -> Result<String>;

    /// Parses canonical text back into a value.
    fn from_canonical(&self, text: &str) -> Result<Value>;
}

/// JSON with sorted object keys and `null` object fields omitted.
#[derive(Debug, Default, Clone, Copy)]
pub struct CanonicalJson;

impl CanonicalJson {
    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut fields: Vec<(String, Value)> = map
                    .into_iter()
                    .filter(|&(_, ref v)| !v.is_null())
                    .map(|(k, v)| (k, Self::canonicalize(v)))
                    .collect();
                fields.sort_by(|a, b| a.0.cmp(&b.0));
                Value::Object(fields.into_iter().collect::<Map<String, Value>>())
            },
            Value::Array(items) => Value::Array(items.into_iter().map(Self::canonicalize).collect()),
            other => other,
        }
    }
}

impl Serializer for CanonicalJson {
    fn to_canonical(&self, value: &Value) -> Result<String> {
        Ok(serde_json::to_string(&Self::canonicalize(value.clone()))?)
    }

    fn from_canonical(&self, text: &str) -> Result<Value> { Ok(serde_json::from_str(text)?) }
}

/// Canonical text of a value plus its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Canonical serialized form.
    pub json_value:      String,
    /// Fingerprint of `json_value`.
    pub hash_json_value: String,
}

/// Serializer + fingerprint algorithm pair shared by every handle on a namespace.
#[derive(Clone)]
pub struct RecordCodec {
    serializer: Arc<dyn Serializer>,
    algorithm:  HashAlgorithmChoice,
}

impl fmt::Debug for RecordCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordCodec")
            .field("serializer", &self.serializer)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new(
            Arc::new(CanonicalJson),
            get_global_crypto_config().hash_algorithm,
        )
    }
}

impl RecordCodec {
    /// Creates a codec from a serializer and a fingerprint algorithm.
    pub fn new(serializer: Arc<dyn Serializer>, algorithm: HashAlgorithmChoice) -> Self {
        Self {
            serializer,
            algorithm,
        }
    }

    /// The fingerprint algorithm in use.
    pub const fn algorithm(&self) -> HashAlgorithmChoice { self.algorithm }

    /// Encodes a non-null value.
    ///
    /// # Errors
    /// `KeelError::NullElement` when the value's canonical form is `null`.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T, operation: &str) -> Result<Payload> {
        let payload = self.encode_nullable(value)?;
        if payload.json_value == NULL_JSON {
            return Err(KeelError::NullElement {
                operation: operation.to_owned(),
            });
        }
        Ok(payload)
    }

    /// Encodes any value, including null.
    pub fn encode_nullable<T: Serialize + ?Sized>(&self, value: &T) -> Result<Payload> {
        let json_value = self
            .serializer
            .to_canonical(&serde_json::to_value(value)?)?;
        let hash_json_value = hash_text_with(self.algorithm, &json_value)?;
        Ok(Payload {
            json_value,
            hash_json_value,
        })
    }

    /// Fingerprint of a non-null value.
    pub fn fingerprint<T: Serialize + ?Sized>(&self, value: &T, operation: &str) -> Result<String> {
        Ok(self.encode(value, operation)?.hash_json_value)
    }

    /// Distinct fingerprints of a list of non-null values, in first-seen order.
    pub fn fingerprints<T: Serialize>(&self, values: &[T], operation: &str) -> Result<Vec<String>> {
        let mut seen = std::collections::BTreeSet::new();
        let mut hashes = Vec::with_capacity(values.len());
        for value in values {
            let hash = self.fingerprint(value, operation)?;
            if seen.insert(hash.clone()) {
                hashes.push(hash);
            }
        }
        Ok(hashes)
    }

    /// Fingerprint of a map key's raw text.
    pub fn key_fingerprint(&self, key: &str) -> Result<String> { Ok(hash_text_with(self.algorithm, key)?) }

    /// Decodes the payload of a stored record.
    pub fn decode<T: DeserializeOwned>(&self, record: &Record) -> Result<T> {
        let value = self.serializer.from_canonical(&record.json_value)?;
        Ok(serde_json::from_value(value)?)
    }
}

/// Folds a hex fingerprint into a `u64`.
///
/// Depends only on the fingerprint text, so every process using the same algorithm folds a
/// value to the same number.
pub(crate) fn fold_fingerprint(fingerprint: &str) -> u64 {
    fingerprint
        .get(.. 16)
        .and_then(|prefix| u64::from_str_radix(prefix, 16).ok())
        .unwrap_or_else(|| {
            fingerprint
                .bytes()
                .fold(0u64, |acc, byte| acc.rotate_left(8) ^ u64::from(byte))
        })
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Job {
        name:     String,
        priority: u8,
        owner:    Option<String>,
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let text = CanonicalJson
            .to_canonical(&json!({"b": 1, "a": {"d": 2, "c": 3}}))
            .unwrap();
        assert_eq!(text, r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn test_canonical_json_omits_null_fields() {
        let with_null = CanonicalJson
            .to_canonical(&json!({"a": 1, "b": null}))
            .unwrap();
        let without = CanonicalJson.to_canonical(&json!({"a": 1})).unwrap();
        assert_eq!(with_null, without);
        // Nulls inside arrays are positional and stay.
        assert_eq!(
            CanonicalJson.to_canonical(&json!([1, null])).unwrap(),
            "[1,null]"
        );
    }

    #[test]
    fn test_encode_rejects_null() {
        let codec = RecordCodec::default();
        let result = codec.encode(&Option::<u32>::None, "offer_last");
        assert!(matches!(
            result,
            Err(KeelError::NullElement { ref operation }) if operation == "offer_last"
        ));
        assert_eq!(codec.encode_nullable(&()).unwrap().json_value, NULL_JSON);
    }

    #[test]
    fn test_equal_values_share_fingerprint() {
        let codec = RecordCodec::default();
        let a = Job {
            name:     "build".to_owned(),
            priority: 1,
            owner:    None,
        };
        let b = a.clone();
        assert_eq!(
            codec.fingerprint(&a, "contains").unwrap(),
            codec.fingerprint(&b, "contains").unwrap()
        );
        // A map with the same fields in another order and an explicit null is the same element.
        let loose = json!({"priority": 1, "owner": null, "name": "build"});
        assert_eq!(
            codec.fingerprint(&a, "contains").unwrap(),
            codec.fingerprint(&loose, "contains").unwrap()
        );
    }

    #[test]
    fn test_decode_round_trip_with_omitted_option() {
        let codec = RecordCodec::default();
        let job = Job {
            name:     "deploy".to_owned(),
            priority: 9,
            owner:    None,
        };
        let payload = codec.encode(&job, "put").unwrap();
        assert!(!payload.json_value.contains("owner"));
        let record = Record::new("k", payload);
        let decoded: Job = codec.decode(&record).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_fingerprints_are_distinct() {
        let codec = RecordCodec::default();
        let hashes = codec.fingerprints(&[1, 2, 1, 3], "remove_all").unwrap();
        assert_eq!(hashes.len(), 3);
    }

    #[test]
    fn test_algorithm_changes_fingerprint() {
        let blake = RecordCodec::new(Arc::new(CanonicalJson), HashAlgorithmChoice::Blake3);
        let sha = RecordCodec::new(Arc::new(CanonicalJson), HashAlgorithmChoice::Sha256);
        assert_ne!(
            blake.fingerprint(&"x", "t").unwrap(),
            sha.fingerprint(&"x", "t").unwrap()
        );
        assert_eq!(sha.algorithm(), HashAlgorithmChoice::Sha256);
    }

    #[test]
    fn test_fold_fingerprint_is_fixed() {
        let blake3 = RecordCodec::new(Arc::new(CanonicalJson), HashAlgorithmChoice::Blake3);
        let fingerprint = blake3.key_fingerprint("").unwrap();
        assert_eq!(fold_fingerprint(&fingerprint), 0xaf13_49b9_f5f9_a1a6);
        assert_eq!(fold_fingerprint("ab"), 0x6162);
    }
}
