use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::Payload;

/// Identity of a stored record.
///
/// Deques key their records by a signed integer order key; maps and sets key them by an
/// arbitrary string. A namespace only ever holds one of the two kinds, so the derived
/// ordering (integers before strings) never mixes in practice.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    /// Deque order key
    Int(i64),
    /// Map/set key
    Str(String),
}

impl RecordId {
    /// Returns the integer order key, if this is one.
    pub const fn as_int(&self) -> Option<i64> {
        match *self {
            Self::Int(id) => Some(id),
            Self::Str(_) => None,
        }
    }

    /// Returns the string key, if this is one.
    pub fn as_str(&self) -> Option<&str> {
        match *self {
            Self::Int(_) => None,
            Self::Str(ref key) => Some(key),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Str(ref key) => write!(f, "{key}"),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self { Self::Int(id) }
}

impl From<String> for RecordId {
    fn from(key: String) -> Self { Self::Str(key) }
}

impl From<&str> for RecordId {
    fn from(key: &str) -> Self { Self::Str(key.to_owned()) }
}

/// One stored collection element.
///
/// The persisted layout is `{_id, json_value, hash_json_value, created_at?}`. Only map writes
/// stamp `created_at`; deque records omit it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identity within the namespace.
    #[serde(rename = "_id")]
    pub id:              RecordId,
    /// Canonical serialized payload.
    pub json_value:      String,
    /// Fingerprint of `json_value`.
    pub hash_json_value: String,
    /// Write timestamp, used by TTL indexes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at:      Option<DateTime<Utc>>,
}

impl Record {
    /// Creates a record without a write timestamp.
    pub fn new(id: impl Into<RecordId>, payload: Payload) -> Self {
        Self {
            id:              id.into(),
            json_value:      payload.json_value,
            hash_json_value: payload.hash_json_value,
            created_at:      None,
        }
    }

    /// Stamps the record with a write timestamp.
    #[must_use]
    pub const fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}
