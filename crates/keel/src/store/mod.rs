//! The contract Keel expects from a shared document store.
//!
//! A store offers unique-keyed documents grouped into namespaces, sorted range queries,
//! atomic find-and-delete, multi-document transactions, a change feed that reports *that*
//! something changed (never payloads), TTL expiry and counts. Adapters only talk to a store
//! through these traits, so any backend that honours them (a replicated document database,
//! or the bundled [`MemoryStore`]) can carry the collections.

use std::{fmt, pin::Pin, time::Duration};

use async_trait::async_trait;
use tokio_stream::Stream;
use tracing::error;

use crate::{
    constants::{CREATED_AT_FIELD, HASH_JSON_VALUE_FIELD, ID_FIELD},
    filter::{Filter, FindOptions, SortOrder},
    record::{Record, RecordId},
    Result,
};

/// In-memory store implementation.
pub mod memory;
#[cfg(test)]
/// Store tests.
mod tests;

pub use memory::{MemoryStore, MemoryTransaction};

/// Kind of change reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// A record was inserted
    Insert,
    /// A record was replaced in place
    Replace,
    /// A record was deleted
    Delete,
}

/// Notification that a record in a namespace changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Namespace of the changed record
    pub namespace: String,
    /// What happened
    pub kind:      ChangeKind,
    /// Id of the changed record; `None` when the feed lost track of events and reports a
    /// catch-all change instead
    pub id:        Option<RecordId>,
}

/// Stream of change notifications for one namespace.
pub type ChangeStream = Pin<Box<dyn Stream<Item = Result<ChangeEvent>> + Send>>;

/// Index declarations the adapters rely on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSpec {
    /// Compound ascending index over the listed fields
    Compound {
        /// Indexed fields, in order
        fields: Vec<String>,
    },
    /// Expire records once `field` is older than `expire_after`
    Ttl {
        /// Timestamp field
        field:        String,
        /// Record lifetime
        expire_after: Duration,
    },
}

impl IndexSpec {
    /// The `(hash_json_value, _id)` index every adapter declares for value lookups.
    pub fn hash_and_id() -> Self {
        Self::Compound {
            fields: vec![HASH_JSON_VALUE_FIELD.to_owned(), ID_FIELD.to_owned()],
        }
    }

    /// TTL index over `created_at`.
    pub fn created_at_ttl(expire_after: Duration) -> Self {
        Self::Ttl {
            field: CREATED_AT_FIELD.to_owned(),
            expire_after,
        }
    }

    /// Stable index name, used to make index creation idempotent.
    pub fn name(&self) -> String {
        match *self {
            Self::Compound {
                ref fields,
            } => format!("{}_1", fields.join("_1_")),
            Self::Ttl {
                ref field, ..
            } => format!("{field}_ttl"),
        }
    }
}

/// Document operations available both directly on a store and inside a transaction.
#[async_trait]
pub trait DocumentOps: Send + Sync {
    /// Records matching `filter`, sorted by `_id`, up to `options.limit`.
    async fn find(&self, namespace: &str, filter: &Filter, options: &FindOptions) -> Result<Vec<Record>>;

    /// First record matching `filter` in the given order.
    async fn find_one(&self, namespace: &str, filter: &Filter, sort: SortOrder) -> Result<Option<Record>> {
        let options = FindOptions::sorted(sort).with_limit(1);
        Ok(self
            .find(namespace, filter, &options)
            .await?
            .into_iter()
            .next())
    }

    /// Inserts records in order; a duplicate `_id` fails with `KeelError::DuplicateKey`.
    async fn insert_many(&self, namespace: &str, records: Vec<Record>) -> Result<()>;

    /// Replaces the record with the same `_id`, inserting it when `upsert` is set and none
    /// exists. Returns the replaced record.
    async fn replace_one(&self, namespace: &str, record: Record, upsert: bool) -> Result<Option<Record>>;

    /// Atomically deletes and returns the first record matching `filter` in the given order.
    async fn find_one_and_delete(&self, namespace: &str, filter: &Filter, sort: SortOrder) -> Result<Option<Record>>;

    /// Deletes every record matching `filter`; returns how many were deleted.
    async fn delete_many(&self, namespace: &str, filter: &Filter) -> Result<u64>;

    /// Exact number of records matching `filter`.
    async fn count(&self, namespace: &str, filter: &Filter) -> Result<u64>;
}

/// A shared document store.
#[async_trait]
pub trait DocumentStore: DocumentOps + fmt::Debug {
    /// Starts a multi-document transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;

    /// Declares an index; declaring an existing index again is a no-op.
    async fn create_index(&self, namespace: &str, index: IndexSpec) -> Result<()>;

    /// Fast, possibly stale, record count.
    async fn estimated_count(&self, namespace: &str) -> Result<u64>;

    /// Identity of the data behind this handle; handles sharing data report the same id.
    fn store_id(&self) -> String;

    /// Opens a change feed over `namespace` restricted to `kinds`.
    fn watch(&self, namespace: &str, kinds: &[ChangeKind]) -> Result<ChangeStream>;
}

/// An open multi-document transaction.
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait StoreTransaction: DocumentOps {
    /// Makes every change of the transaction visible atomically.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discards every change of the transaction.
    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Commits `txn` when `outcome` succeeded, aborts it otherwise.
///
/// An abort failure is logged and the original error returned.
pub async fn finish<T>(txn: Box<dyn StoreTransaction>, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        },
        Err(err) => {
            if let Err(abort_err) = txn.abort().await {
                error!("Failed to abort transaction after '{}': {}", err, abort_err);
            }
            Err(err)
        },
    }
}
