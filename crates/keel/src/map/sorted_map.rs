use std::{fmt, marker::PhantomData, sync::Arc};

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, trace};

use crate::{
    backing::Backing,
    batch::for_each_batch,
    codec::{CanonicalJson, Serializer},
    config::CollectionConfig,
    filter::{Filter, SortOrder},
    record::Record,
    set::{entry_set::decode_entry, Entry, EntrySet, KeyRange, KeySet},
    store::{finish, DocumentOps as _, DocumentStore, IndexSpec},
    view::ValueCollection,
    KeelError,
    Result,
};

/// A string-keyed map sorted by key, shared through a document store namespace.
///
/// Every record is stamped with `created_at` on write. When the configuration sets
/// `expire_after_secs` a TTL index on that field lets the store expire entries in the
/// background, which makes the map usable as a shared cache. Expiry is not immediate: a
/// store sweeps periodically, so an expired entry may still be read for a while.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use keel_collections::{CollectionConfig, DocumentSortedMap, MemoryStore};
///
/// # async fn example() -> keel_collections::Result<()> {
/// let store = Arc::new(MemoryStore::new());
/// let owners = DocumentSortedMap::<String>::open(store, "owners", CollectionConfig::default()).await?;
///
/// owners.put("build", &"alice".to_owned()).await?;
/// let previous = owners.put("build", &"bob".to_owned()).await?;
/// assert_eq!(previous, Some("alice".to_owned()));
/// assert_eq!(owners.first_key().await?, Some("build".to_owned()));
/// # Ok(())
/// # }
/// ```
pub struct DocumentSortedMap<V> {
    backing: Backing,
    marker:  PhantomData<fn() -> V>,
}

impl<V> Clone for DocumentSortedMap<V> {
    fn clone(&self) -> Self {
        Self {
            backing: self.backing.clone(),
            marker:  PhantomData,
        }
    }
}

impl<V> fmt::Debug for DocumentSortedMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentSortedMap")
            .field("backing", &self.backing)
            .finish()
    }
}

impl<V> DocumentSortedMap<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    /// Opens a map over `namespace`, declaring the value lookup index and, when an expiry is
    /// configured, the TTL index.
    pub async fn open(store: Arc<dyn DocumentStore>, namespace: &str, config: CollectionConfig) -> Result<Self> {
        Self::open_with_serializer(store, namespace, config, Arc::new(CanonicalJson)).await
    }

    /// Opens a map whose values are encoded and compared through `serializer`.
    pub async fn open_with_serializer(
        store: Arc<dyn DocumentStore>,
        namespace: &str,
        config: CollectionConfig,
        serializer: Arc<dyn Serializer>,
    ) -> Result<Self> {
        let expire_after = config.expire_after();
        let backing = Backing::open(store, namespace, config, serializer).await?;
        if let Some(expire_after) = expire_after {
            backing
                .store
                .create_index(namespace, IndexSpec::created_at_ttl(expire_after))
                .await?;
            debug!("Map {} expires entries after {:?}", namespace, expire_after);
        }
        Ok(Self {
            backing,
            marker: PhantomData,
        })
    }

    /// The namespace holding the entries.
    pub fn namespace(&self) -> &str { self.backing.ns() }

    /// Value stored under `key`.
    ///
    /// A key inserted through [`KeySet::add`] has no value and reads as `None`.
    pub async fn get(&self, key: &str) -> Result<Option<V>> {
        trace!("Getting key {} from {}", key, self.backing.namespace);
        match self
            .backing
            .find_one(&Filter::key(key), SortOrder::Ascending)
            .await?
        {
            Some(record) => self.backing.decode_nullable(&record),
            None => Ok(None),
        }
    }

    /// Whether `key` is present.
    pub async fn contains_key(&self, key: &str) -> Result<bool> { self.backing.exists(&Filter::key(key)).await }

    /// Whether some key maps to a value equal to `value`.
    pub async fn contains_value(&self, value: &V) -> Result<bool> {
        let hash = self.backing.codec.fingerprint(value, "contains_value")?;
        self.backing.exists(&Filter::HashEquals(hash)).await
    }

    fn stamped(&self, key: &str, value: &V, operation: &str) -> Result<Record> {
        let payload = self.backing.codec.encode(value, operation)?;
        Ok(Record::new(key, payload).with_created_at(Utc::now()))
    }

    /// Stores `value` under `key`, returning the value it replaced.
    ///
    /// Always refreshes the entry's `created_at`, restarting its expiry.
    ///
    /// # Errors
    /// `KeelError::NullElement` for a null value.
    pub async fn put(&self, key: &str, value: &V) -> Result<Option<V>> {
        let record = self.stamped(key, value, "put")?;
        let previous = self
            .backing
            .store
            .replace_one(self.backing.ns(), record, true)
            .await?;
        debug!("Put key {} in {}", key, self.backing.namespace);
        match previous {
            Some(previous) => self.backing.decode_nullable(&previous),
            None => Ok(None),
        }
    }

    /// Removes `key`, returning its value.
    pub async fn remove(&self, key: &str) -> Result<Option<V>> {
        let removed = self
            .backing
            .store
            .find_one_and_delete(self.backing.ns(), &Filter::key(key), SortOrder::Ascending)
            .await?;
        match removed {
            Some(record) => {
                debug!("Removed key {} from {}", key, self.backing.namespace);
                self.backing.decode_nullable(&record)
            },
            None => Ok(None),
        }
    }

    async fn insert_batch(&self, batch: Vec<(String, V)>) -> Result<()> {
        let records = batch
            .iter()
            .map(|&(ref key, ref value)| self.stamped(key, value, "put_all"))
            .collect::<Result<Vec<_>>>()?;
        let txn = self.backing.store.begin().await?;
        let outcome = txn.insert_many(self.backing.ns(), records).await;
        finish(txn, outcome).await
    }

    /// Inserts every entry, one transaction per `batch_size` chunk.
    ///
    /// Entries are inserted, not upserted: a key that already exists fails its chunk with
    /// `KeelError::DuplicateKey`, and earlier chunks stay committed.
    pub async fn put_all<I>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, V)>,
    {
        let inserted = for_each_batch(entries, self.backing.config.batch_size, move |batch| {
            self.insert_batch(batch)
        })
        .await?;
        debug!("put_all inserted {} entries in {}", inserted, self.backing.namespace);
        Ok(())
    }

    /// Removes every entry.
    pub async fn clear(&self) -> Result<()> {
        self.clear_reporting().await?;
        Ok(())
    }

    /// Removes every entry; returns whether there was anything to remove.
    pub async fn clear_reporting(&self) -> Result<bool> {
        let deleted = self.backing.delete_many(&Filter::All).await?;
        debug!("Cleared {} entries from {}", deleted, self.backing.namespace);
        Ok(deleted > 0)
    }

    /// Smallest key.
    pub async fn first_key(&self) -> Result<Option<String>> { self.key_set().first().await }

    /// Largest key.
    pub async fn last_key(&self) -> Result<Option<String>> { self.key_set().last().await }

    async fn extreme_entry(&self, sort: SortOrder) -> Result<Option<Entry<V>>> {
        let record = self.backing.find_one(&Filter::All, sort).await?;
        record
            .map(|r| decode_entry(&self.backing, &r))
            .transpose()
    }

    /// Entry with the smallest key.
    pub async fn first_entry(&self) -> Result<Option<Entry<V>>> { self.extreme_entry(SortOrder::Ascending).await }

    /// Entry with the largest key.
    pub async fn last_entry(&self) -> Result<Option<Entry<V>>> { self.extreme_entry(SortOrder::Descending).await }

    /// Number of entries, from the store's fast estimate.
    pub async fn size(&self) -> Result<usize> {
        let count = self
            .backing
            .store
            .estimated_count(self.backing.ns())
            .await?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    /// Whether the map has no entry.
    pub async fn is_empty(&self) -> Result<bool> { Ok(!self.backing.exists(&Filter::All).await?) }

    /// Live sorted set over the keys.
    pub fn key_set(&self) -> KeySet { KeySet::new(self.backing.clone(), KeyRange::unbounded()) }

    /// Live view over the values.
    pub fn values(&self) -> ValueCollection<V> { ValueCollection::new(self.backing.clone()) }

    /// Live sorted set over the entries.
    pub fn entry_set(&self) -> EntrySet<V> { EntrySet::new(self.backing.clone(), KeyRange::unbounded()) }

    /// Unsupported: use [`Self::key_set`] or [`Self::entry_set`] with `sub_set`.
    pub fn sub_map(&self, _from: &str, _to: &str) -> Result<Self> { Err(KeelError::unsupported("sub_map")) }

    /// Unsupported: use [`Self::key_set`] or [`Self::entry_set`] with `head_set`.
    pub fn head_map(&self, _to: &str) -> Result<Self> { Err(KeelError::unsupported("head_map")) }

    /// Unsupported: use [`Self::key_set`] or [`Self::entry_set`] with `tail_set`.
    pub fn tail_map(&self, _from: &str) -> Result<Self> { Err(KeelError::unsupported("tail_map")) }
}
