use std::{collections::HashSet, fmt, marker::PhantomData};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, trace};

use super::range::KeyRange;
use crate::{
    backing::Backing,
    batch::batched,
    codec::fold_fingerprint,
    cursor::{decode_key, Cursor},
    filter::{Filter, SortOrder},
    record::Record,
    KeelError,
    Result,
};

/// A key/value pair of a sorted map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry<V> {
    /// Map key
    pub key:   String,
    /// Value stored under the key
    pub value: V,
}

impl<V> Entry<V> {
    /// Creates an entry.
    pub fn new(key: impl Into<String>, value: V) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

pub(crate) fn decode_entry<V: DeserializeOwned>(backing: &Backing, record: &Record) -> Result<Entry<V>> {
    Ok(Entry {
        key:   decode_key(backing, record)?,
        value: backing.decode(record)?,
    })
}

fn fingerprint_pair(backing: &Backing, record: &Record) -> Result<(String, String)> {
    Ok((decode_key(backing, record)?, record.hash_json_value.clone()))
}

/// Sorted set over the key/value pairs of a map namespace, bounded by a [`KeyRange`].
///
/// An entry is a member when its key is present and the stored value has the same
/// fingerprint as the entry's value. Entries can only be created through the map, so `add`
/// is unsupported.
pub struct EntrySet<V> {
    backing: Backing,
    range:   KeyRange,
    marker:  PhantomData<fn() -> V>,
}

impl<V> Clone for EntrySet<V> {
    fn clone(&self) -> Self {
        Self {
            backing: self.backing.clone(),
            range:   self.range.clone(),
            marker:  PhantomData,
        }
    }
}

impl<V> fmt::Debug for EntrySet<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntrySet")
            .field("backing", &self.backing)
            .field("range", &self.range)
            .finish()
    }
}

impl<V> EntrySet<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    pub(crate) const fn new(backing: Backing, range: KeyRange) -> Self {
        Self {
            backing,
            range,
            marker: PhantomData,
        }
    }

    /// Bounds of this view.
    pub const fn range(&self) -> &KeyRange { &self.range }

    fn scope(&self) -> Filter { self.range.filter() }

    /// Store filter matching one entry: same key and same value fingerprint.
    fn pair_filter(key: &str, hash: String) -> Filter { Filter::key(key).and(Filter::HashEquals(hash)) }

    fn entry_filter(&self, entry: &Entry<V>, operation: &str) -> Result<Filter> {
        let hash = self.backing.codec.fingerprint(&entry.value, operation)?;
        Ok(Self::pair_filter(&entry.key, hash))
    }

    /// Distinct in-range pair filters, plus whether every entry was in range.
    fn pair_filters(&self, entries: &[Entry<V>], operation: &str) -> Result<(Vec<Filter>, bool)> {
        let mut seen = HashSet::new();
        let mut filters = Vec::new();
        let mut all_in_range = true;
        for entry in entries {
            if !self.range.contains(&entry.key) {
                all_in_range = false;
                continue;
            }
            let hash = self.backing.codec.fingerprint(&entry.value, operation)?;
            if seen.insert((entry.key.as_str(), hash.clone())) {
                filters.push(Self::pair_filter(&entry.key, hash));
            }
        }
        Ok((filters, all_in_range))
    }

    async fn extreme(&self, sort: SortOrder) -> Result<Option<Entry<V>>> {
        let record = self.backing.find_one(&self.scope(), sort).await?;
        record
            .map(|r| decode_entry(&self.backing, &r))
            .transpose()
    }

    /// Entry with the smallest key in range.
    pub async fn first(&self) -> Result<Option<Entry<V>>> { self.extreme(SortOrder::Ascending).await }

    /// Entry with the largest key in range.
    pub async fn last(&self) -> Result<Option<Entry<V>>> { self.extreme(SortOrder::Descending).await }

    /// Whether the map holds exactly this pair within range.
    pub async fn contains(&self, entry: &Entry<V>) -> Result<bool> {
        if !self.range.contains(&entry.key) {
            return Ok(false);
        }
        let filter = self.entry_filter(entry, "contains")?;
        self.backing.exists(&filter).await
    }

    /// Removes the pair when the map holds exactly it within range.
    pub async fn remove(&self, entry: &Entry<V>) -> Result<bool> {
        if !self.range.contains(&entry.key) {
            return Ok(false);
        }
        let filter = self.entry_filter(entry, "remove")?;
        Ok(self.backing.delete_many(&filter).await? > 0)
    }

    /// Unsupported: entries are created through the map's `put`.
    pub async fn add(&self, _entry: &Entry<V>) -> Result<bool> { Err(KeelError::unsupported("EntrySet::add")) }

    /// Unsupported: entries are created through the map's `put`.
    pub async fn add_all(&self, _entries: &[Entry<V>]) -> Result<bool> { Err(KeelError::unsupported("EntrySet::add_all")) }

    /// Whether every pair is in range and held by the map.
    pub async fn contains_all(&self, entries: &[Entry<V>]) -> Result<bool> {
        let (filters, all_in_range) = self.pair_filters(entries, "contains_all")?;
        if !all_in_range {
            return Ok(false);
        }
        if filters.is_empty() {
            return Ok(true);
        }
        let wanted = filters.len() as u64;
        let found = self
            .backing
            .count(&self.scope().and(Filter::Or(filters)))
            .await?;
        Ok(found == wanted)
    }

    /// Removes the listed pairs that lie in range.
    pub async fn remove_all(&self, entries: &[Entry<V>]) -> Result<bool> {
        let (filters, _) = self.pair_filters(entries, "remove_all")?;
        let mut deleted = 0u64;
        for batch in batched(filters, self.backing.config.batch_size) {
            let filter = self.scope().and(Filter::Or(batch));
            deleted = deleted.saturating_add(self.backing.delete_many(&filter).await?);
        }
        Ok(deleted > 0)
    }

    /// Removes every pair in range that is not listed.
    pub async fn retain_all(&self, entries: &[Entry<V>]) -> Result<bool> {
        let mut keep = Vec::with_capacity(entries.len());
        for entry in entries {
            keep.push(self.entry_filter(entry, "retain_all")?);
        }
        let deleted = self
            .backing
            .delete_many(&self.scope().and(Filter::Or(keep).not()))
            .await?;
        Ok(deleted > 0)
    }

    fn narrowed(&self, requested: &KeyRange) -> Self { Self::new(self.backing.clone(), self.range.intersect(requested)) }

    /// View over keys in `[from, to)` within this view.
    ///
    /// # Errors
    /// `KeelError::InvalidArgument` when `from` sorts after `to`.
    pub fn sub_set(&self, from: &str, to: &str) -> Result<Self> { Ok(self.narrowed(&KeyRange::new(Some(from), Some(to))?)) }

    /// View over the keys before `to` within this view.
    pub fn head_set(&self, to: &str) -> Self {
        self.narrowed(&KeyRange {
            from: None,
            to:   Some(to.to_owned()),
        })
    }

    /// View over the keys from `from` on within this view.
    pub fn tail_set(&self, from: &str) -> Self {
        self.narrowed(&KeyRange {
            from: Some(from.to_owned()),
            to:   None,
        })
    }

    /// Exact number of entries in range.
    pub async fn size(&self) -> Result<usize> {
        let count = self.backing.count(&self.scope()).await?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    /// Whether no entry lies in range.
    pub async fn is_empty(&self) -> Result<bool> { Ok(!self.backing.exists(&self.scope()).await?) }

    /// Removes every entry in range.
    pub async fn clear(&self) -> Result<()> {
        let deleted = self.backing.delete_many(&self.scope()).await?;
        debug!("Cleared {} entries of {} in {}", deleted, self.backing.namespace, self.range);
        Ok(())
    }

    /// Ascending cursor over the entries in range.
    pub fn iter(&self) -> Cursor<Entry<V>> {
        Cursor::new(
            self.backing.clone(),
            self.scope(),
            SortOrder::Ascending,
            decode_entry::<V>,
        )
    }

    /// Every entry in range, by ascending key.
    pub async fn to_vec(&self) -> Result<Vec<Entry<V>>> {
        let records = self
            .backing
            .find_all(&self.scope(), SortOrder::Ascending)
            .await?;
        records
            .iter()
            .map(|record| decode_entry(&self.backing, record))
            .collect()
    }

    /// Whether both views cover the same namespace and range. Never queries the store.
    pub fn same_view(&self, other: &Self) -> bool { self.range == other.range && self.backing.same_namespace(&other.backing) }

    /// Set equality with another view.
    pub async fn equals_set(&self, other: &Self) -> Result<bool> {
        if self.same_view(other) {
            return Ok(true);
        }
        let theirs = other.to_vec().await?;
        Ok(self.size().await? == theirs.len() && self.contains_all(&theirs).await?)
    }

    /// Order-independent hash of the entries in range, computed with a full scan.
    ///
    /// Each entry combines the fingerprints of its key and its value, so equal pairs hash
    /// equally in every process using the same algorithm.
    pub async fn hash_code(&self) -> Result<u64> {
        trace!("Hashing every entry of {} in {}", self.backing.namespace, self.range);
        let mut cursor = Cursor::new(
            self.backing.clone(),
            self.scope(),
            SortOrder::Ascending,
            fingerprint_pair,
        );
        let mut sum = 0u64;
        while let Some((key, fingerprint)) = cursor.next().await? {
            let key_fingerprint = self.backing.codec.key_fingerprint(&key)?;
            sum = sum.wrapping_add(fold_fingerprint(&key_fingerprint) ^ fold_fingerprint(&fingerprint));
        }
        Ok(sum)
    }
}
