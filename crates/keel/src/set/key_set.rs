use std::collections::{BTreeSet, HashSet};

use chrono::Utc;
use tracing::{debug, trace};

use super::range::KeyRange;
use crate::{
    backing::Backing,
    batch::batched,
    codec::fold_fingerprint,
    cursor::{decode_key, Cursor},
    filter::{Filter, SortOrder},
    record::{Record, RecordId},
    store::DocumentOps as _,
    KeelError,
    Result,
};

/// Sorted set over the keys of a map namespace, bounded by a [`KeyRange`].
///
/// A live view: it shares the namespace with the map that produced it, so changes made
/// through either are visible to both. Range narrowing (`sub_set` and friends) creates a new
/// view and never touches the store.
///
/// `hash_code` scans the whole range; do not use key sets as keys of hashed collections.
#[derive(Debug, Clone)]
pub struct KeySet {
    backing: Backing,
    range:   KeyRange,
}

fn distinct_in_range<'a, S: AsRef<str>>(range: &KeyRange, keys: &'a [S]) -> (Vec<&'a str>, bool) {
    let mut seen = HashSet::new();
    let mut in_range = Vec::new();
    let mut all_in_range = true;
    for key in keys.iter().map(AsRef::<str>::as_ref) {
        if !range.contains(key) {
            all_in_range = false;
            continue;
        }
        if seen.insert(key) {
            in_range.push(key);
        }
    }
    (in_range, all_in_range)
}

impl KeySet {
    pub(crate) const fn new(backing: Backing, range: KeyRange) -> Self {
        Self {
            backing,
            range,
        }
    }

    /// Bounds of this view.
    pub const fn range(&self) -> &KeyRange { &self.range }

    fn scope(&self) -> Filter { self.range.filter() }

    async fn extreme(&self, sort: SortOrder) -> Result<Option<String>> {
        let record = self.backing.find_one(&self.scope(), sort).await?;
        record.map(|r| decode_key(&self.backing, &r)).transpose()
    }

    /// Smallest key in range.
    pub async fn first(&self) -> Result<Option<String>> { self.extreme(SortOrder::Ascending).await }

    /// Largest key in range.
    pub async fn last(&self) -> Result<Option<String>> { self.extreme(SortOrder::Descending).await }

    /// Whether `key` is in range and present.
    pub async fn contains(&self, key: &str) -> Result<bool> {
        if !self.range.contains(key) {
            return Ok(false);
        }
        self.backing.exists(&Filter::key(key)).await
    }

    /// Removes `key` (and its map value); out-of-range keys are left alone.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        if !self.range.contains(key) {
            return Ok(false);
        }
        Ok(self.backing.delete_many(&Filter::key(key)).await? > 0)
    }

    /// Inserts `key` with a null value unless it is already present.
    ///
    /// # Errors
    /// `KeelError::KeyOutOfRange` when `key` lies outside this view.
    pub async fn add(&self, key: &str) -> Result<bool> {
        self.range.check(key)?;
        let payload = self.backing.codec.encode_nullable(&())?;
        let record = Record::new(key, payload).with_created_at(Utc::now());
        match self
            .backing
            .store
            .insert_many(self.backing.ns(), vec![record])
            .await
        {
            Ok(()) => {
                debug!("Added key {} to {}", key, self.backing.namespace);
                Ok(true)
            },
            Err(KeelError::DuplicateKey {
                ..
            }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Adds every key; returns whether any was inserted.
    pub async fn add_all<I, S>(&self, keys: I) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut changed = false;
        for key in keys {
            changed |= self.add(key.as_ref()).await?;
        }
        Ok(changed)
    }

    /// Whether every key is in range and present.
    pub async fn contains_all<S: AsRef<str>>(&self, keys: &[S]) -> Result<bool> {
        let (distinct, all_in_range) = distinct_in_range(&self.range, keys);
        if !all_in_range {
            return Ok(false);
        }
        if distinct.is_empty() {
            return Ok(true);
        }
        let found = self
            .backing
            .count(&self.scope().and(Filter::keys(distinct.iter().copied())))
            .await?;
        Ok(found == distinct.len() as u64)
    }

    /// Removes the listed keys that lie in range.
    pub async fn remove_all<S: AsRef<str>>(&self, keys: &[S]) -> Result<bool> {
        let (distinct, _) = distinct_in_range(&self.range, keys);
        let mut deleted = 0u64;
        for batch in batched(distinct, self.backing.config.batch_size) {
            let filter = self.scope().and(Filter::keys(batch));
            deleted = deleted.saturating_add(self.backing.delete_many(&filter).await?);
        }
        Ok(deleted > 0)
    }

    /// Removes every key in range that is not listed.
    pub async fn retain_all<S: AsRef<str>>(&self, keys: &[S]) -> Result<bool> {
        let keep = Filter::keys(keys.iter().map(AsRef::<str>::as_ref));
        let deleted = self
            .backing
            .delete_many(&self.scope().and(keep.not()))
            .await?;
        Ok(deleted > 0)
    }

    fn narrowed(&self, requested: &KeyRange) -> Self { Self::new(self.backing.clone(), self.range.intersect(requested)) }

    /// View over `[from, to)` within this view.
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

    /// Exact number of keys in range.
    pub async fn size(&self) -> Result<usize> {
        let count = self.backing.count(&self.scope()).await?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    /// Whether no key lies in range.
    pub async fn is_empty(&self) -> Result<bool> { Ok(!self.backing.exists(&self.scope()).await?) }

    /// Removes every key in range.
    pub async fn clear(&self) -> Result<()> {
        let deleted = self.backing.delete_many(&self.scope()).await?;
        debug!("Cleared {} keys of {} in {}", deleted, self.backing.namespace, self.range);
        Ok(())
    }

    /// Ascending cursor over the keys in range.
    pub fn iter(&self) -> Cursor<String> { Cursor::new(self.backing.clone(), self.scope(), SortOrder::Ascending, decode_key) }

    /// Every key in range, ascending.
    pub async fn to_vec(&self) -> Result<Vec<String>> {
        let records = self
            .backing
            .find_all(&self.scope(), SortOrder::Ascending)
            .await?;
        Ok(records
            .into_iter()
            .filter_map(|record| {
                match record.id {
                    RecordId::Str(key) => Some(key),
                    RecordId::Int(_) => None,
                }
            })
            .collect())
    }

    /// Whether both views cover the same namespace and range. Never queries the store.
    pub fn same_view(&self, other: &Self) -> bool { self.range == other.range && self.backing.same_namespace(&other.backing) }

    /// Set equality with another view.
    pub async fn equals_set(&self, other: &Self) -> Result<bool> {
        if self.same_view(other) {
            return Ok(true);
        }
        let theirs = other.to_vec().await?;
        Ok(self.size().await? == theirs.len() && self.contains_all(theirs.as_slice()).await?)
    }

    /// Set equality with a local set of keys.
    pub async fn equals_keys(&self, keys: &BTreeSet<String>) -> Result<bool> {
        let keys: Vec<&String> = keys.iter().collect();
        Ok(self.size().await? == keys.len() && self.contains_all(keys.as_slice()).await?)
    }

    /// Order-independent hash of the keys in range, computed with a full scan.
    ///
    /// Built from key fingerprints, so it agrees across processes using the same algorithm.
    pub async fn hash_code(&self) -> Result<u64> {
        trace!("Hashing every key of {} in {}", self.backing.namespace, self.range);
        let mut cursor = self.iter();
        let mut sum = 0u64;
        while let Some(key) = cursor.next().await? {
            let fingerprint = self.backing.codec.key_fingerprint(&key)?;
            sum = sum.wrapping_add(fold_fingerprint(&fingerprint));
        }
        Ok(sum)
    }
}
