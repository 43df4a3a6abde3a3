//! Live view over the values of a sorted map.

use std::{fmt, marker::PhantomData};

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::{
    backing::Backing,
    cursor::{decode_value, Cursor},
    filter::{Filter, SortOrder},
    store::DocumentOps as _,
    KeelError,
    Result,
};

/// The values of a map, looked up by fingerprint.
///
/// Values cannot be added without a key, so `add` and `add_all` are unsupported.
pub struct ValueCollection<V> {
    backing: Backing,
    marker:  PhantomData<fn() -> V>,
}

impl<V> Clone for ValueCollection<V> {
    fn clone(&self) -> Self {
        Self {
            backing: self.backing.clone(),
            marker:  PhantomData,
        }
    }
}

impl<V> fmt::Debug for ValueCollection<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueCollection")
            .field("backing", &self.backing)
            .finish()
    }
}

impl<V> ValueCollection<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    pub(crate) const fn new(backing: Backing) -> Self {
        Self {
            backing,
            marker: PhantomData,
        }
    }

    /// Whether some key maps to a value equal to `value`.
    pub async fn contains(&self, value: &V) -> Result<bool> {
        let hash = self.backing.codec.fingerprint(value, "contains")?;
        self.backing.exists(&Filter::HashEquals(hash)).await
    }

    /// Removes one entry (the smallest key) whose value equals `value`.
    pub async fn remove(&self, value: &V) -> Result<bool> {
        let hash = self.backing.codec.fingerprint(value, "remove")?;
        let removed = self
            .backing
            .store
            .find_one_and_delete(self.backing.ns(), &Filter::HashEquals(hash), SortOrder::Ascending)
            .await?;
        if let Some(ref record) = removed {
            debug!("Removed value under key {} from {}", record.id, self.backing.namespace);
        }
        Ok(removed.is_some())
    }

    /// Whether every listed value is present.
    pub async fn contains_all(&self, values: &[V]) -> Result<bool> {
        let hashes = self.backing.codec.fingerprints(values, "contains_all")?;
        self.backing
            .contains_all_hashes(&Filter::All, hashes)
            .await
    }

    /// Removes every entry whose value is listed.
    pub async fn remove_all(&self, values: &[V]) -> Result<bool> {
        let hashes = self.backing.codec.fingerprints(values, "remove_all")?;
        self.backing.remove_hashes(&Filter::All, hashes).await
    }

    /// Removes every entry whose value is not listed.
    pub async fn retain_all(&self, values: &[V]) -> Result<bool> {
        let hashes = self.backing.codec.fingerprints(values, "retain_all")?;
        self.backing.retain_hashes(&Filter::All, hashes).await
    }

    /// Unsupported: a value needs a key.
    pub async fn add(&self, _value: &V) -> Result<bool> { Err(KeelError::unsupported("ValueCollection::add")) }

    /// Unsupported: a value needs a key.
    pub async fn add_all(&self, _values: &[V]) -> Result<bool> { Err(KeelError::unsupported("ValueCollection::add_all")) }

    /// Number of values, from the store's fast estimate.
    pub async fn size(&self) -> Result<usize> {
        let count = self
            .backing
            .store
            .estimated_count(self.backing.ns())
            .await?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    /// Whether the map is empty.
    pub async fn is_empty(&self) -> Result<bool> { Ok(!self.backing.exists(&Filter::All).await?) }

    /// Removes every entry of the map.
    pub async fn clear(&self) -> Result<()> {
        self.backing.delete_many(&Filter::All).await?;
        Ok(())
    }

    /// Cursor over the values, by ascending key.
    pub fn iter(&self) -> Cursor<V> {
        Cursor::new(
            self.backing.clone(),
            Filter::All,
            SortOrder::Ascending,
            decode_value::<V>,
        )
    }

    /// Every value, by ascending key.
    pub async fn to_vec(&self) -> Result<Vec<V>> {
        let records = self
            .backing
            .find_all(&Filter::All, SortOrder::Ascending)
            .await?;
        records
            .iter()
            .map(|record| self.backing.decode(record))
            .collect()
    }
}
