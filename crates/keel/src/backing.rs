//! State shared by every adapter over one namespace.

use std::{fmt, sync::Arc};

use keel_crypto::get_global_crypto_config;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::{
    batch::batched,
    codec::{RecordCodec, Serializer, NULL_JSON},
    config::CollectionConfig,
    filter::{Filter, FindOptions, SortOrder},
    record::Record,
    store::{DocumentOps as _, DocumentStore, IndexSpec},
    Result,
};

/// Store handle, namespace, codec and configuration of one logical collection.
#[derive(Clone)]
pub(crate) struct Backing {
    pub store:     Arc<dyn DocumentStore>,
    pub namespace: Arc<str>,
    pub codec:     RecordCodec,
    pub config:    CollectionConfig,
}

impl fmt::Debug for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backing")
            .field("namespace", &self.namespace)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl Backing {
    /// Validates the configuration and declares the value lookup index.
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        namespace: &str,
        config: CollectionConfig,
        serializer: Arc<dyn Serializer>,
    ) -> Result<Self> {
        trace!("Opening namespace {} with serializer {:?}", namespace, serializer);
        config.validate()?;
        let algorithm = config
            .hash_algorithm
            .unwrap_or_else(|| get_global_crypto_config().hash_algorithm);
        let codec = RecordCodec::new(serializer, algorithm);
        store
            .create_index(namespace, IndexSpec::hash_and_id())
            .await?;
        debug!("Namespace {} ready", namespace);
        Ok(Self {
            store,
            namespace: Arc::from(namespace),
            codec,
            config,
        })
    }

    pub fn ns(&self) -> &str { &self.namespace }

    /// Whether both handles talk to the same store, so one transaction can span them.
    pub fn same_store(&self, other: &Self) -> bool { self.store.store_id() == other.store.store_id() }

    /// Whether both handles address the same data.
    pub fn same_namespace(&self, other: &Self) -> bool { self.namespace == other.namespace && self.same_store(other) }

    pub fn decode<T: DeserializeOwned>(&self, record: &Record) -> Result<T> { self.codec.decode(record) }

    /// Decodes a payload, mapping a stored null to `None`.
    pub fn decode_nullable<T: DeserializeOwned>(&self, record: &Record) -> Result<Option<T>> {
        if record.json_value == NULL_JSON {
            return Ok(None);
        }
        self.codec.decode(record).map(Some)
    }

    pub async fn find_one(&self, filter: &Filter, sort: SortOrder) -> Result<Option<Record>> {
        self.store.find_one(self.ns(), filter, sort).await
    }

    pub async fn find_all(&self, filter: &Filter, sort: SortOrder) -> Result<Vec<Record>> {
        self.store
            .find(self.ns(), filter, &FindOptions::sorted(sort))
            .await
    }

    pub async fn exists(&self, filter: &Filter) -> Result<bool> { Ok(self.find_one(filter, SortOrder::Ascending).await?.is_some()) }

    pub async fn count(&self, filter: &Filter) -> Result<u64> { self.store.count(self.ns(), filter).await }

    pub async fn delete_many(&self, filter: &Filter) -> Result<u64> { self.store.delete_many(self.ns(), filter).await }

    /// Whether every fingerprint has at least one record in `scope`.
    ///
    /// Checked per distinct fingerprint, so duplicate elements in the store cannot make up for
    /// a missing one.
    pub async fn contains_all_hashes(&self, scope: &Filter, hashes: Vec<String>) -> Result<bool> {
        for hash in hashes {
            let filter = scope.clone().and(Filter::HashEquals(hash));
            if !self.exists(&filter).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Deletes records in `scope` whose fingerprint is listed, one `delete_many` per batch.
    pub async fn remove_hashes(&self, scope: &Filter, hashes: Vec<String>) -> Result<bool> {
        let mut deleted = 0u64;
        for batch in batched(hashes, self.config.batch_size) {
            let filter = scope.clone().and(Filter::HashIn(batch));
            deleted = deleted.saturating_add(self.delete_many(&filter).await?);
        }
        debug!("Removed {} records from {}", deleted, self.namespace);
        Ok(deleted > 0)
    }

    /// Deletes records in `scope` whose fingerprint is not listed.
    pub async fn retain_hashes(&self, scope: &Filter, hashes: Vec<String>) -> Result<bool> {
        let filter = scope.clone().and(Filter::HashIn(hashes).not());
        let deleted = self.delete_many(&filter).await?;
        debug!("Retain removed {} records from {}", deleted, self.namespace);
        Ok(deleted > 0)
    }
}
