use std::{fmt, marker::PhantomData, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, trace};

use crate::{
    backing::Backing,
    codec::{CanonicalJson, Payload, Serializer},
    config::CollectionConfig,
    constants::INITIAL_DEQUE_ID,
    cursor::{decode_value, Cursor},
    filter::{Filter, FindOptions, SortOrder},
    record::Record,
    retry::retry_with_backoff,
    store::{finish, ChangeKind, DocumentOps, DocumentStore},
    waiter::ChangeWaiter,
    KeelError,
    Result,
};

/// One end of the deque.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum End {
    Head,
    Tail,
}

impl End {
    /// Sort order listing this end's record first.
    pub(crate) const fn sort(self) -> SortOrder {
        match self {
            Self::Head => SortOrder::Ascending,
            Self::Tail => SortOrder::Descending,
        }
    }

    /// Id of a new record placed past `extreme` on this end.
    pub(crate) const fn beyond(self, extreme: i64) -> Option<i64> {
        match self {
            Self::Head => extreme.checked_sub(1),
            Self::Tail => extreme.checked_add(1),
        }
    }
}

/// A double-ended queue shared through a document store namespace.
///
/// Records are keyed by a signed integer id; the smallest id is the head and the largest the
/// tail. Offers read the current extreme and insert past it inside one store transaction,
/// retried with random backoff when a concurrent writer wins the race. Polls use the store's
/// atomic find-and-delete, so two handles never receive the same element.
///
/// Any number of handles, in any number of processes, may share a namespace.
///
/// # Example
///
/// ```rust
/// use std::{sync::Arc, time::Duration};
///
/// use keel_collections::{CollectionConfig, DocumentDeque, MemoryStore};
///
/// # async fn example() -> keel_collections::Result<()> {
/// let store = Arc::new(MemoryStore::new());
/// let deque = DocumentDeque::<u32>::open(store, "numbers", CollectionConfig::default()).await?;
///
/// deque.offer_last(&1).await?;
/// deque.offer_first(&0).await?;
/// assert_eq!(deque.peek_last().await?, Some(1));
/// assert_eq!(deque.poll_first_timeout(Duration::from_millis(10)).await?, Some(0));
/// # Ok(())
/// # }
/// ```
pub struct DocumentDeque<T> {
    pub(crate) backing: Backing,
    pub(crate) waiter:  ChangeWaiter,
    marker:             PhantomData<fn() -> T>,
}

impl<T> Clone for DocumentDeque<T> {
    fn clone(&self) -> Self {
        Self {
            backing: self.backing.clone(),
            waiter:  self.waiter.clone(),
            marker:  PhantomData,
        }
    }
}

impl<T> fmt::Debug for DocumentDeque<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentDeque")
            .field("backing", &self.backing)
            .field("waiter", &self.waiter)
            .finish()
    }
}

impl<T> DocumentDeque<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Opens a deque over `namespace`, declaring the value lookup index.
    ///
    /// # Errors
    /// `KeelError::ConfigError` for an invalid configuration, or the store's error when the
    /// index cannot be created.
    pub async fn open(store: Arc<dyn DocumentStore>, namespace: &str, config: CollectionConfig) -> Result<Self> {
        Self::open_with_serializer(store, namespace, config, Arc::new(CanonicalJson)).await
    }

    /// Opens a deque whose elements are encoded and compared through `serializer`.
    ///
    /// Every handle on the namespace has to use an equivalent serializer, or equal values stop
    /// matching each other.
    pub async fn open_with_serializer(
        store: Arc<dyn DocumentStore>,
        namespace: &str,
        config: CollectionConfig,
        serializer: Arc<dyn Serializer>,
    ) -> Result<Self> {
        let idle = config.change_stream_idle();
        let backing = Backing::open(Arc::clone(&store), namespace, config, serializer).await?;
        let waiter = ChangeWaiter::new(store, namespace, vec![ChangeKind::Insert], idle);
        debug!("Deque {} opened", namespace);
        Ok(Self {
            backing,
            waiter,
            marker: PhantomData,
        })
    }

    /// The namespace holding the elements.
    pub fn namespace(&self) -> &str { self.backing.ns() }

    /// The waiter used by blocking polls.
    pub const fn waiter(&self) -> &ChangeWaiter { &self.waiter }

    /// Id past the current extreme on `end`, read through `ops`.
    pub(crate) async fn next_id<O: DocumentOps + ?Sized>(&self, ops: &O, end: End) -> Result<i64> {
        let extreme = ops
            .find_one(self.backing.ns(), &Filter::All, end.sort())
            .await?;
        let Some(record) = extreme
        else {
            return Ok(INITIAL_DEQUE_ID);
        };
        let id = record.id.as_int().ok_or_else(|| {
            KeelError::Internal {
                message: format!("non-integer id {} in deque {}", record.id, self.backing.namespace),
            }
        })?;
        end.beyond(id).ok_or_else(|| {
            KeelError::IllegalState {
                reason: format!("deque {} ran out of ids past {}", self.backing.namespace, id),
            }
        })
    }

    async fn insert_in<O: DocumentOps + ?Sized>(&self, ops: &O, end: End, payload: &Payload) -> Result<i64> {
        let id = self.next_id(ops, end).await?;
        ops.insert_many(self.backing.ns(), vec![Record::new(id, payload.clone())])
            .await?;
        Ok(id)
    }

    async fn insert_once(&self, end: End, payload: &Payload) -> Result<i64> {
        let txn = self.backing.store.begin().await?;
        let outcome = self.insert_in(&*txn, end, payload).await;
        finish(txn, outcome).await
    }

    pub(crate) async fn offer_at(&self, end: End, value: &T, operation: &str) -> Result<bool> {
        trace!("{} on deque {}", operation, self.backing.namespace);
        let payload = self.backing.codec.encode(value, operation)?;
        let payload = &payload;
        let id = retry_with_backoff(&self.backing.config.offer_retry, operation, move || {
            self.insert_once(end, payload)
        })
        .await?;
        debug!("{} stored id {} in deque {}", operation, id, self.backing.namespace);
        Ok(true)
    }

    /// Inserts at the head.
    ///
    /// # Errors
    /// `KeelError::NullElement` for a null value; `KeelError::RetriesExhausted` when every
    /// attempt lost a race against concurrent writers.
    pub async fn offer_first(&self, value: &T) -> Result<bool> { self.offer_at(End::Head, value, "offer_first").await }

    /// Inserts at the tail.
    ///
    /// # Errors
    /// Same as [`Self::offer_first`].
    pub async fn offer_last(&self, value: &T) -> Result<bool> { self.offer_at(End::Tail, value, "offer_last").await }

    /// Inserts at the head.
    pub async fn add_first(&self, value: &T) -> Result<()> {
        self.offer_at(End::Head, value, "add_first").await?;
        Ok(())
    }

    /// Inserts at the tail.
    pub async fn add_last(&self, value: &T) -> Result<()> {
        self.offer_at(End::Tail, value, "add_last").await?;
        Ok(())
    }

    /// Same as [`Self::add_last`].
    pub async fn add(&self, value: &T) -> Result<bool> { self.offer_at(End::Tail, value, "add").await }

    /// Same as [`Self::offer_last`].
    pub async fn offer(&self, value: &T) -> Result<bool> { self.offer_at(End::Tail, value, "offer").await }

    /// Same as [`Self::offer_last`]; the deque is unbounded so this never waits.
    pub async fn put(&self, value: &T) -> Result<()> {
        self.offer_at(End::Tail, value, "put").await?;
        Ok(())
    }

    /// Stack push: same as [`Self::add_first`].
    pub async fn push(&self, value: &T) -> Result<()> {
        self.offer_at(End::Head, value, "push").await?;
        Ok(())
    }

    async fn peek_at(&self, end: End) -> Result<Option<T>> {
        let record = self.backing.find_one(&Filter::All, end.sort()).await?;
        record.map(|r| self.backing.decode(&r)).transpose()
    }

    /// The head element, if any.
    pub async fn peek_first(&self) -> Result<Option<T>> { self.peek_at(End::Head).await }

    /// The tail element, if any.
    pub async fn peek_last(&self) -> Result<Option<T>> { self.peek_at(End::Tail).await }

    /// Same as [`Self::peek_first`].
    pub async fn peek(&self) -> Result<Option<T>> { self.peek_at(End::Head).await }

    fn no_such_element(&self) -> KeelError {
        KeelError::NoSuchElement {
            namespace: self.backing.namespace.to_string(),
        }
    }

    /// The head element.
    ///
    /// # Errors
    /// `KeelError::NoSuchElement` when the deque is empty.
    pub async fn get_first(&self) -> Result<T> { self.peek_at(End::Head).await?.ok_or_else(|| self.no_such_element()) }

    /// The tail element.
    ///
    /// # Errors
    /// `KeelError::NoSuchElement` when the deque is empty.
    pub async fn get_last(&self) -> Result<T> { self.peek_at(End::Tail).await?.ok_or_else(|| self.no_such_element()) }

    /// Same as [`Self::get_first`].
    pub async fn element(&self) -> Result<T> { self.get_first().await }

    pub(crate) async fn poll_at(&self, end: End) -> Result<Option<T>> {
        let record = self
            .backing
            .store
            .find_one_and_delete(self.backing.ns(), &Filter::All, end.sort())
            .await?;
        match record {
            Some(record) => {
                trace!("Polled id {} from deque {}", record.id, self.backing.namespace);
                self.backing.decode(&record).map(Some)
            },
            None => Ok(None),
        }
    }

    /// Removes and returns the head element, if any.
    pub async fn poll_first(&self) -> Result<Option<T>> { self.poll_at(End::Head).await }

    /// Removes and returns the tail element, if any.
    pub async fn poll_last(&self) -> Result<Option<T>> { self.poll_at(End::Tail).await }

    /// Same as [`Self::poll_first`].
    pub async fn poll(&self) -> Result<Option<T>> { self.poll_at(End::Head).await }

    /// Removes and returns the head element.
    ///
    /// # Errors
    /// `KeelError::NoSuchElement` when the deque is empty.
    pub async fn remove_first(&self) -> Result<T> { self.poll_at(End::Head).await?.ok_or_else(|| self.no_such_element()) }

    /// Removes and returns the tail element.
    ///
    /// # Errors
    /// `KeelError::NoSuchElement` when the deque is empty.
    pub async fn remove_last(&self) -> Result<T> { self.poll_at(End::Tail).await?.ok_or_else(|| self.no_such_element()) }

    /// Same as [`Self::remove_first`].
    pub async fn remove(&self) -> Result<T> { self.remove_first().await }

    /// Stack pop: same as [`Self::remove_first`].
    pub async fn pop(&self) -> Result<T> { self.remove_first().await }

    /// Whether an element equal to `value` is stored.
    pub async fn contains(&self, value: &T) -> Result<bool> {
        let hash = self.backing.codec.fingerprint(value, "contains")?;
        self.backing.exists(&Filter::HashEquals(hash)).await
    }

    /// Whether every listed value is stored.
    pub async fn contains_all(&self, values: &[T]) -> Result<bool> {
        let hashes = self.backing.codec.fingerprints(values, "contains_all")?;
        self.backing
            .contains_all_hashes(&Filter::All, hashes)
            .await
    }

    async fn remove_occurrence(&self, end: End, value: &T, operation: &str) -> Result<bool> {
        let hash = self.backing.codec.fingerprint(value, operation)?;
        let txn = self.backing.store.begin().await?;
        let outcome = txn
            .find_one_and_delete(self.backing.ns(), &Filter::HashEquals(hash), end.sort())
            .await;
        let removed = finish(txn, outcome).await?.is_some();
        if removed {
            debug!("{} removed an element from deque {}", operation, self.backing.namespace);
        }
        Ok(removed)
    }

    /// Removes the element equal to `value` closest to the head.
    pub async fn remove_first_occurrence(&self, value: &T) -> Result<bool> {
        self.remove_occurrence(End::Head, value, "remove_first_occurrence")
            .await
    }

    /// Removes the element equal to `value` closest to the tail.
    pub async fn remove_last_occurrence(&self, value: &T) -> Result<bool> {
        self.remove_occurrence(End::Tail, value, "remove_last_occurrence")
            .await
    }

    /// Same as [`Self::remove_first_occurrence`].
    pub async fn remove_value(&self, value: &T) -> Result<bool> { self.remove_occurrence(End::Head, value, "remove_value").await }

    /// Head-to-tail cursor.
    pub fn iter(&self) -> Cursor<T> {
        Cursor::new(
            self.backing.clone(),
            Filter::All,
            SortOrder::Ascending,
            decode_value::<T>,
        )
    }

    /// Tail-to-head cursor.
    pub fn descending_iter(&self) -> Cursor<T> {
        Cursor::new(
            self.backing.clone(),
            Filter::All,
            SortOrder::Descending,
            decode_value::<T>,
        )
    }

    /// Number of elements, from the store's fast estimate.
    pub async fn size(&self) -> Result<usize> {
        let count = self
            .backing
            .store
            .estimated_count(self.backing.ns())
            .await?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    /// Whether the deque holds no element.
    pub async fn is_empty(&self) -> Result<bool> { Ok(!self.backing.exists(&Filter::All).await?) }

    /// Removes every element.
    pub async fn clear(&self) -> Result<()> {
        let deleted = self.backing.delete_many(&Filter::All).await?;
        debug!("Cleared {} elements from deque {}", deleted, self.backing.namespace);
        Ok(())
    }

    /// Every element, head to tail.
    pub async fn to_vec(&self) -> Result<Vec<T>> {
        let records = self
            .backing
            .store
            .find(self.backing.ns(), &Filter::All, &FindOptions::default())
            .await?;
        records
            .iter()
            .map(|record| self.backing.decode(record))
            .collect()
    }

    /// The deque is unbounded.
    pub const fn remaining_capacity(&self) -> usize { usize::MAX }
}
