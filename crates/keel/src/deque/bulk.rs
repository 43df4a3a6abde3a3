use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, trace, warn};

use super::handle::{DocumentDeque, End};
use crate::{
    batch::for_each_batch,
    codec::Payload,
    filter::{Filter, FindOptions, SortOrder},
    record::Record,
    retry::retry_with_backoff,
    store::{finish, DocumentOps},
    KeelError,
    Result,
};

impl<T> DocumentDeque<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Inserts `payloads` as one contiguous run past the `end` extreme, keeping their order.
    async fn insert_run_in<O: DocumentOps + ?Sized>(&self, ops: &O, end: End, payloads: &[Payload]) -> Result<()> {
        let nearest = self.next_id(ops, end).await?;
        let span = i64::try_from(payloads.len().saturating_sub(1)).unwrap_or(i64::MAX);
        let first = match end {
            End::Tail => Some(nearest),
            End::Head => nearest.checked_sub(span),
        };
        let mut records = Vec::with_capacity(payloads.len());
        for (offset, payload) in (0i64 ..).zip(payloads) {
            let id = first
                .and_then(|first| first.checked_add(offset))
                .ok_or_else(|| {
                    KeelError::IllegalState {
                        reason: format!("deque {} ran out of ids past {}", self.backing.namespace, nearest),
                    }
                })?;
            records.push(Record::new(id, payload.clone()));
        }
        ops.insert_many(self.backing.ns(), records).await
    }

    async fn insert_run_once(&self, end: End, payloads: &[Payload]) -> Result<()> {
        let txn = self.backing.store.begin().await?;
        let outcome = self.insert_run_in(&*txn, end, payloads).await;
        finish(txn, outcome).await
    }

    fn encode_all(&self, values: &[T], operation: &str) -> Result<Vec<Payload>> {
        values
            .iter()
            .map(|value| self.backing.codec.encode(value, operation))
            .collect()
    }

    /// Appends one chunk at the tail in a single transaction.
    pub(crate) async fn append_batch(&self, batch: Vec<T>) -> Result<()> {
        let payloads = self.encode_all(&batch, "add_all")?;
        let payloads = payloads.as_slice();
        retry_with_backoff(&self.backing.config.offer_retry, "add_all", move || {
            self.insert_run_once(End::Tail, payloads)
        })
        .await
    }

    /// Appends every value at the tail, one transaction per `batch_size` chunk.
    ///
    /// Returns whether anything was added. A failing chunk (a null value, exhausted retries)
    /// stops the operation; earlier chunks stay committed.
    pub async fn add_all<I>(&self, values: I) -> Result<bool>
    where
        I: IntoIterator<Item = T>,
    {
        trace!("add_all on deque {}", self.backing.namespace);
        let added = for_each_batch(values, self.backing.config.batch_size, move |batch| {
            self.append_batch(batch)
        })
        .await?;
        debug!("add_all appended {} elements to deque {}", added, self.backing.namespace);
        Ok(added > 0)
    }

    async fn take_in<O: DocumentOps + ?Sized>(&self, ops: &O, limit: usize) -> Result<Vec<T>> {
        let options = FindOptions::sorted(SortOrder::Ascending).with_limit(limit);
        let records = ops
            .find(self.backing.ns(), &Filter::All, &options)
            .await?;
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let values = records
            .iter()
            .map(|record| self.backing.decode(record))
            .collect::<Result<Vec<T>>>()?;
        let ids = records.into_iter().map(|record| record.id).collect();
        ops.delete_many(self.backing.ns(), &Filter::IdIn(ids))
            .await?;
        Ok(values)
    }

    /// Removes up to `limit` head elements in one transaction.
    pub(crate) async fn take_batch(&self, limit: usize) -> Result<Vec<T>> {
        let txn = self.backing.store.begin().await?;
        let outcome = self.take_in(&*txn, limit).await;
        finish(txn, outcome).await
    }

    /// Moves up to `max` head elements into `target`, in head-to-tail order.
    ///
    /// Works in chunks of `batch_size`, each taken in its own transaction. Returns how many
    /// elements were moved.
    pub async fn drain_to<E>(&self, target: &mut E, max: usize) -> Result<usize>
    where
        E: Extend<T>,
    {
        trace!("Draining up to {} elements from deque {}", max, self.backing.namespace);
        let mut drained = 0usize;
        while drained < max {
            let limit = max
                .saturating_sub(drained)
                .min(self.backing.config.batch_size);
            let values = self.take_batch(limit).await?;
            if values.is_empty() {
                break;
            }
            drained = drained.saturating_add(values.len());
            target.extend(values);
        }
        debug!("Drained {} elements from deque {}", drained, self.backing.namespace);
        Ok(drained)
    }

    /// Removes and returns every element.
    pub async fn drain_all(&self) -> Result<Vec<T>> {
        let mut values = Vec::new();
        self.drain_to(&mut values, usize::MAX).await?;
        Ok(values)
    }

    async fn move_in<O: DocumentOps + ?Sized>(&self, ops: &O, target: &Self, limit: usize) -> Result<usize> {
        let values = self.take_in(ops, limit).await?;
        if values.is_empty() {
            return Ok(0);
        }
        let payloads = target.encode_all(&values, "drain_into")?;
        target
            .insert_run_in(ops, End::Tail, &payloads)
            .await?;
        Ok(values.len())
    }

    /// Moves one chunk between namespaces of the same store in a single transaction.
    async fn move_once(&self, target: &Self, limit: usize) -> Result<usize> {
        let txn = self.backing.store.begin().await?;
        let outcome = self.move_in(&*txn, target, limit).await;
        finish(txn, outcome).await
    }

    /// Moves one chunk to a deque on another store.
    ///
    /// The take and the append cannot share a transaction, so a failed append puts the chunk
    /// back at the source head before the error is returned.
    async fn move_across(&self, target: &Self, limit: usize) -> Result<usize> {
        let values = self.take_batch(limit).await?;
        if values.is_empty() {
            return Ok(0);
        }
        let payloads = self.encode_all(&values, "drain_into")?;
        let moved = values.len();
        if let Err(err) = target.append_batch(values).await {
            warn!(
                "Append to deque {} failed, returning {} elements to deque {}: {}",
                target.backing.namespace, moved, self.backing.namespace, err
            );
            let payloads = payloads.as_slice();
            let restored = retry_with_backoff(&self.backing.config.offer_retry, "drain_into", move || {
                self.insert_run_once(End::Head, payloads)
            })
            .await;
            if let Err(restore_err) = restored {
                error!(
                    "Failed to return {} elements to deque {}: {}",
                    moved, self.backing.namespace, restore_err
                );
            }
            return Err(err);
        }
        Ok(moved)
    }

    /// Moves up to `max` head elements to the tail of another deque.
    ///
    /// When both deques live in the same store each chunk is removed and appended in one
    /// transaction, so a failing chunk leaves both deques as they were. Across stores a failed
    /// append puts the chunk back at the source head. Earlier chunks stay moved.
    ///
    /// # Errors
    /// `KeelError::InvalidArgument` when `target` is backed by the same namespace.
    pub async fn drain_into(&self, target: &Self, max: usize) -> Result<usize> {
        if self.backing.same_namespace(&target.backing) {
            return Err(KeelError::InvalidArgument {
                reason: format!("cannot drain deque {} into itself", self.backing.namespace),
            });
        }
        let shared_store = self.backing.same_store(&target.backing);
        let mut drained = 0usize;
        while drained < max {
            let limit = max
                .saturating_sub(drained)
                .min(self.backing.config.batch_size);
            let moved = if shared_store {
                retry_with_backoff(&target.backing.config.offer_retry, "drain_into", move || {
                    self.move_once(target, limit)
                })
                .await?
            }
            else {
                self.move_across(target, limit).await?
            };
            if moved == 0 {
                break;
            }
            drained = drained.saturating_add(moved);
        }
        debug!(
            "Drained {} elements from deque {} into {}",
            drained, self.backing.namespace, target.backing.namespace
        );
        Ok(drained)
    }

    /// Removes every element equal to one of `values`.
    ///
    /// Returns whether anything was removed.
    pub async fn remove_all(&self, values: &[T]) -> Result<bool> {
        let hashes = self.backing.codec.fingerprints(values, "remove_all")?;
        self.backing.remove_hashes(&Filter::All, hashes).await
    }

    /// Removes every element not equal to one of `values`.
    ///
    /// Returns whether anything was removed.
    pub async fn retain_all(&self, values: &[T]) -> Result<bool> {
        let hashes = self.backing.codec.fingerprints(values, "retain_all")?;
        self.backing.retain_hashes(&Filter::All, hashes).await
    }
}
