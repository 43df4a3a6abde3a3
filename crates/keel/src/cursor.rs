//! Lazy cursors over a namespace.
//!
//! A cursor never materializes the collection: each advance issues one sorted, limit-1 query
//! for the first record strictly after the last id seen, so concurrent inserts behind the
//! cursor are skipped and inserts ahead of it are picked up.

use std::fmt;

use futures::Stream;
use tracing::trace;

use crate::{
    backing::Backing,
    filter::{Filter, SortOrder},
    record::{Record, RecordId},
    KeelError,
    Result,
};

/// Turns a fetched record into the element the cursor yields.
pub(crate) type Decode<T> = fn(&Backing, &Record) -> Result<T>;

/// Incremental traversal of the records in a scope, ordered by id.
pub struct Cursor<T> {
    backing:      Backing,
    scope:        Filter,
    order:        SortOrder,
    last_id:      Option<RecordId>,
    peeked:       Option<Record>,
    last_yielded: Option<RecordId>,
    decode:       Decode<T>,
}

impl<T> fmt::Debug for Cursor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("namespace", &self.backing.namespace)
            .field("scope", &self.scope)
            .field("order", &self.order)
            .field("last_id", &self.last_id)
            .finish_non_exhaustive()
    }
}

impl<T> Cursor<T> {
    pub(crate) const fn new(backing: Backing, scope: Filter, order: SortOrder, decode: Decode<T>) -> Self {
        Self {
            backing,
            scope,
            order,
            last_id: None,
            peeked: None,
            last_yielded: None,
            decode,
        }
    }

    /// Whether another element exists. Repeated calls without `next` do not advance.
    pub async fn has_next(&mut self) -> Result<bool> {
        if self.peeked.is_some() {
            return Ok(true);
        }
        let filter = match self.last_id {
            Some(ref last) => {
                self.scope
                    .clone()
                    .and(Filter::after(last.clone(), self.order))
            },
            None => self.scope.clone(),
        };
        let fetched = self.backing.find_one(&filter, self.order).await?;
        if let Some(ref record) = fetched {
            trace!("Cursor on {} advanced to {}", self.backing.namespace, record.id);
            self.last_id = Some(record.id.clone());
        }
        self.peeked = fetched;
        Ok(self.peeked.is_some())
    }

    /// The next element, or `None` when the traversal is over.
    pub async fn next(&mut self) -> Result<Option<T>> {
        if !self.has_next().await? {
            return Ok(None);
        }
        let Some(record) = self.peeked.take()
        else {
            return Ok(None);
        };
        let value = (self.decode)(&self.backing, &record)?;
        self.last_yielded = Some(record.id);
        Ok(Some(value))
    }

    /// Deletes the element last returned by `next`.
    ///
    /// # Errors
    /// `KeelError::IllegalState` when nothing was yielded since the last `remove`.
    pub async fn remove(&mut self) -> Result<()> {
        let Some(id) = self.last_yielded.take()
        else {
            return Err(KeelError::IllegalState {
                reason: "remove called before next".to_owned(),
            });
        };
        self.backing
            .delete_many(&Filter::IdEquals(id))
            .await?;
        Ok(())
    }

    /// Reads the remaining elements into a vector.
    pub async fn collect_vec(mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Adapts the cursor into a stream of elements.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<T>> + Send
    where
        T: Send + 'static,
    {
        async_stream::try_stream! {
            while let Some(item) = self.next().await? {
                yield item;
            }
        }
    }
}

pub(crate) fn decode_value<T: serde::de::DeserializeOwned>(backing: &Backing, record: &Record) -> Result<T> {
    backing.decode(record)
}

pub(crate) fn decode_key(_: &Backing, record: &Record) -> Result<String> {
    record
        .id
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| {
            KeelError::Internal {
                message: format!("expected a string key, found {}", record.id),
            }
        })
}
