//! Fixed-size chunking for bulk operations.
//!
//! Each chunk is handed to the callback as an owned `Vec`; callers run one store transaction
//! per chunk, so a failure leaves earlier chunks committed.

use std::future::Future;

use tracing::trace;

use crate::Result;

/// Iterator adaptor yielding `size`-element chunks (the last one may be shorter).
#[derive(Debug)]
pub struct Batches<I> {
    items: I,
    size:  usize,
}

impl<I: Iterator> Iterator for Batches<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<I::Item> = self.items.by_ref().take(self.size).collect();
        if batch.is_empty() {
            None
        }
        else {
            Some(batch)
        }
    }
}

/// Splits `items` into chunks of `size` (a size of 0 is treated as 1).
pub fn batched<I: IntoIterator>(items: I, size: usize) -> Batches<I::IntoIter> {
    Batches {
        items: items.into_iter(),
        size:  size.max(1),
    }
}

/// Feeds `items` to `on_batch` in chunks of `size`, stopping at the first failing chunk.
///
/// Returns how many items were handed to successful chunks.
pub async fn for_each_batch<I, F, Fut>(items: I, size: usize, mut on_batch: F) -> Result<usize>
where
    I: IntoIterator,
    F: FnMut(Vec<I::Item>) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut processed = 0usize;
    for (index, batch) in batched(items, size).enumerate() {
        let len = batch.len();
        on_batch(batch).await?;
        processed = processed.saturating_add(len);
        trace!("Flushed batch {} ({} items)", index, len);
    }
    Ok(processed)
}
