use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::handle::{DocumentDeque, End};
use crate::Result;

impl<T> DocumentDeque<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    /// Polls `end`, waiting for inserts until `timeout` has elapsed.
    ///
    /// The subscription is taken before every poll attempt so an insert that lands between an
    /// empty poll and the wait still wakes the task. A timeout too large to form a deadline
    /// waits forever.
    async fn poll_at_within(&self, end: End, timeout: Duration) -> Result<Option<T>> {
        let deadline = Instant::now().checked_add(timeout);
        trace!(
            "Polling deque {} with timeout {:?}",
            self.backing.namespace,
            timeout
        );
        loop {
            let mut subscription = self.waiter.subscribe()?;
            if let Some(value) = self.poll_at(end).await? {
                return Ok(Some(value));
            }
            match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        debug!("Poll on deque {} timed out", self.backing.namespace);
                        return Ok(None);
                    }
                    subscription.wait(remaining).await;
                },
                None => {
                    subscription.wait_forever().await;
                },
            }
        }
    }

    /// Removes the head element, waiting up to `timeout` for one to arrive.
    ///
    /// Returns `None` once the timeout has elapsed on an empty deque.
    pub async fn poll_first_timeout(&self, timeout: Duration) -> Result<Option<T>> { self.poll_at_within(End::Head, timeout).await }

    /// Removes the tail element, waiting up to `timeout` for one to arrive.
    pub async fn poll_last_timeout(&self, timeout: Duration) -> Result<Option<T>> { self.poll_at_within(End::Tail, timeout).await }

    /// Same as [`Self::poll_first_timeout`].
    pub async fn poll_timeout(&self, timeout: Duration) -> Result<Option<T>> { self.poll_at_within(End::Head, timeout).await }

    async fn take_at(&self, end: End) -> Result<T> {
        loop {
            if let Some(value) = self.poll_at_within(end, Duration::MAX).await? {
                return Ok(value);
            }
        }
    }

    /// Removes the head element, waiting as long as it takes.
    pub async fn take_first(&self) -> Result<T> { self.take_at(End::Head).await }

    /// Removes the tail element, waiting as long as it takes.
    pub async fn take_last(&self) -> Result<T> { self.take_at(End::Tail).await }

    /// Same as [`Self::take_first`].
    pub async fn take(&self) -> Result<T> { self.take_at(End::Head).await }
}
