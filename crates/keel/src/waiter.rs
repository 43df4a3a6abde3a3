//! Wake-ups for blocking polls driven by the store's change feed.
//!
//! A single change stream per waiter is opened lazily when the first subscription registers
//! and fans every event out through a `watch` channel generation counter, so one upstream
//! insert releases every task currently waiting. Once no subscription has been registered
//! for the configured idle period the stream is closed; the next subscription reopens it.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle, time::Instant};
use tokio_stream::StreamExt as _;
use tracing::{debug, trace, warn};

use crate::{
    store::{ChangeKind, ChangeStream, DocumentStore},
    KeelError,
    Result,
};

#[derive(Debug, Default)]
struct FeedState {
    running:     bool,
    subscribers: usize,
    idle_since:  Option<Instant>,
    task:        Option<JoinHandle<()>>,
    opens:       u64,
}

struct WaiterInner {
    store:        Arc<dyn DocumentStore>,
    namespace:    String,
    kinds:        Vec<ChangeKind>,
    idle_timeout: Duration,
    generation:   watch::Sender<u64>,
    feed:         Mutex<FeedState>,
}

impl WaiterInner {
    fn lock_feed(&self) -> Result<MutexGuard<'_, FeedState>> {
        self.feed.lock().map_err(|_| {
            KeelError::Internal {
                message: format!("change feed state of {} poisoned", self.namespace),
            }
        })
    }

    fn notify(&self) { self.generation.send_modify(|generation| *generation = generation.wrapping_add(1)); }

    /// Marks the feed stopped and wakes every waiter so it re-subscribes.
    fn stop_feed(&self) {
        let mut feed = self
            .feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        feed.running = false;
        feed.task = None;
        drop(feed);
        self.notify();
    }

    /// Closes the feed when nobody subscribed for the idle period.
    fn close_if_idle(&self) -> bool {
        let mut feed = self
            .feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let idle = feed.subscribers == 0 &&
            feed.idle_since
                .is_some_and(|since| since.elapsed() >= self.idle_timeout);
        if idle {
            feed.running = false;
            feed.task = None;
            debug!("Closing idle change feed on {}", self.namespace);
        }
        idle
    }
}

impl Drop for WaiterInner {
    fn drop(&mut self) {
        let feed = self
            .feed
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = feed.task.take() {
            task.abort();
        }
    }
}

async fn run_feed(waiter: Weak<WaiterInner>, mut stream: ChangeStream, idle_timeout: Duration) {
    let mut idle_check = tokio::time::interval(idle_timeout.max(Duration::from_millis(1)));
    idle_check.tick().await;
    loop {
        tokio::select! {
            next = stream.next() => {
                let Some(inner) = waiter.upgrade()
                else {
                    return;
                };
                match next {
                    Some(Ok(event)) => {
                        trace!("Change on {}: {:?} {:?}", inner.namespace, event.kind, event.id);
                        inner.notify();
                    },
                    Some(Err(err)) => {
                        warn!("Change feed on {} failed: {}", inner.namespace, err);
                        inner.stop_feed();
                        return;
                    },
                    None => {
                        debug!("Change feed on {} ended", inner.namespace);
                        inner.stop_feed();
                        return;
                    },
                }
            },
            _ = idle_check.tick() => {
                let Some(inner) = waiter.upgrade()
                else {
                    return;
                };
                if inner.close_if_idle() {
                    return;
                }
            },
        }
    }
}

/// Shared change-feed listener for one namespace.
#[derive(Clone)]
pub struct ChangeWaiter {
    inner: Arc<WaiterInner>,
}

impl fmt::Debug for ChangeWaiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeWaiter")
            .field("namespace", &self.inner.namespace)
            .field("kinds", &self.inner.kinds)
            .field("idle_timeout", &self.inner.idle_timeout)
            .finish_non_exhaustive()
    }
}

impl ChangeWaiter {
    /// Creates a waiter; no change stream is opened until the first subscription.
    pub fn new(store: Arc<dyn DocumentStore>, namespace: &str, kinds: Vec<ChangeKind>, idle_timeout: Duration) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(WaiterInner {
                store,
                namespace: namespace.to_owned(),
                kinds,
                idle_timeout,
                generation,
                feed: Mutex::new(FeedState::default()),
            }),
        }
    }

    /// Registers interest in changes from now on, opening the feed if needed.
    ///
    /// Subscribe before checking collection state, then wait: a change landing between the
    /// check and the wait still wakes the subscription.
    pub fn subscribe(&self) -> Result<ChangeSubscription> {
        let mut feed = self.inner.lock_feed()?;
        if !feed.running {
            let stream = self
                .inner
                .store
                .watch(&self.inner.namespace, &self.inner.kinds)?;
            if let Some(stale) = feed.task.take() {
                stale.abort();
            }
            feed.task = Some(tokio::spawn(run_feed(
                Arc::downgrade(&self.inner),
                stream,
                self.inner.idle_timeout,
            )));
            feed.running = true;
            feed.opens = feed.opens.saturating_add(1);
            debug!("Opened change feed on {}", self.inner.namespace);
        }
        feed.subscribers = feed.subscribers.saturating_add(1);
        feed.idle_since = None;
        let receiver = self.inner.generation.subscribe();
        drop(feed);
        Ok(ChangeSubscription {
            receiver,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Waits up to `timeout` for a change; `true` when woken by one.
    pub async fn wait_for_change(&self, timeout: Duration) -> Result<bool> {
        let mut subscription = self.subscribe()?;
        Ok(subscription.wait(timeout).await)
    }

    /// Whether the change stream is currently open.
    pub fn is_feed_open(&self) -> bool {
        self.inner
            .feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .running
    }

    /// How many times the change stream has been opened.
    pub fn feed_opens(&self) -> u64 {
        self.inner
            .feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .opens
    }
}

/// A registered interest in the next change.
///
/// Dropping the subscription unregisters it; the feed goes idle when the last one is gone.
pub struct ChangeSubscription {
    receiver: watch::Receiver<u64>,
    inner:    Arc<WaiterInner>,
}

impl fmt::Debug for ChangeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSubscription")
            .field("namespace", &self.inner.namespace)
            .finish_non_exhaustive()
    }
}

impl ChangeSubscription {
    /// Waits up to `timeout` for a change not yet seen by this subscription.
    pub async fn wait(&mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.receiver.changed()).await,
            Ok(Ok(()))
        )
    }

    /// Waits for a change not yet seen by this subscription.
    pub async fn wait_forever(&mut self) -> bool { self.receiver.changed().await.is_ok() }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        let mut feed = self
            .inner
            .feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        feed.subscribers = feed.subscribers.saturating_sub(1);
        if feed.subscribers == 0 {
            feed.idle_since = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::Payload,
        record::Record,
        store::{DocumentOps as _, MemoryStore},
    };

    fn waiter(store: &MemoryStore, idle: Duration) -> ChangeWaiter {
        ChangeWaiter::new(
            Arc::new(store.clone()),
            "q",
            vec![ChangeKind::Insert],
            idle,
        )
    }

    async fn insert(store: &MemoryStore, namespace: &str, id: i64) {
        let payload = Payload {
            json_value:      id.to_string(),
            hash_json_value: format!("h{id}"),
        };
        store
            .insert_many(namespace, vec![Record::new(id, payload)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_times_out_without_change() {
        let store = MemoryStore::new();
        let waiter = waiter(&store, Duration::from_secs(60));
        let started = std::time::Instant::now();
        assert!(!waiter
            .wait_for_change(Duration::from_millis(100))
            .await
            .unwrap());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_wakes_on_insert() {
        let store = MemoryStore::new();
        let waiter = waiter(&store, Duration::from_secs(60));
        let writer = store.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            insert(&writer, "q", 1).await;
        });
        let started = std::time::Instant::now();
        assert!(waiter.wait_for_change(Duration::from_secs(5)).await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(4));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_change_between_subscribe_and_wait_is_not_lost() {
        let store = MemoryStore::new();
        let waiter = waiter(&store, Duration::from_secs(60));
        let mut subscription = waiter.subscribe().unwrap();
        insert(&store, "q", 1).await;
        assert!(subscription.wait(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_ignores_other_namespaces_and_kinds() {
        let store = MemoryStore::new();
        let waiter = waiter(&store, Duration::from_secs(60));
        let mut subscription = waiter.subscribe().unwrap();
        insert(&store, "other", 1).await;
        store
            .delete_many("q", &crate::filter::Filter::All)
            .await
            .unwrap();
        assert!(!subscription.wait(Duration::from_millis(100)).await);
    }

    #[tokio::test]
    async fn test_broadcast_releases_every_waiter() {
        let store = MemoryStore::new();
        let waiter = waiter(&store, Duration::from_secs(60));
        let mut first = waiter.subscribe().unwrap();
        let mut second = waiter.subscribe().unwrap();
        insert(&store, "q", 1).await;
        let (a, b) = tokio::join!(
            first.wait(Duration::from_secs(5)),
            second.wait(Duration::from_secs(5))
        );
        assert!(a && b);
        assert_eq!(waiter.feed_opens(), 1);
    }

    #[tokio::test]
    async fn test_feed_closes_when_idle_and_reopens() {
        let store = MemoryStore::new();
        let waiter = waiter(&store, Duration::from_millis(50));
        assert!(!waiter.is_feed_open());

        drop(waiter.subscribe().unwrap());
        assert!(waiter.is_feed_open());

        let mut closed = false;
        for _ in 0 .. 50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if !waiter.is_feed_open() {
                closed = true;
                break;
            }
        }
        assert!(closed);

        let mut subscription = waiter.subscribe().unwrap();
        assert!(waiter.is_feed_open());
        assert_eq!(waiter.feed_opens(), 2);
        insert(&store, "q", 1).await;
        assert!(subscription.wait(Duration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn test_feed_stays_open_while_subscribed() {
        let store = MemoryStore::new();
        let waiter = waiter(&store, Duration::from_millis(30));
        let _subscription = waiter.subscribe().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(waiter.is_feed_open());
        assert_eq!(waiter.feed_opens(), 1);
    }
}
