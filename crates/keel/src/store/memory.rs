//! A complete in-process implementation of the store contract.
//!
//! `MemoryStore` keeps every namespace in a `BTreeMap` ordered by `_id` behind one async
//! mutex. Transactions hold the mutex for their whole lifetime, which makes them
//! serializable, and keep an undo log so an abort (or a drop without commit) restores the
//! previous state. Change notifications are published on a broadcast channel after the
//! change becomes visible. Records under a TTL index are purged by a background sweep, so
//! expiry lags behind nominal expiry exactly like a real store's TTL monitor.
//!
//! Cloning a `MemoryStore` yields another handle on the same data, which is how tests model
//! several processes sharing one backing store.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    mem,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
        Mutex,
        PoisonError,
    },
    time::Duration,
};

use async_stream::stream;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::{
    sync::{broadcast, Mutex as AsyncMutex, OwnedMutexGuard},
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

use super::{ChangeEvent, ChangeKind, ChangeStream, DocumentOps, DocumentStore, IndexSpec, StoreTransaction};
use crate::{
    constants::{CHANGE_CHANNEL_CAPACITY, DEFAULT_TTL_SWEEP_INTERVAL_MS},
    filter::{Filter, FindOptions, SortOrder},
    record::{Record, RecordId},
    KeelError,
    Result,
};

#[derive(Debug, Default)]
struct Namespace {
    records: BTreeMap<RecordId, Record>,
    indexes: BTreeMap<String, IndexSpec>,
}

impl Namespace {
    fn ttl(&self) -> Option<Duration> {
        self.indexes.values().find_map(|index| {
            match *index {
                IndexSpec::Ttl {
                    expire_after, ..
                } => Some(expire_after),
                IndexSpec::Compound {
                    ..
                } => None,
            }
        })
    }
}

enum Undo {
    Inserted {
        namespace: String,
        id:        RecordId,
    },
    Replaced {
        namespace: String,
        previous:  Record,
    },
    Deleted {
        namespace: String,
        record:    Record,
    },
}

/// Side effects of a batch of state mutations.
#[derive(Default)]
struct Effects {
    undo:   Vec<Undo>,
    events: Vec<ChangeEvent>,
}

impl Effects {
    fn push(&mut self, namespace: &str, kind: ChangeKind, id: &RecordId, undo: Undo) {
        self.undo.push(undo);
        self.events.push(ChangeEvent {
            namespace: namespace.to_owned(),
            kind,
            id: Some(id.clone()),
        });
    }
}

#[derive(Debug, Default)]
struct StoreState {
    namespaces: HashMap<String, Namespace>,
}

impl StoreState {
    fn namespace_mut(&mut self, namespace: &str) -> &mut Namespace {
        self.namespaces
            .entry(namespace.to_owned())
            .or_default()
    }

    fn find(&self, namespace: &str, filter: &Filter, options: &FindOptions) -> Vec<Record> {
        let Some(space) = self.namespaces.get(namespace)
        else {
            return Vec::new();
        };
        let limit = options.limit.unwrap_or(usize::MAX);
        match options.sort {
            SortOrder::Ascending => {
                space
                    .records
                    .values()
                    .filter(|record| filter.matches(record))
                    .take(limit)
                    .cloned()
                    .collect()
            },
            SortOrder::Descending => {
                space
                    .records
                    .values()
                    .rev()
                    .filter(|record| filter.matches(record))
                    .take(limit)
                    .cloned()
                    .collect()
            },
        }
    }

    fn count(&self, namespace: &str, filter: &Filter) -> u64 {
        self.namespaces.get(namespace).map_or(0, |space| {
            space
                .records
                .values()
                .filter(|record| filter.matches(record))
                .count() as u64
        })
    }

    fn insert_many(&mut self, namespace: &str, records: Vec<Record>, effects: &mut Effects) -> Result<()> {
        let space = self.namespace_mut(namespace);
        for record in records {
            if space.records.contains_key(&record.id) {
                return Err(KeelError::DuplicateKey {
                    id:        record.id.to_string(),
                    namespace: namespace.to_owned(),
                });
            }
            effects.push(
                namespace,
                ChangeKind::Insert,
                &record.id,
                Undo::Inserted {
                    namespace: namespace.to_owned(),
                    id:        record.id.clone(),
                },
            );
            space.records.insert(record.id.clone(), record);
        }
        Ok(())
    }

    fn replace_one(&mut self, namespace: &str, record: Record, upsert: bool, effects: &mut Effects) -> Option<Record> {
        let space = self.namespace_mut(namespace);
        let id = record.id.clone();
        if space.records.contains_key(&id) {
            let previous = space.records.insert(id.clone(), record);
            if let Some(ref previous) = previous {
                effects.push(
                    namespace,
                    ChangeKind::Replace,
                    &id,
                    Undo::Replaced {
                        namespace: namespace.to_owned(),
                        previous:  previous.clone(),
                    },
                );
            }
            previous
        }
        else {
            if upsert {
                effects.push(
                    namespace,
                    ChangeKind::Insert,
                    &id,
                    Undo::Inserted {
                        namespace: namespace.to_owned(),
                        id:        id.clone(),
                    },
                );
                space.records.insert(id, record);
            }
            None
        }
    }

    fn remove(&mut self, namespace: &str, id: &RecordId, effects: &mut Effects) -> Option<Record> {
        let record = self.namespaces.get_mut(namespace)?.records.remove(id)?;
        effects.push(
            namespace,
            ChangeKind::Delete,
            id,
            Undo::Deleted {
                namespace: namespace.to_owned(),
                record:    record.clone(),
            },
        );
        Some(record)
    }

    fn find_one_and_delete(
        &mut self,
        namespace: &str,
        filter: &Filter,
        sort: SortOrder,
        effects: &mut Effects,
    ) -> Option<Record> {
        let first = self
            .find(namespace, filter, &FindOptions::sorted(sort).with_limit(1))
            .into_iter()
            .next()?;
        self.remove(namespace, &first.id, effects)
    }

    fn delete_many(&mut self, namespace: &str, filter: &Filter, effects: &mut Effects) -> u64 {
        let ids: Vec<RecordId> = self
            .find(namespace, filter, &FindOptions::default())
            .into_iter()
            .map(|record| record.id)
            .collect();
        let mut deleted = 0u64;
        for id in &ids {
            if self.remove(namespace, id, effects).is_some() {
                deleted = deleted.saturating_add(1);
            }
        }
        deleted
    }

    fn sweep_expired(&mut self, now: DateTime<Utc>, effects: &mut Effects) -> u64 {
        let mut expired = Vec::new();
        for (name, space) in &self.namespaces {
            let Some(ttl) = space.ttl()
            else {
                continue;
            };
            let Some(cutoff) = TimeDelta::from_std(ttl)
                .ok()
                .and_then(|ttl| now.checked_sub_signed(ttl))
            else {
                continue;
            };
            for record in space.records.values() {
                if record.created_at.is_some_and(|at| at <= cutoff) {
                    expired.push((name.clone(), record.id.clone()));
                }
            }
        }
        let mut removed = 0u64;
        for (name, id) in &expired {
            if self.remove(name, id, effects).is_some() {
                removed = removed.saturating_add(1);
            }
        }
        removed
    }

    fn rollback(&mut self, undo: Vec<Undo>) {
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::Inserted {
                    namespace,
                    id,
                } => {
                    self.namespace_mut(&namespace).records.remove(&id);
                },
                Undo::Replaced {
                    namespace,
                    previous,
                }
                | Undo::Deleted {
                    namespace,
                    record: previous,
                } => {
                    self.namespace_mut(&namespace)
                        .records
                        .insert(previous.id.clone(), previous);
                },
            }
        }
    }
}

#[derive(Debug)]
struct MemoryInner {
    state:              Arc<AsyncMutex<StoreState>>,
    changes:            broadcast::Sender<ChangeEvent>,
    injected_conflicts: AtomicU32,
    ttl_sweep_interval: Duration,
    sweeper:            Mutex<Option<JoinHandle<()>>>,
}

impl MemoryInner {
    fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            if self.changes.send(event).is_err() {
                trace!("No change feed subscribers, dropping notification");
            }
        }
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn sweep_expired(&self) -> u64 {
        let mut effects = Effects::default();
        let removed = {
            let mut state = self.state.lock().await;
            state.sweep_expired(Utc::now(), &mut effects)
        };
        self.publish(effects.events);
        removed
    }
}

impl Drop for MemoryInner {
    fn drop(&mut self) {
        let sweeper = self
            .sweeper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = sweeper.take() {
            task.abort();
        }
    }
}

/// In-process document store.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use keel_collections::{CollectionConfig, DocumentDeque, MemoryStore};
///
/// # async fn example() -> keel_collections::Result<()> {
/// let store = Arc::new(MemoryStore::new());
/// let jobs = DocumentDeque::<String>::open(store, "jobs", CollectionConfig::default()).await?;
/// jobs.offer_last(&"build".to_owned()).await?;
/// assert_eq!(jobs.poll_first().await?, Some("build".to_owned()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl Default for MemoryStore {
    fn default() -> Self { Self::new() }
}

impl MemoryStore {
    /// Creates an empty store sweeping expired records every 60 seconds.
    pub fn new() -> Self { Self::with_ttl_sweep_interval(Duration::from_millis(DEFAULT_TTL_SWEEP_INTERVAL_MS)) }

    /// Creates an empty store with a custom TTL sweep period.
    pub fn with_ttl_sweep_interval(ttl_sweep_interval: Duration) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                state: Arc::new(AsyncMutex::new(StoreState::default())),
                changes,
                injected_conflicts: AtomicU32::new(0),
                ttl_sweep_interval,
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// Makes the next `count` transaction commits fail with `KeelError::TransientConflict`.
    ///
    /// Models write conflicts a replicated store reports under contention; the failed
    /// transactions are rolled back.
    pub fn inject_conflicts(&self, count: u32) { self.inner.injected_conflicts.store(count, Ordering::SeqCst); }

    /// Purges records whose TTL has elapsed; returns how many were removed.
    pub async fn sweep_expired(&self) -> u64 { self.inner.sweep_expired().await }

    /// Indexes declared on a namespace.
    pub async fn indexes(&self, namespace: &str) -> Vec<IndexSpec> {
        let state = self.inner.state.lock().await;
        state
            .namespaces
            .get(namespace)
            .map(|space| space.indexes.values().cloned().collect())
            .unwrap_or_default()
    }

    fn ensure_sweeper(&self) {
        let mut sweeper = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if sweeper.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let period = self.inner.ttl_sweep_interval;
        debug!("Starting TTL sweeper every {:?}", period);
        *sweeper = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade()
                else {
                    break;
                };
                let removed = inner.sweep_expired().await;
                if removed > 0 {
                    debug!("TTL sweep removed {} expired records", removed);
                }
            }
        }));
    }

    async fn mutate<R>(&self, op: impl FnOnce(&mut StoreState, &mut Effects) -> R) -> R {
        let mut effects = Effects::default();
        let result = {
            let mut state = self.inner.state.lock().await;
            op(&mut state, &mut effects)
        };
        self.inner.publish(effects.events);
        result
    }
}

#[async_trait]
impl DocumentOps for MemoryStore {
    async fn find(&self, namespace: &str, filter: &Filter, options: &FindOptions) -> Result<Vec<Record>> {
        let state = self.inner.state.lock().await;
        Ok(state.find(namespace, filter, options))
    }

    async fn insert_many(&self, namespace: &str, records: Vec<Record>) -> Result<()> {
        self.mutate(|state, effects| state.insert_many(namespace, records, effects))
            .await
    }

    async fn replace_one(&self, namespace: &str, record: Record, upsert: bool) -> Result<Option<Record>> {
        Ok(self
            .mutate(|state, effects| state.replace_one(namespace, record, upsert, effects))
            .await)
    }

    async fn find_one_and_delete(&self, namespace: &str, filter: &Filter, sort: SortOrder) -> Result<Option<Record>> {
        Ok(self
            .mutate(|state, effects| state.find_one_and_delete(namespace, filter, sort, effects))
            .await)
    }

    async fn delete_many(&self, namespace: &str, filter: &Filter) -> Result<u64> {
        Ok(self
            .mutate(|state, effects| state.delete_many(namespace, filter, effects))
            .await)
    }

    async fn count(&self, namespace: &str, filter: &Filter) -> Result<u64> {
        let state = self.inner.state.lock().await;
        Ok(state.count(namespace, filter))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let state = Arc::clone(&self.inner.state).lock_owned().await;
        trace!("Transaction started");
        Ok(Box::new(MemoryTransaction {
            store: Arc::clone(&self.inner),
            txn:   Mutex::new(TxnState {
                state,
                effects: Effects::default(),
                namespaces: BTreeSet::new(),
                finished: false,
            }),
        }))
    }

    async fn create_index(&self, namespace: &str, index: IndexSpec) -> Result<()> {
        let is_ttl = matches!(
            index,
            IndexSpec::Ttl {
                ..
            }
        );
        {
            let mut state = self.inner.state.lock().await;
            let name = index.name();
            let space = state.namespace_mut(namespace);
            if space.indexes.contains_key(&name) {
                trace!("Index {} already exists on {}", name, namespace);
            }
            else {
                debug!("Created index {} on {}", name, namespace);
                space.indexes.insert(name, index);
            }
        }
        if is_ttl {
            self.ensure_sweeper();
        }
        Ok(())
    }

    async fn estimated_count(&self, namespace: &str) -> Result<u64> {
        let state = self.inner.state.lock().await;
        Ok(state
            .namespaces
            .get(namespace)
            .map_or(0, |space| space.records.len() as u64))
    }

    fn store_id(&self) -> String { format!("memory:{:p}", Arc::as_ptr(&self.inner)) }

    fn watch(&self, namespace: &str, kinds: &[ChangeKind]) -> Result<ChangeStream> {
        let mut receiver = self.inner.changes.subscribe();
        let namespace = namespace.to_owned();
        let kinds = kinds.to_vec();
        debug!("Opened change feed on {} for {:?}", namespace, kinds);
        Ok(Box::pin(stream! {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if event.namespace == namespace && kinds.contains(&event.kind) {
                            yield Ok::<ChangeEvent, KeelError>(event);
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Change feed on {} lagged by {} events", namespace, skipped);
                        yield Ok::<ChangeEvent, KeelError>(ChangeEvent {
                            namespace: namespace.clone(),
                            kind:      ChangeKind::Insert,
                            id:        None,
                        });
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }
}

struct TxnState {
    state:      OwnedMutexGuard<StoreState>,
    effects:    Effects,
    namespaces: BTreeSet<String>,
    finished:   bool,
}

impl TxnState {
    fn rollback(&mut self) {
        let undo = mem::take(&mut self.effects.undo);
        self.state.rollback(undo);
        self.effects.events.clear();
        self.finished = true;
    }
}

/// A transaction on a [`MemoryStore`].
///
/// Holds the store lock until committed, aborted or dropped.
pub struct MemoryTransaction {
    store: Arc<MemoryInner>,
    txn:   Mutex<TxnState>,
}

impl fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.debug_struct("MemoryTransaction").finish_non_exhaustive() }
}

impl MemoryTransaction {
    fn with_state<R>(&self, namespace: &str, op: impl FnOnce(&mut StoreState, &mut Effects) -> R) -> Result<R> {
        let mut guard = self.txn.lock().map_err(|_| {
            KeelError::Internal {
                message: "transaction state poisoned".to_owned(),
            }
        })?;
        let txn = &mut *guard;
        if txn.finished {
            return Err(KeelError::IllegalState {
                reason: "transaction already finished".to_owned(),
            });
        }
        txn.namespaces.insert(namespace.to_owned());
        Ok(op(&mut txn.state, &mut txn.effects))
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        let txn = self
            .txn
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if !txn.finished {
            debug!("Rolling back unfinished transaction");
            txn.rollback();
        }
    }
}

#[async_trait]
impl DocumentOps for MemoryTransaction {
    async fn find(&self, namespace: &str, filter: &Filter, options: &FindOptions) -> Result<Vec<Record>> {
        self.with_state(namespace, |state, _| state.find(namespace, filter, options))
    }

    async fn insert_many(&self, namespace: &str, records: Vec<Record>) -> Result<()> {
        self.with_state(namespace, |state, effects| {
            state.insert_many(namespace, records, effects)
        })?
    }

    async fn replace_one(&self, namespace: &str, record: Record, upsert: bool) -> Result<Option<Record>> {
        self.with_state(namespace, |state, effects| {
            state.replace_one(namespace, record, upsert, effects)
        })
    }

    async fn find_one_and_delete(&self, namespace: &str, filter: &Filter, sort: SortOrder) -> Result<Option<Record>> {
        self.with_state(namespace, |state, effects| {
            state.find_one_and_delete(namespace, filter, sort, effects)
        })
    }

    async fn delete_many(&self, namespace: &str, filter: &Filter) -> Result<u64> {
        self.with_state(namespace, |state, effects| {
            state.delete_many(namespace, filter, effects)
        })
    }

    async fn count(&self, namespace: &str, filter: &Filter) -> Result<u64> {
        self.with_state(namespace, |state, _| state.count(namespace, filter))
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let store = Arc::clone(&self.store);
        let events = {
            let mut txn = self.txn.lock().map_err(|_| {
                KeelError::Internal {
                    message: "transaction state poisoned".to_owned(),
                }
            })?;
            if txn.finished {
                return Err(KeelError::IllegalState {
                    reason: "transaction already finished".to_owned(),
                });
            }
            if store.take_injected_conflict() {
                txn.rollback();
                let namespace = txn
                    .namespaces
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(",");
                warn!("Injected write conflict on {}", namespace);
                return Err(KeelError::TransientConflict {
                    namespace,
                    reason: "write conflict, transaction rolled back".to_owned(),
                });
            }
            txn.finished = true;
            mem::take(&mut txn.effects.events)
        };
        // Releases the store lock before anyone is told about the change.
        drop(self);
        trace!("Transaction committed with {} changes", events.len());
        store.publish(events);
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        {
            let mut txn = self.txn.lock().map_err(|_| {
                KeelError::Internal {
                    message: "transaction state poisoned".to_owned(),
                }
            })?;
            if !txn.finished {
                txn.rollback();
            }
        }
        trace!("Transaction aborted");
        Ok(())
    }
}
