//! Durable queues, sorted maps and sorted sets shared through a transactional document store.

mod backing;
pub mod batch;
pub mod codec;
pub mod config;
pub mod constants;
pub mod cursor;
pub mod deque;
pub mod error;
pub mod filter;
pub mod map;
pub mod record;
pub mod retry;
pub mod set;
pub mod store;
pub mod view;
pub mod waiter;

pub use codec::{CanonicalJson, Payload, RecordCodec, Serializer};
pub use config::{CollectionConfig, RetryConfig};
pub use cursor::Cursor;
pub use deque::DocumentDeque;
pub use error::{KeelError, Result};
pub use filter::{Filter, FindOptions, SortOrder};
pub use keel_crypto::HashAlgorithmChoice;
pub use map::DocumentSortedMap;
pub use record::{Record, RecordId};
pub use set::{Entry, EntrySet, KeyRange, KeySet};
pub use store::{
    ChangeEvent,
    ChangeKind,
    ChangeStream,
    DocumentOps,
    DocumentStore,
    IndexSpec,
    MemoryStore,
    MemoryTransaction,
    StoreTransaction,
};
pub use view::ValueCollection;
pub use waiter::{ChangeSubscription, ChangeWaiter};
