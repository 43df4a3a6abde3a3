//! Field names and tuning defaults shared by every adapter.
//!
//! Field names are part of the persisted record layout; changing one orphans existing data.

/// Identity field of every record.
pub const ID_FIELD: &str = "_id";

/// Field holding the canonical serialized payload.
pub const JSON_VALUE_FIELD: &str = "json_value";

/// Field holding the fingerprint of `json_value`.
pub const HASH_JSON_VALUE_FIELD: &str = "hash_json_value";

/// Field holding the write timestamp used by TTL indexes.
pub const CREATED_AT_FIELD: &str = "created_at";

/// Records per transaction for chunked bulk operations.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Attempts for the offer transaction before giving up.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Lower bound of the random delay between offer attempts.
pub const DEFAULT_RETRY_MIN_DELAY_MS: u64 = 0;

/// Upper bound of the random delay between offer attempts.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 200;

/// Idle period after which an unused change stream is closed.
pub const DEFAULT_CHANGE_STREAM_IDLE_MS: u64 = 60_000;

/// Period of the in-memory store's TTL sweep.
pub const DEFAULT_TTL_SWEEP_INTERVAL_MS: u64 = 60_000;

/// Capacity of the in-memory store's change broadcast channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Id given to the first record of an empty deque.
pub const INITIAL_DEQUE_ID: i64 = 0;
