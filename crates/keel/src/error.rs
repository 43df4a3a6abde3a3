use thiserror::Error;

/// Keel-wide error type for the collection adapters and the store contract.
///
/// Variants fall into the classes callers have to tell apart: invalid arguments (never
/// retried), transient store contention (retried locally, see [`KeelError::is_retryable`]),
/// empty-collection conditions, unsupported operations, and generic store failures.
#[derive(Error, Debug)]
pub enum KeelError {
    /// A value whose canonical form is JSON `null` was passed where nulls are forbidden
    #[error("Null element passed to '{operation}'")]
    NullElement {
        operation: String,
    },

    /// A key outside the half-open range of a bounded set view
    #[error("Key '{key}' is outside of range {range}")]
    KeyOutOfRange {
        key:   String,
        range: String,
    },

    /// Any other argument rejected before touching the store
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        reason: String,
    },

    /// A transaction lost a race against a concurrent writer
    #[error("Transient conflict in namespace '{namespace}': {reason}")]
    TransientConflict {
        namespace: String,
        reason:    String,
    },

    /// A record with the same id already exists in the namespace
    #[error("Record '{id}' already exists in namespace '{namespace}'")]
    DuplicateKey {
        id:        String,
        namespace: String,
    },

    /// A retried operation kept failing
    #[error("Operation '{operation}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts:  u32,
        #[source]
        source:    Box<KeelError>,
    },

    /// `get_first`/`remove_first` and friends on an empty collection
    #[error("No such element in namespace '{namespace}'")]
    NoSuchElement {
        namespace: String,
    },

    /// The operation is not valid in the current state (e.g. cursor `remove` before `next`)
    #[error("Illegal state: {reason}")]
    IllegalState {
        reason: String,
    },

    /// The operation has no mapping onto the backing store
    #[error("Unsupported operation: {operation}")]
    Unsupported {
        operation: String,
    },

    /// Store-level transport or transaction failure
    #[error("Store operation failed: {reason}")]
    Store {
        reason: String,
    },

    /// JSON serialization/deserialization failed
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// Fingerprinting failed
    #[error("Fingerprint error: {source}")]
    Crypto {
        #[from]
        source: keel_crypto::CryptoError,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
    },

    /// Generic error for unexpected conditions
    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl KeelError {
    /// Whether retrying the whole read-compute-write unit may succeed.
    ///
    /// Duplicate keys count as transient: two offers that read the same extreme id race on the
    /// unique index, and the loser succeeds once it re-reads.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientConflict {
                ..
            } | Self::DuplicateKey {
                ..
            }
        )
    }

    pub(crate) fn unsupported(operation: &str) -> Self {
        Self::Unsupported {
            operation: operation.to_owned(),
        }
    }
}

/// Result type alias for Keel operations.
pub type Result<T> = std::result::Result<T, KeelError>;
