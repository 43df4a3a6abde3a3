/// Error type for every keel-crypto operation.
///
/// Kept as one enum so callers can convert it with a single `#[from]`.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum CryptoError {
    /// The global configuration was already set
    #[error("Crypto configuration already initialized")]
    ConfigAlreadySet,
}
