use crate::error::CryptoError;

/// Core trait for the content fingerprint functions used by Keel.
///
/// A fingerprint is a hex-encoded digest of a canonical text. Collections store it next to
/// the canonical payload and compare fingerprints instead of payloads, so implementations
/// must be pure functions of their input.
///
/// The trait is sealed; every implementation lives in this crate.
pub trait HashFunction: private::Sealed {
    /// Computes the hex digest of already-canonical text.
    ///
    /// # Errors
    /// Implementations over in-memory text are infallible today; the `Result` keeps room for
    /// algorithms that can reject input.
    fn hash_text(text: &str) -> Result<String, CryptoError>;
}

// Sealing the trait to prevent external implementations
pub(crate) mod private {
    pub trait Sealed {}
}
