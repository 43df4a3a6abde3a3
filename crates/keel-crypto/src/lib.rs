//! # Keel Crypto
//!
//! Content fingerprints for Keel collections.
//!
//! Every record a Keel collection writes carries a fingerprint of its canonical payload.
//! Containment and removal by value compare fingerprints inside the store, so the
//! fingerprint function must be deterministic and shared by every process that opens the
//! same namespace.
//!
//! - **Blake3** (default): fast, parallel for large inputs.
//! - **SHA-256**: for interoperability with processes that cannot link blake3.
//!
//! ## Usage
//!
//! ```rust
//! use keel_crypto::hash_text;
//!
//! let fingerprint = hash_text(r#"{"key":"value"}"#).unwrap();
//! assert_eq!(fingerprint.len(), 64);
//! ```

mod crypto_config;
pub mod error;
pub mod hash;
pub mod hash_trait;

pub use crypto_config::*;
pub use error::CryptoError;
pub use hash::{Blake3Hasher, Sha256Hasher};
pub use hash_trait::HashFunction;

/// Computes the fingerprint of canonical text using the given algorithm.
pub fn hash_text_with(algorithm: HashAlgorithmChoice, text: &str) -> Result<String, CryptoError> {
    match algorithm {
        HashAlgorithmChoice::Blake3 => Blake3Hasher::hash_text(text),
        HashAlgorithmChoice::Sha256 => Sha256Hasher::hash_text(text),
    }
}

/// Computes the fingerprint of canonical text using the globally configured algorithm.
pub fn hash_text(text: &str) -> Result<String, CryptoError> {
    hash_text_with(get_global_crypto_config().hash_algorithm, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config() {
        let config = get_global_crypto_config();
        assert_eq!(config.hash_algorithm, HashAlgorithmChoice::Blake3);

        let hash = hash_text("test data").unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            hash_text_with(HashAlgorithmChoice::Blake3, "test data").unwrap()
        );
    }

    #[test]
    fn test_set_global_config_twice_fails() {
        // The default is installed lazily by the first read.
        let _ = get_global_crypto_config();
        let result = set_global_crypto_config(CryptoConfig {
            hash_algorithm: HashAlgorithmChoice::Sha256,
        });
        assert!(matches!(result, Err(CryptoError::ConfigAlreadySet)));
    }

    #[test]
    fn test_hash_text_with_sha256() {
        let hash = hash_text_with(HashAlgorithmChoice::Sha256, "abc").unwrap();
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, hash_text_with(HashAlgorithmChoice::Blake3, "abc").unwrap());
    }

    #[test]
    fn test_algorithm_choice_serde() {
        let choice: HashAlgorithmChoice = serde_json::from_str("\"sha256\"").unwrap();
        assert_eq!(choice, HashAlgorithmChoice::Sha256);
    }
}
