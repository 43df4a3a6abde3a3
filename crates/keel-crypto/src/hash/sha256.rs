use sha2::{Digest as _, Sha256};

use crate::{error::CryptoError, hash_trait::HashFunction};

/// SHA-256 fingerprint implementation.
///
/// Offered for deployments where another process computes fingerprints with a stock
/// SHA-256 and the digests have to line up.
pub struct Sha256Hasher;

impl HashFunction for Sha256Hasher {
    fn hash_text(text: &str) -> Result<String, CryptoError> {
        let digest = Sha256::digest(text.as_bytes());
        Ok(hex::encode(digest))
    }
}

impl crate::hash_trait::private::Sealed for Sha256Hasher {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            Sha256Hasher::hash_text("abc").unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha256_differs_from_blake3() {
        let text = "{\"k\":\"v\"}";
        assert_ne!(
            Sha256Hasher::hash_text(text).unwrap(),
            crate::Blake3Hasher::hash_text(text).unwrap()
        );
    }
}
