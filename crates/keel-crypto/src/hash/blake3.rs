use crate::{error::CryptoError, hash_trait::HashFunction};

/// Blake3 fingerprint implementation.
///
/// The default algorithm. Produces 64 lowercase hex characters.
pub struct Blake3Hasher;

impl HashFunction for Blake3Hasher {
    fn hash_text(text: &str) -> Result<String, CryptoError> {
        let hash = blake3::hash(text.as_bytes());
        Ok(hash.to_hex().to_string())
    }
}

impl crate::hash_trait::private::Sealed for Blake3Hasher {}
