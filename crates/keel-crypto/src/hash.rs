//! Fingerprint implementations.

mod blake3;
mod sha256;

pub use self::{blake3::Blake3Hasher, sha256::Sha256Hasher};
