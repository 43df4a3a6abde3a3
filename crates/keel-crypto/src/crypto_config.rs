use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::CryptoError;

/// Hash algorithm options for global configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithmChoice {
    #[default]
    Blake3,
    Sha256,
}

/// Global fingerprint configuration.
///
/// Every process sharing a store namespace must use the same algorithm, otherwise
/// value lookups by fingerprint silently miss.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoConfig {
    pub hash_algorithm: HashAlgorithmChoice,
}

// Global configuration storage
static GLOBAL_CONFIG: OnceLock<CryptoConfig> = OnceLock::new();

/// Sets the global fingerprint configuration.
///
/// Must be called before the first fingerprint is computed for the configuration to take effect.
///
/// # Errors
/// Returns `CryptoError::ConfigAlreadySet` if a configuration was already installed, either
/// explicitly or implicitly by a previous call to [`get_global_crypto_config`].
pub fn set_global_crypto_config(config: CryptoConfig) -> Result<(), CryptoError> {
    let algorithm = config.hash_algorithm;
    GLOBAL_CONFIG.set(config).map_err(|_| {
        warn!("Crypto configuration already initialized, ignoring {:?}", algorithm);
        CryptoError::ConfigAlreadySet
    })?;
    debug!("Global fingerprint algorithm set to {:?}", algorithm);
    Ok(())
}

/// Gets the current global fingerprint configuration.
/// Returns the default configuration if none has been set.
pub fn get_global_crypto_config() -> &'static CryptoConfig {
    GLOBAL_CONFIG.get_or_init(|| {
        debug!("No crypto configuration set, using defaults");
        CryptoConfig::default()
    })
}
