//! Shared accessory state
//!
//! One [`Accessory`] is shared (behind an `Arc`) by every connection. It owns
//! the keystore and the single pair-setup context. When both locks are
//! needed the pair-setup lock is taken first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::config::AccessoryConfig;
use super::pair_setup::PairSetupContext;
use crate::protocol::crypto::SHA1_LEN;
use crate::protocol::pairing::PairingError;
use crate::storage::Keystore;

/// Identifies one transport connection for pair-setup ownership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Apple authentication coprocessor used for MFi pair-setup
pub trait MfiAuthenticator: Send + Sync {
    /// Accessory certificate sent in M4
    ///
    /// # Errors
    ///
    /// Returns error if the coprocessor cannot be read.
    fn certificate(&self) -> Result<Vec<u8>, PairingError>;

    /// Sign the SHA-1 digest of the MFi challenge
    ///
    /// # Errors
    ///
    /// Returns error if the coprocessor refuses to sign.
    fn sign(&self, digest: &[u8; SHA1_LEN]) -> Result<Vec<u8>, PairingError>;
}

/// Process-wide accessory state
pub struct Accessory {
    config: AccessoryConfig,
    keystore: Mutex<Keystore>,
    pair_setup: PairSetupContext,
    mfi: Option<Arc<dyn MfiAuthenticator>>,
    next_connection: AtomicU64,
}

impl std::fmt::Debug for Accessory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessory")
            .field("config", &self.config)
            .field("mfi", &self.mfi.is_some())
            .finish_non_exhaustive()
    }
}

impl Accessory {
    /// Create accessory state over `keystore`
    #[must_use]
    pub fn new(config: AccessoryConfig, keystore: Keystore) -> Self {
        let pair_setup = PairSetupContext::new(config.max_setup_errors);
        Self {
            config,
            keystore: Mutex::new(keystore),
            pair_setup,
            mfi: None,
            next_connection: AtomicU64::new(1),
        }
    }

    /// Non-persistent accessory, sized from `config`
    #[must_use]
    pub fn in_memory(config: AccessoryConfig) -> Self {
        let keystore = Keystore::memory(config.pairing_region_size);
        Self::new(config, keystore)
    }

    /// Enable MFi authentication in pair-setup M4
    #[must_use]
    pub fn with_mfi(mut self, authenticator: Arc<dyn MfiAuthenticator>) -> Self {
        self.mfi = Some(authenticator);
        self
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &AccessoryConfig {
        &self.config
    }

    /// Accessory pairing identifier bytes
    #[must_use]
    pub fn identifier(&self) -> &[u8] {
        self.config.device_id.as_bytes()
    }

    /// Lock the keystore
    ///
    /// A poisoned lock is recovered; every keystore mutation is written
    /// through to storage before it returns.
    pub fn keystore(&self) -> MutexGuard<'_, Keystore> {
        self.keystore.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The pair-setup context
    #[must_use]
    pub fn pair_setup(&self) -> &PairSetupContext {
        &self.pair_setup
    }

    pub(crate) fn mfi(&self) -> Option<&dyn MfiAuthenticator> {
        self.mfi.as_deref()
    }

    /// Whether any controller has completed pair-setup
    #[must_use]
    pub fn is_paired(&self) -> bool {
        self.keystore().is_pair_setup_finished()
    }

    /// Allocate an identifier for a new connection
    #[must_use]
    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    /// Remove all pairings and re-open pair-setup
    ///
    /// # Errors
    ///
    /// Returns error if the keystore cannot be written.
    pub fn reset_pairings(&self) -> Result<(), PairingError> {
        self.pair_setup.reset();
        self.keystore().reset_pairings()?;
        Ok(())
    }
}
