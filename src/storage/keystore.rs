use std::path::Path;

use tracing::{debug, error, info};

use super::{
    ConfigStore, DEFAULT_REGION_SIZE, DeviceConfig, FileConfigStore, FileFlash, Flash,
    MemoryConfigStore, MemoryFlash, PairingList, StorageError,
};
use crate::protocol::crypto::{CryptoError, Ed25519KeyPair};

/// Pairing list plus device configuration, held under one lock
pub struct Keystore {
    pairings: PairingList,
    config_store: Box<dyn ConfigStore>,
    config: DeviceConfig,
}

impl std::fmt::Debug for Keystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keystore")
            .field("pairings", &self.pairings)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Keystore {
    /// Combine a flash region and a configuration store
    ///
    /// # Errors
    ///
    /// Returns error if the stored configuration cannot be loaded.
    pub fn new(
        flash: Box<dyn Flash>,
        mut config_store: Box<dyn ConfigStore>,
    ) -> Result<Self, StorageError> {
        let config = config_store.load()?;
        Ok(Self {
            pairings: PairingList::new(flash),
            config_store,
            config,
        })
    }

    /// Non-persistent keystore with a `region_size` byte pairing region
    #[must_use]
    pub fn memory(region_size: usize) -> Self {
        Self {
            pairings: PairingList::new(Box::new(MemoryFlash::new(region_size))),
            config_store: Box::new(MemoryConfigStore::new()),
            config: DeviceConfig::default(),
        }
    }

    /// File-backed keystore in `dir` (`pairings.bin` and `config.json`)
    ///
    /// # Errors
    ///
    /// Returns error if either file cannot be opened or parsed.
    pub fn open(dir: impl AsRef<Path>, region_size: usize) -> Result<Self, StorageError> {
        let dir = dir.as_ref();
        let flash = FileFlash::open(dir.join("pairings.bin"), region_size)?;
        let config_store = FileConfigStore::new(dir.join("config.json"))?;
        info!("Opened keystore at {}", dir.display());
        Self::new(Box::new(flash), Box::new(config_store))
    }

    /// File-backed keystore with the default region size
    ///
    /// # Errors
    ///
    /// See [`Keystore::open`].
    pub fn open_default(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open(dir, DEFAULT_REGION_SIZE)
    }

    /// Controller pairing list
    pub fn pairings(&mut self) -> &mut PairingList {
        &mut self.pairings
    }

    /// Cached device configuration
    #[must_use]
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Whether pair-setup has completed
    #[must_use]
    pub fn is_pair_setup_finished(&self) -> bool {
        self.config.pair_setup_finished
    }

    /// Stored accessory long-term key pair, if one was ever generated
    ///
    /// # Errors
    ///
    /// Returns error if the stored key is malformed.
    pub fn accessory_keypair(&self) -> Result<Option<Ed25519KeyPair>, CryptoError> {
        self.config
            .accessory_ltsk
            .map(|secret| Ed25519KeyPair::from_bytes(&secret))
            .transpose()
    }

    /// Persist the accessory key and mark pair-setup finished
    ///
    /// # Errors
    ///
    /// Returns error if the configuration cannot be saved.
    pub fn finish_pair_setup(&mut self, keypair: &Ed25519KeyPair) -> Result<(), StorageError> {
        let mut config = self.config.clone();
        config.accessory_ltsk = Some(keypair.secret_bytes());
        config.pair_setup_finished = true;
        self.save(config)
    }

    /// Store the pair-setup admin and persist the accessory key together
    ///
    /// The pairing list is restored if the configuration cannot be saved.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NoSpace` when the list is full, otherwise the
    /// error of whichever store failed.
    pub fn complete_pair_setup(
        &mut self,
        controller_id: &[u8],
        controller_ltpk: &[u8; 32],
        keypair: &Ed25519KeyPair,
    ) -> Result<(), StorageError> {
        let snapshot = self.pairings.read()?;
        self.pairings
            .insert_or_update(controller_id, controller_ltpk, true)?;

        if let Err(e) = self.finish_pair_setup(keypair) {
            if let Err(rollback) = self.pairings.update(&snapshot) {
                error!("Failed to roll back pairing list: {}", rollback);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Clear the pairing list and re-open pair-setup
    ///
    /// The accessory long-term key is kept.
    ///
    /// # Errors
    ///
    /// Returns error if either store fails.
    pub fn reset_pairings(&mut self) -> Result<(), StorageError> {
        info!("Resetting pairings");
        self.pairings.clear()?;
        let mut config = self.config.clone();
        config.pair_setup_finished = false;
        self.save(config)
    }

    fn save(&mut self, config: DeviceConfig) -> Result<(), StorageError> {
        self.config_store.save(&config)?;
        debug!("Saved device config: {:?}", config);
        self.config = config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_and_reset() {
        let mut keystore = Keystore::memory(DEFAULT_REGION_SIZE);
        assert!(!keystore.is_pair_setup_finished());
        assert!(keystore.accessory_keypair().unwrap().is_none());

        let keypair = Ed25519KeyPair::generate();
        keystore.pairings().insert_or_update(b"admin", &[1; 32], true).unwrap();
        keystore.finish_pair_setup(&keypair).unwrap();
        assert!(keystore.is_pair_setup_finished());

        keystore.reset_pairings().unwrap();
        assert!(!keystore.is_pair_setup_finished());
        assert!(keystore.pairings().list().unwrap().is_empty());

        let kept = keystore.accessory_keypair().unwrap().unwrap();
        assert_eq!(kept.public_key().as_bytes(), keypair.public_key().as_bytes());
    }

    struct ReadOnlyConfigStore;

    impl ConfigStore for ReadOnlyConfigStore {
        fn load(&mut self) -> Result<DeviceConfig, StorageError> {
            Ok(DeviceConfig::default())
        }

        fn save(&mut self, _config: &DeviceConfig) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    #[test]
    fn test_complete_pair_setup_rolls_back_list() {
        let mut keystore = Keystore::new(
            Box::new(MemoryFlash::new(DEFAULT_REGION_SIZE)),
            Box::new(ReadOnlyConfigStore),
        )
        .unwrap();

        let result = keystore.complete_pair_setup(b"admin", &[3; 32], &Ed25519KeyPair::generate());
        assert!(matches!(result, Err(StorageError::Io(_))));
        assert!(keystore.pairings().list().unwrap().is_empty());
        assert!(!keystore.is_pair_setup_finished());
        assert!(keystore.accessory_keypair().unwrap().is_none());
    }

    #[test]
    fn test_complete_pair_setup_full_list() {
        let mut keystore = Keystore::memory(100);
        keystore.pairings().insert_or_update(b"other", &[1; 32], false).unwrap();

        let result = keystore.complete_pair_setup(b"admin", &[3; 32], &Ed25519KeyPair::generate());
        assert!(matches!(result, Err(StorageError::NoSpace)));
        assert!(!keystore.is_pair_setup_finished());
        assert_eq!(keystore.pairings().list().unwrap().len(), 1);
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let keypair = Ed25519KeyPair::generate();

        {
            let mut keystore = Keystore::open_default(dir.path()).unwrap();
            keystore.pairings().insert_or_update(b"admin", &[5; 32], true).unwrap();
            keystore.finish_pair_setup(&keypair).unwrap();
        }

        let mut keystore = Keystore::open_default(dir.path()).unwrap();
        assert!(keystore.is_pair_setup_finished());
        assert_eq!(keystore.pairings().find_public_key(b"admin").unwrap(), [5; 32]);
        let restored = keystore.accessory_keypair().unwrap().unwrap();
        assert_eq!(restored.public_key().as_bytes(), keypair.public_key().as_bytes());
    }
}
