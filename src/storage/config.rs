use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::StorageError;

/// Accessory-wide persistent settings
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Accessory Ed25519 long-term secret key
    pub accessory_ltsk: Option<[u8; 32]>,
    /// Pair-setup has completed with at least one admin
    pub pair_setup_finished: bool,
}

impl std::fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("accessory_ltsk", &self.accessory_ltsk.map(|_| "<redacted>"))
            .field("pair_setup_finished", &self.pair_setup_finished)
            .finish()
    }
}

/// Load/save interface for [`DeviceConfig`]
pub trait ConfigStore: Send {
    /// Load the stored configuration, or the default if none exists
    ///
    /// # Errors
    ///
    /// Returns error if the stored data cannot be read or parsed.
    fn load(&mut self) -> Result<DeviceConfig, StorageError>;

    /// Persist `config`
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn save(&mut self, config: &DeviceConfig) -> Result<(), StorageError>;
}

/// In-memory configuration store (non-persistent)
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    config: DeviceConfig,
}

impl MemoryConfigStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&mut self) -> Result<DeviceConfig, StorageError> {
        Ok(self.config.clone())
    }

    fn save(&mut self, config: &DeviceConfig) -> Result<(), StorageError> {
        self.config = config.clone();
        Ok(())
    }
}

/// JSON file configuration store
#[derive(Debug)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    /// Store configuration at `path`
    ///
    /// # Errors
    ///
    /// Returns error if the parent directory cannot be created.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&mut self) -> Result<DeviceConfig, StorageError> {
        if !self.path.try_exists()? {
            return Ok(DeviceConfig::default());
        }

        let bytes = std::fs::read(&self.path)?;
        if bytes.is_empty() {
            return Ok(DeviceConfig::default());
        }

        serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn save(&mut self, config: &DeviceConfig) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(config)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
