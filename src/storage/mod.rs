//! Persistent accessory state
//!
//! Two stores back the pairing engines:
//!
//! - [`PairingList`]: fixed-size controller records in a flash-like region
//! - [`ConfigStore`]: the accessory long-term key and the setup-finished flag
//!
//! [`Keystore`] bundles both behind the single lock the engines hold.

mod config;
mod flash;
mod keystore;
mod pairing_list;

pub use config::{ConfigStore, DeviceConfig, FileConfigStore, MemoryConfigStore};
pub use flash::{FileFlash, Flash, MemoryFlash};
pub use keystore::Keystore;
pub use pairing_list::{
    DEFAULT_REGION_SIZE, IDENTIFIER_LEN, PUBLIC_KEY_LEN, PairingList, PairingRecord, PairingTable,
    RECORD_LEN,
};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("access outside flash region: offset {offset}, len {len}, size {size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("pairing list is full")]
    NoSpace,

    #[error("pairing not found")]
    NotFound,

    #[error("identifier length {0} out of range")]
    InvalidIdentifier(usize),
}
