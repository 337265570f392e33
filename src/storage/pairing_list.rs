//! Controller pairing records in a fixed-slot flash region
//!
//! Slot layout (100 bytes):
//!
//! | offset | len | field                                   |
//! |--------|-----|-----------------------------------------|
//! | 0      | 64  | identifier, NUL padded                  |
//! | 64     | 32  | Ed25519 long-term public key            |
//! | 96     | 4   | permissions, little endian (bit 0 admin)|
//!
//! A slot whose first byte is `0x00` or `0xFF` is empty.

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use super::{Flash, StorageError};

/// Maximum identifier length
pub const IDENTIFIER_LEN: usize = 64;
/// Controller long-term public key length
pub const PUBLIC_KEY_LEN: usize = 32;
/// Bytes per slot
pub const RECORD_LEN: usize = IDENTIFIER_LEN + PUBLIC_KEY_LEN + 4;
/// Default region size (40 slots)
pub const DEFAULT_REGION_SIZE: usize = 4096;

const PERMISSION_ADMIN: u32 = 0x01;

/// One paired controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingRecord {
    /// Controller pairing identifier
    pub identifier: Vec<u8>,
    /// Controller Ed25519 long-term public key
    pub public_key: [u8; PUBLIC_KEY_LEN],
    /// Permission bits
    pub permissions: u32,
}

impl PairingRecord {
    /// Build a record, validating the identifier
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidIdentifier` for an empty or oversized
    /// identifier, or one that would read back as an empty slot.
    pub fn new(
        identifier: &[u8],
        public_key: [u8; PUBLIC_KEY_LEN],
        is_admin: bool,
    ) -> Result<Self, StorageError> {
        validate_identifier(identifier)?;
        Ok(Self {
            identifier: identifier.to_vec(),
            public_key,
            permissions: if is_admin { PERMISSION_ADMIN } else { 0 },
        })
    }

    /// Admin bit
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.permissions & PERMISSION_ADMIN != 0
    }

    fn encode(&self, slot: &mut [u8]) {
        slot.fill(0);
        slot[..self.identifier.len()].copy_from_slice(&self.identifier);
        slot[IDENTIFIER_LEN..IDENTIFIER_LEN + PUBLIC_KEY_LEN].copy_from_slice(&self.public_key);
        LittleEndian::write_u32(&mut slot[IDENTIFIER_LEN + PUBLIC_KEY_LEN..], self.permissions);
    }

    fn decode(slot: &[u8]) -> Option<Self> {
        if matches!(slot.first(), None | Some(0x00 | 0xFF)) {
            return None;
        }
        let id_len = slot[..IDENTIFIER_LEN]
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(IDENTIFIER_LEN);
        let mut public_key = [0u8; PUBLIC_KEY_LEN];
        public_key.copy_from_slice(&slot[IDENTIFIER_LEN..IDENTIFIER_LEN + PUBLIC_KEY_LEN]);

        Some(Self {
            identifier: slot[..id_len].to_vec(),
            public_key,
            permissions: LittleEndian::read_u32(&slot[IDENTIFIER_LEN + PUBLIC_KEY_LEN..RECORD_LEN]),
        })
    }
}

fn validate_identifier(identifier: &[u8]) -> Result<(), StorageError> {
    let valid = !identifier.is_empty()
        && identifier.len() <= IDENTIFIER_LEN
        && identifier[0] != 0xFF
        && !identifier.contains(&0);
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidIdentifier(identifier.len()))
    }
}

/// In-memory image of the whole region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingTable {
    slots: Vec<Option<PairingRecord>>,
}

impl PairingTable {
    /// A table with `capacity` empty slots
    #[must_use]
    pub fn empty(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Parse a region image; trailing bytes short of a full slot are ignored
    #[must_use]
    pub fn from_bytes(blob: &[u8]) -> Self {
        Self {
            slots: blob.chunks_exact(RECORD_LEN).map(PairingRecord::decode).collect(),
        }
    }

    /// Serialize to a region image; empty slots stay erased
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut blob = vec![0xFF; self.slots.len() * RECORD_LEN];
        for (slot, record) in blob.chunks_exact_mut(RECORD_LEN).zip(&self.slots) {
            if let Some(record) = record {
                record.encode(slot);
            }
        }
        blob
    }

    /// Number of slots
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// No occupied slots
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Occupied slots in slot order
    pub fn iter(&self) -> impl Iterator<Item = &PairingRecord> {
        self.slots.iter().flatten()
    }

    /// Look up a record by identifier
    #[must_use]
    pub fn find(&self, identifier: &[u8]) -> Option<&PairingRecord> {
        self.iter().find(|r| r.identifier == identifier)
    }

    /// Replace the record with the same identifier, or fill the first empty slot
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NoSpace` when neither exists.
    pub fn insert_or_update(&mut self, record: PairingRecord) -> Result<(), StorageError> {
        let index = self
            .slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|r| r.identifier == record.identifier))
            .or_else(|| self.slots.iter().position(Option::is_none))
            .ok_or(StorageError::NoSpace)?;
        self.slots[index] = Some(record);
        Ok(())
    }

    /// Remove a record by identifier
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no slot matches.
    pub fn remove(&mut self, identifier: &[u8]) -> Result<PairingRecord, StorageError> {
        self.slots
            .iter_mut()
            .find(|s| s.as_ref().is_some_and(|r| r.identifier == identifier))
            .and_then(Option::take)
            .ok_or(StorageError::NotFound)
    }

    /// At least one admin remains
    #[must_use]
    pub fn has_admin(&self) -> bool {
        self.iter().any(PairingRecord::is_admin)
    }
}

/// Pairing list persisted in a [`Flash`] region
///
/// Every mutation is read, modify, erase, rewrite of the whole region.
pub struct PairingList {
    flash: Box<dyn Flash>,
    capacity: usize,
}

impl std::fmt::Debug for PairingList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingList")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl PairingList {
    /// Use `flash` as the backing region; capacity is `size / RECORD_LEN`
    #[must_use]
    pub fn new(flash: Box<dyn Flash>) -> Self {
        let capacity = flash.size() / RECORD_LEN;
        Self { flash, capacity }
    }

    /// Number of slots
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Erase every slot
    ///
    /// # Errors
    ///
    /// Returns error if the flash operation fails.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        debug!("Clearing pairing list");
        self.update(&PairingTable::empty(self.capacity))
    }

    /// Load the whole table
    ///
    /// # Errors
    ///
    /// Returns error if the flash read fails.
    pub fn read(&mut self) -> Result<PairingTable, StorageError> {
        let mut blob = vec![0u8; self.capacity * RECORD_LEN];
        self.flash.read(0, &mut blob)?;
        Ok(PairingTable::from_bytes(&blob))
    }

    /// Erase the region and write `table`
    ///
    /// # Errors
    ///
    /// Returns error if the flash operations fail.
    pub fn update(&mut self, table: &PairingTable) -> Result<(), StorageError> {
        let size = self.flash.size();
        self.flash.erase(0, size)?;
        self.flash.write(0, &table.to_bytes())?;
        self.flash.flush()
    }

    /// Add a controller, or replace the key and permissions of an existing one
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NoSpace` when the list is full,
    /// `StorageError::InvalidIdentifier` for a bad identifier.
    pub fn insert_or_update(
        &mut self,
        identifier: &[u8],
        public_key: &[u8; PUBLIC_KEY_LEN],
        is_admin: bool,
    ) -> Result<(), StorageError> {
        let record = PairingRecord::new(identifier, *public_key, is_admin)?;
        let mut table = self.read()?;
        table.insert_or_update(record)?;
        self.update(&table)?;
        debug!(
            "Stored pairing for {} (admin: {})",
            String::from_utf8_lossy(identifier),
            is_admin
        );
        Ok(())
    }

    /// Public key of a paired controller
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown identifier.
    pub fn find_public_key(&mut self, identifier: &[u8]) -> Result<[u8; PUBLIC_KEY_LEN], StorageError> {
        self.read()?
            .find(identifier)
            .map(|r| r.public_key)
            .ok_or(StorageError::NotFound)
    }

    /// Whether `identifier` is paired with admin permission
    ///
    /// Unknown identifiers and read failures both yield `false`.
    pub fn find_is_admin(&mut self, identifier: &[u8]) -> bool {
        self.read()
            .ok()
            .and_then(|t| t.find(identifier).map(PairingRecord::is_admin))
            .unwrap_or(false)
    }

    /// Remove a controller
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown identifier.
    pub fn remove(&mut self, identifier: &[u8]) -> Result<(), StorageError> {
        let mut table = self.read()?;
        table.remove(identifier)?;
        self.update(&table)?;
        debug!("Removed pairing for {}", String::from_utf8_lossy(identifier));
        Ok(())
    }

    /// All paired controllers in slot order
    ///
    /// # Errors
    ///
    /// Returns error if the flash read fails.
    pub fn list(&mut self) -> Result<Vec<PairingRecord>, StorageError> {
        Ok(self.read()?.iter().cloned().collect())
    }

    /// Whether any admin controller is paired
    ///
    /// # Errors
    ///
    /// Returns error if the flash read fails.
    pub fn has_admin(&mut self) -> Result<bool, StorageError> {
        Ok(self.read()?.has_admin())
    }
}
