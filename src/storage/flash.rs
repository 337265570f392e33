use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::StorageError;

/// Erased flash reads back as all ones
const ERASED: u8 = 0xFF;

/// A NOR-flash-like byte region
///
/// Writes can only clear bits; [`Flash::erase`] sets a range back to `0xFF`.
/// Callers erase before rewriting.
pub trait Flash: Send {
    /// Region size in bytes
    fn size(&self) -> usize;

    /// Read `buf.len()` bytes at `offset`
    ///
    /// # Errors
    ///
    /// Returns error if the range leaves the region or the backend fails.
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Reset `len` bytes at `offset` to the erased state
    ///
    /// # Errors
    ///
    /// Returns error if the range leaves the region or the backend fails.
    fn erase(&mut self, offset: usize, len: usize) -> Result<(), StorageError>;

    /// Program `data` at `offset`
    ///
    /// # Errors
    ///
    /// Returns error if the range leaves the region or the backend fails.
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError>;

    /// Make previous writes durable
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn flush(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

fn check_range(offset: usize, len: usize, size: usize) -> Result<(), StorageError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(StorageError::OutOfBounds { offset, len, size }),
    }
}

/// RAM-backed flash region
#[derive(Debug, Clone)]
pub struct MemoryFlash {
    data: Vec<u8>,
}

impl MemoryFlash {
    /// Create an erased region of `size` bytes
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![ERASED; size],
        }
    }

    /// Raw region contents
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Flash for MemoryFlash {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_range(offset, buf.len(), self.data.len())?;
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        Ok(())
    }

    fn erase(&mut self, offset: usize, len: usize) -> Result<(), StorageError> {
        check_range(offset, len, self.data.len())?;
        self.data[offset..offset + len].fill(ERASED);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        check_range(offset, data.len(), self.data.len())?;
        for (cell, byte) in self.data[offset..offset + data.len()].iter_mut().zip(data) {
            *cell &= *byte;
        }
        Ok(())
    }
}

/// File-backed flash region, persistent across restarts
#[derive(Debug)]
pub struct FileFlash {
    path: PathBuf,
    file: File,
    size: usize,
}

impl FileFlash {
    /// Open or create the region file at `path`
    ///
    /// A new or short file is padded with erased bytes up to `size`.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or resized.
    pub fn open(path: impl AsRef<Path>, size: usize) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let current = usize::try_from(file.metadata()?.len()).unwrap_or(usize::MAX);
        if current < size {
            file.seek(SeekFrom::Start(current as u64))?;
            file.write_all(&vec![ERASED; size - current])?;
            file.sync_all()?;
        }

        Ok(Self { path, file, size })
    }

    /// Backing file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Flash for FileFlash {
    fn size(&self) -> usize {
        self.size
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_range(offset, buf.len(), self.size)?;
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn erase(&mut self, offset: usize, len: usize) -> Result<(), StorageError> {
        check_range(offset, len, self.size)?;
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(&vec![ERASED; len])?;
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        check_range(offset, data.len(), self.size)?;
        let mut current = vec![0u8; data.len()];
        self.read(offset, &mut current)?;
        for (cell, byte) in current.iter_mut().zip(data) {
            *cell &= *byte;
        }
        self.file.seek(SeekFrom::Start(offset as u64))?;
        self.file.write_all(&current)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_flash_starts_erased() {
        let mut flash = MemoryFlash::new(16);
        let mut buf = [0u8; 16];
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0xFF; 16]);
    }

    #[test]
    fn test_write_only_clears_bits() {
        let mut flash = MemoryFlash::new(4);
        flash.write(0, &[0x0F, 0xF0, 0x00, 0xFF]).unwrap();
        flash.write(0, &[0xF3, 0xFF, 0xFF, 0x11]).unwrap();
        assert_eq!(flash.as_bytes(), &[0x03, 0xF0, 0x00, 0x11]);

        flash.erase(0, 2).unwrap();
        assert_eq!(flash.as_bytes(), &[0xFF, 0xFF, 0x00, 0x11]);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut flash = MemoryFlash::new(8);
        assert!(matches!(
            flash.write(6, &[0; 4]),
            Err(StorageError::OutOfBounds { .. })
        ));
        let mut buf = [0u8; 1];
        assert!(flash.read(usize::MAX, &mut buf).is_err());
    }

    #[test]
    fn test_file_flash_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.bin");

        {
            let mut flash = FileFlash::open(&path, 32).unwrap();
            flash.erase(0, 32).unwrap();
            flash.write(4, b"abcd").unwrap();
            flash.flush().unwrap();
        }

        let mut flash = FileFlash::open(&path, 32).unwrap();
        let mut buf = [0u8; 6];
        flash.read(3, &mut buf).unwrap();
        assert_eq!(&buf, b"\xFFabcd\xFF");
    }
}
