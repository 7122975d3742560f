//! In-memory block device implementation

use crate::filesys::{BlockDevice, FsError};
use alloc::vec;
use alloc::vec::Vec;

/// Block device that stores data in memory
pub struct MemoryBlockDevice {
    /// Sector payloads, each sector_size bytes
    sectors: Vec<Vec<u8>>,

    /// Size of each sector in bytes
    sector_size: usize,
}

impl MemoryBlockDevice {
    /// Creates a new memory block device with given geometry
    pub fn new(total_sectors: u64, sector_size: usize) -> Self {
        let sectors = (0..total_sectors).map(|_| vec![0; sector_size]).collect();
        Self {
            sectors,
            sector_size,
        }
    }

    fn validate(&self, lba: u64, count: usize, buf_len: usize) -> Result<(), FsError> {
        if lba as usize + count > self.sectors.len() {
            return Err(FsError::IOError);
        }
        if buf_len != count * self.sector_size {
            return Err(FsError::IOError);
        }
        Ok(())
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn read_sectors(&mut self, lba: u64, count: usize, buf: &mut [u8]) -> Result<(), FsError> {
        self.validate(lba, count, buf.len())?;
        for (i, chunk) in buf.chunks_exact_mut(self.sector_size).enumerate() {
            chunk.copy_from_slice(&self.sectors[lba as usize + i]);
        }
        Ok(())
    }

    fn write_sectors(&mut self, lba: u64, count: usize, buf: &[u8]) -> Result<(), FsError> {
        self.validate(lba, count, buf.len())?;
        for (i, chunk) in buf.chunks_exact(self.sector_size).enumerate() {
            self.sectors[lba as usize + i].copy_from_slice(chunk);
        }
        Ok(())
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn total_sectors(&self) -> u64 {
        self.sectors.len() as u64
    }
}
