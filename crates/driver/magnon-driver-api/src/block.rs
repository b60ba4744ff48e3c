//! Sector I/O interface.
//!
//! [`BlockDevice`] is the seam between the volume and whatever actually
//! stores sectors: an SD/MMC host behind SPI, a loopback file, or the test
//! RamDisk. The async read/write calls are the storage stack's only
//! suspension points; everything between two of them runs on the calling
//! task.

use core::fmt;

/// Failures a block device can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    /// The requested sector lies beyond the device's capacity.
    OutOfRange,
    /// The caller's buffer cannot hold the requested sectors.
    BufferTooSmall,
    /// The transfer failed at the host controller or on the bus.
    Transfer,
    /// The medium is absent or still initializing.
    NotReady,
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange => f.write_str("sector out of range"),
            Self::BufferTooSmall => f.write_str("buffer too small"),
            Self::Transfer => f.write_str("transfer failed"),
            Self::NotReady => f.write_str("device not ready"),
        }
    }
}

/// Fixed-size sector storage addressed by LBA.
///
/// Implementations supply one sector-sized read and write plus the device
/// geometry; the multi-sector calls are provided on top of those. A call may
/// suspend while the hardware completes, which is how a slow SPI transfer
/// yields the core to other tasks.
#[allow(async_fn_in_trait)]
pub trait BlockDevice: Send + Sync {
    /// Reads the sector at `sector` into the front of `buf`.
    ///
    /// `buf` must hold at least [`sector_size()`](Self::sector_size) bytes.
    async fn read_sector(&self, sector: u64, buf: &mut [u8]) -> Result<(), IoError>;

    /// Writes the sector at `sector` from the front of `buf`.
    ///
    /// `buf` must hold at least [`sector_size()`](Self::sector_size) bytes.
    async fn write_sector(&self, sector: u64, buf: &[u8]) -> Result<(), IoError>;

    /// Bytes per sector; the volume requires 512.
    fn sector_size(&self) -> usize;

    /// Device capacity in sectors.
    fn sector_count(&self) -> u64;

    /// Reads `count` sectors starting at `start_sector`, one into each
    /// sector-sized chunk of `buf`.
    async fn read_sectors(
        &self,
        start_sector: u64,
        count: u64,
        buf: &mut [u8],
    ) -> Result<(), IoError> {
        let size = self.sector_size();
        if buf.len() < size.saturating_mul(count as usize) {
            return Err(IoError::BufferTooSmall);
        }
        let mut lba = start_sector;
        for chunk in buf.chunks_exact_mut(size).take(count as usize) {
            self.read_sector(lba, chunk).await?;
            lba += 1;
        }
        Ok(())
    }

    /// Writes `count` sectors starting at `start_sector`, one from each
    /// sector-sized chunk of `buf`.
    async fn write_sectors(
        &self,
        start_sector: u64,
        count: u64,
        buf: &[u8],
    ) -> Result<(), IoError> {
        let size = self.sector_size();
        if buf.len() < size.saturating_mul(count as usize) {
            return Err(IoError::BufferTooSmall);
        }
        let mut lba = start_sector;
        for chunk in buf.chunks_exact(size).take(count as usize) {
            self.write_sector(lba, chunk).await?;
            lba += 1;
        }
        Ok(())
    }
}
