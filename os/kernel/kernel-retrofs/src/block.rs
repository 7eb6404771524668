//! Sector-granular block I/O consumed by the free-space map.

use crate::geometry::SECTOR_SIZE;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;

/// Fixed-size sector transport (AHCI, NVMe, virtio, or a RAM disk).
///
/// Addresses are relative to the start of the volume. Implementations must
/// reject requests that run past [`sector_count`](Self::sector_count) and
/// buffers whose length is not exactly `count * SECTOR_SIZE` bytes; the helper
/// [`check_request`] does both.
pub trait BlockDevice {
    /// Number of addressable sectors.
    fn sector_count(&self) -> u64;

    /// Read `count` sectors starting at `start` into `buf`.
    ///
    /// # Errors
    /// [`BlockIoError`] if the range or buffer is invalid or the transfer fails.
    fn read_sectors(&mut self, start: u64, count: u32, buf: &mut [u8]) -> Result<(), BlockIoError>;

    /// Write `count` sectors starting at `start` from `buf`.
    ///
    /// # Errors
    /// [`BlockIoError`] if the range or buffer is invalid or the transfer fails.
    fn write_sectors(&mut self, start: u64, count: u32, buf: &[u8]) -> Result<(), BlockIoError>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for &mut D {
    fn sector_count(&self) -> u64 {
        (**self).sector_count()
    }

    fn read_sectors(&mut self, start: u64, count: u32, buf: &mut [u8]) -> Result<(), BlockIoError> {
        (**self).read_sectors(start, count, buf)
    }

    fn write_sectors(&mut self, start: u64, count: u32, buf: &[u8]) -> Result<(), BlockIoError> {
        (**self).write_sectors(start, count, buf)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockIoError {
    #[error("sectors {start}..+{count} lie outside the device")]
    OutOfRange { start: u64, count: u32 },
    #[error("buffer holds {actual} bytes, transfer needs {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("device transfer failed")]
    Device,
}

/// Validates a transfer against the device size and the buffer length.
///
/// # Errors
/// [`BlockIoError::OutOfRange`] or [`BlockIoError::BufferSize`].
#[allow(clippy::cast_possible_truncation)]
pub fn check_request(
    sector_count: u64,
    start: u64,
    count: u32,
    buf_len: usize,
) -> Result<(), BlockIoError> {
    match start.checked_add(u64::from(count)) {
        Some(end) if end <= sector_count => {}
        _ => return Err(BlockIoError::OutOfRange { start, count }),
    }
    let expected = count as usize * SECTOR_SIZE;
    if buf_len != expected {
        return Err(BlockIoError::BufferSize {
            expected,
            actual: buf_len,
        });
    }
    Ok(())
}

/// In-memory block device.
///
/// Sectors are stored sparsely; a sector that was never written reads back as
/// zeros, so multi-terabyte volumes cost memory only for what is written.
#[derive(Clone, Debug, Default)]
pub struct RamDisk {
    sectors: u64,
    data: BTreeMap<u64, Box<[u8; SECTOR_SIZE]>>,
}

impl RamDisk {
    #[must_use]
    pub const fn new(sectors: u64) -> Self {
        Self {
            sectors,
            data: BTreeMap::new(),
        }
    }
}

impl BlockDevice for RamDisk {
    fn sector_count(&self) -> u64 {
        self.sectors
    }

    fn read_sectors(&mut self, start: u64, count: u32, buf: &mut [u8]) -> Result<(), BlockIoError> {
        check_request(self.sectors, start, count, buf.len())?;
        for (lba, out) in (start..).zip(buf.chunks_exact_mut(SECTOR_SIZE)) {
            match self.data.get(&lba) {
                Some(sector) => out.copy_from_slice(&sector[..]),
                None => out.fill(0),
            }
        }
        Ok(())
    }

    fn write_sectors(&mut self, start: u64, count: u32, buf: &[u8]) -> Result<(), BlockIoError> {
        check_request(self.sectors, start, count, buf.len())?;
        for (lba, src) in (start..).zip(buf.chunks_exact(SECTOR_SIZE)) {
            if src.iter().all(|&b| b == 0) {
                self.data.remove(&lba);
                continue;
            }
            let sector = self
                .data
                .entry(lba)
                .or_insert_with(|| Box::new([0u8; SECTOR_SIZE]));
            sector.copy_from_slice(src);
        }
        Ok(())
    }
}
