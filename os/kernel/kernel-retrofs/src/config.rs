use crate::geometry::{DEFAULT_READ_CHUNK_SECTORS, Geometry};

/// Tunables for building and operating a free-space map.
///
/// Only [`geometry`](Self::geometry) affects results; the read-ahead chunk
/// size only changes how many I/O round-trips the mount-time scan needs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FreeSpaceConfig {
    pub geometry: Geometry,
    /// L0 sectors read per request while building the caches.
    pub read_chunk_sectors: u32,
}

impl FreeSpaceConfig {
    #[must_use]
    pub const fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            read_chunk_sectors: DEFAULT_READ_CHUNK_SECTORS,
        }
    }

    /// Set the read-ahead; zero is treated as one sector.
    #[must_use]
    pub const fn with_read_chunk_sectors(mut self, sectors: u32) -> Self {
        self.read_chunk_sectors = if sectors == 0 { 1 } else { sectors };
        self
    }
}

impl Default for FreeSpaceConfig {
    fn default() -> Self {
        Self::new(Geometry::DEFAULT)
    }
}
