//! A mounted volume: block device, free-space map, and the lock around both.

use crate::FreeSpaceError;
use crate::block::BlockDevice;
use crate::config::FreeSpaceConfig;
use crate::extent::Extent;
use crate::geometry::{MapLayout, SECTOR_SIZE};
use crate::lock::{VolumeGuard, VolumeLock};
use crate::map::FreeSpaceMap;
use crate::verify::VerifyReport;
use log::{debug, info};

/// Everything the volume lock protects.
#[derive(Debug)]
pub struct VolumeState<D> {
    device: D,
    map: FreeSpaceMap,
}

impl<D: BlockDevice> VolumeState<D> {
    #[must_use]
    pub const fn map(&self) -> &FreeSpaceMap {
        &self.map
    }

    pub const fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// See [`FreeSpaceMap::find_free`].
    ///
    /// # Errors
    /// As [`FreeSpaceMap::find_free`].
    pub fn find_free(&mut self, need: u64) -> Result<Option<u64>, FreeSpaceError> {
        self.map.find_free(&mut self.device, need)
    }

    /// See [`FreeSpaceMap::mark`].
    ///
    /// # Errors
    /// As [`FreeSpaceMap::mark`].
    pub fn mark(&mut self, start: u64, length: u64, used: bool) -> Result<(), FreeSpaceError> {
        self.map.mark(&mut self.device, start, length, used)
    }

    /// Find `need` free sectors and mark them used.
    ///
    /// # Errors
    /// As [`find_free`](Self::find_free) and [`mark`](Self::mark).
    pub fn allocate(&mut self, need: u64) -> Result<Option<Extent>, FreeSpaceError> {
        let Some(start) = self.find_free(need)? else {
            debug!("no free extent of {need} sectors");
            return Ok(None);
        };
        self.mark(start, need, true)?;
        Ok(Some(Extent::new(start, need)))
    }
}

/// A volume whose allocator state is shared between threads.
///
/// Each method takes the lock once, so [`allocate`](Self::allocate) finds and
/// commits an extent atomically. Longer sequences go through
/// [`lock`](Self::lock).
#[derive(Debug)]
pub struct Volume<D> {
    state: VolumeLock<VolumeState<D>>,
}

impl<D: BlockDevice> Volume<D> {
    /// Mount an existing volume: stream its bitmap and build the caches.
    ///
    /// # Errors
    /// As [`FreeSpaceMap::build`].
    pub fn mount(
        mut device: D,
        layout: MapLayout,
        config: FreeSpaceConfig,
    ) -> Result<Self, FreeSpaceError> {
        let map = FreeSpaceMap::build(&mut device, layout, config)?;
        info!(
            "volume mounted: {} sectors, {} free",
            layout.total_sectors,
            map.free_sectors()
        );
        Ok(Self::from_parts(device, map))
    }

    /// Create a fresh map on `device` and mount the result.
    ///
    /// # Errors
    /// As [`FreeSpaceMap::format`].
    pub fn format(
        mut device: D,
        reserved_head_sectors: u64,
        config: FreeSpaceConfig,
    ) -> Result<Self, FreeSpaceError> {
        let map = FreeSpaceMap::format(&mut device, reserved_head_sectors, config)?;
        info!(
            "volume formatted: {} sectors, {} free",
            map.total_sectors(),
            map.free_sectors()
        );
        Ok(Self::from_parts(device, map))
    }

    const fn from_parts(device: D, map: FreeSpaceMap) -> Self {
        Self {
            state: VolumeLock::new(VolumeState { device, map }),
        }
    }

    /// Hold the volume lock, e.g. to find and commit several extents at once.
    pub fn lock(&self) -> VolumeGuard<'_, VolumeState<D>> {
        self.state.lock()
    }

    /// # Errors
    /// As [`VolumeState::allocate`].
    pub fn allocate(&self, need: u64) -> Result<Option<Extent>, FreeSpaceError> {
        self.lock().allocate(need)
    }

    /// Return an extent to the free pool.
    ///
    /// # Errors
    /// As [`FreeSpaceMap::mark`].
    pub fn release(&self, extent: Extent) -> Result<(), FreeSpaceError> {
        self.lock().mark(extent.start, extent.length, false)
    }

    /// # Errors
    /// As [`FreeSpaceMap::find_free`].
    pub fn find_free(&self, need: u64) -> Result<Option<u64>, FreeSpaceError> {
        self.lock().find_free(need)
    }

    /// # Errors
    /// As [`FreeSpaceMap::mark`].
    pub fn mark(&self, start: u64, length: u64, used: bool) -> Result<(), FreeSpaceError> {
        self.lock().mark(start, length, used)
    }

    /// # Errors
    /// As [`FreeSpaceMap::verify`].
    pub fn verify(&self) -> Result<VerifyReport, FreeSpaceError> {
        let mut state = self.lock();
        let VolumeState { device, map } = &mut *state;
        map.verify(device)
    }

    #[must_use]
    pub fn layout(&self) -> MapLayout {
        self.lock().map.layout()
    }

    #[must_use]
    pub fn free_sectors(&self) -> u64 {
        self.lock().map.free_sectors()
    }

    #[must_use]
    pub fn used_sectors(&self) -> u64 {
        self.lock().map.used_sectors()
    }

    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        self.free_sectors() * SECTOR_SIZE as u64
    }

    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.used_sectors() * SECTOR_SIZE as u64
    }

    /// Drop the caches and hand the device back. L0 is always current, so
    /// nothing needs to be flushed.
    pub fn unmount(self) -> D {
        let state = self.state.into_inner();
        debug!("volume unmounted, {} sectors free", state.map.free_sectors());
        state.device
    }
}
