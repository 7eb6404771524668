use crate::FreeSpaceError;
use crate::block::BlockDevice;
use crate::config::FreeSpaceConfig;
use crate::extent::Extent;
use crate::geometry::{MapLayout, SECTOR_SIZE};
use crate::map::FreeSpaceMap;
use alloc::vec::Vec;
use log::debug;

impl FreeSpaceMap {
    /// Lay out and initialize an empty free-space map on `device`.
    ///
    /// The bitmap is placed at the tail of the device (see
    /// [`MapLayout::for_volume`]) and cleared. The first
    /// `reserved_head_sectors` sectors (boot and description blocks) and the
    /// bitmap's own sectors are then marked used, so they are never handed out.
    ///
    /// # Errors
    /// - [`FreeSpaceError::InvalidGeometry`] if the device is too small for
    ///   its bitmap or the reserved head overlaps it.
    /// - [`FreeSpaceError::Io`] if clearing or marking the bitmap fails.
    /// - [`FreeSpaceError::OutOfMemory`] if a buffer cannot be allocated.
    pub fn format<D: BlockDevice + ?Sized>(
        device: &mut D,
        reserved_head_sectors: u64,
        config: FreeSpaceConfig,
    ) -> Result<Self, FreeSpaceError> {
        let layout = MapLayout::for_volume(device.sector_count())?;
        let head = Extent::new(0, reserved_head_sectors);
        if head.overlaps(&layout.map_extent()) {
            return Err(FreeSpaceError::InvalidGeometry(
                "reserved head overlaps the level-0 bitmap",
            ));
        }
        debug!(
            "formatting free-space map: {} sectors, bitmap at {}",
            layout.total_sectors,
            layout.map_extent()
        );

        clear_bitmap(device, layout, config.read_chunk_sectors)?;

        let mut map = Self::build(device, layout, config)?;
        if head.length > 0 {
            map.mark(device, head.start, head.length, true)?;
        }
        let bitmap = layout.map_extent();
        map.mark(device, bitmap.start, bitmap.length, true)?;
        Ok(map)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn clear_bitmap<D: BlockDevice + ?Sized>(
    device: &mut D,
    layout: MapLayout,
    chunk_sectors: u32,
) -> Result<(), FreeSpaceError> {
    let chunk = u64::from(chunk_sectors.max(1)).min(layout.l0_length_sectors);
    let mut zeros = Vec::new();
    zeros.try_reserve_exact(chunk as usize * SECTOR_SIZE)?;
    zeros.resize(chunk as usize * SECTOR_SIZE, 0);

    let mut done = 0;
    while done < layout.l0_length_sectors {
        let sectors = (layout.l0_length_sectors - done).min(chunk);
        let lba = layout.l0_start_sector + done;
        device
            .write_sectors(lba, sectors as u32, &zeros[..sectors as usize * SECTOR_SIZE])
            .inspect_err(|e| log::warn!("clearing bitmap sectors at {lba} failed: {e}"))?;
        done += sectors;
    }
    Ok(())
}
