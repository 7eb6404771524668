//! Mount-time construction of the L1/L2 summaries.
//!
//! This is the only code path that reads every bit of L0. The bitmap is
//! streamed in `read_chunk_sectors` bursts and consumed 64 bits at a time:
//! each word is inverted so free sectors become ones, then its popcount is
//! attributed to the group(s) it covers, splitting the word where it
//! straddles a group boundary. Padding bits past `total_sectors` (the map is
//! sector-aligned) are masked off and never counted.

use crate::FreeSpaceError;
use crate::bits::{load_word, low_mask};
use crate::block::BlockDevice;
use crate::config::FreeSpaceConfig;
use crate::geometry::{MapLayout, SECTOR_SIZE};
use crate::map::FreeSpaceMap;
use alloc::vec::Vec;
use log::{debug, info};

impl FreeSpaceMap {
    /// Stream the volume's L0 bitmap once and derive the L1/L2 summaries.
    ///
    /// # Errors
    /// - [`FreeSpaceError::InvalidGeometry`] if `layout` is inconsistent.
    /// - [`FreeSpaceError::OutOfMemory`] if the summaries cannot be allocated.
    /// - [`FreeSpaceError::Io`] if reading the bitmap fails; nothing is kept.
    #[allow(clippy::cast_possible_truncation)]
    pub fn build<D: BlockDevice + ?Sized>(
        device: &mut D,
        layout: MapLayout,
        config: FreeSpaceConfig,
    ) -> Result<Self, FreeSpaceError> {
        let mut map = Self::try_empty(layout, config)?;
        debug!(
            "building free-space caches: {} sectors, {} groups, {} super-groups",
            layout.total_sectors, map.l1_groups, map.l2_groups
        );

        map.scan_level0(device)?;

        for g in 0..map.l1_groups {
            let count = u64::from(map.free_count[g as usize]);
            map.set_free_count(g, count);
        }
        for sg in 0..map.l2_groups {
            map.refold_super(sg);
        }

        info!(
            "free-space caches ready: {} of {} sectors free",
            map.free_sectors(),
            layout.total_sectors
        );
        Ok(map)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn scan_level0<D: BlockDevice + ?Sized>(&mut self, device: &mut D) -> Result<(), FreeSpaceError> {
        let map_start = self.layout.l0_start_sector;
        let map_len = self.layout.l0_length_sectors;
        let total_bits = self.layout.total_sectors;

        let chunk_sectors = u64::from(self.config.read_chunk_sectors.max(1)).min(map_len);
        let mut buf = Vec::new();
        buf.try_reserve_exact(chunk_sectors as usize * SECTOR_SIZE)?;
        buf.resize(chunk_sectors as usize * SECTOR_SIZE, 0);

        let mut bit_cursor = 0u64;
        let mut sector_off = 0u64;
        while sector_off < map_len && bit_cursor < total_bits {
            let sectors = (map_len - sector_off).min(chunk_sectors);
            let chunk = &mut buf[..sectors as usize * SECTOR_SIZE];
            device
                .read_sectors(map_start + sector_off, sectors as u32, chunk)
                .inspect_err(|e| {
                    log::warn!(
                        "level-0 read of {sectors} sectors at {} failed: {e}",
                        map_start + sector_off
                    );
                })?;

            let bits_in_chunk = (chunk.len() as u64 * 8).min(total_bits - bit_cursor);
            self.accumulate_free_bits(chunk, bit_cursor, bits_in_chunk);

            bit_cursor += bits_in_chunk;
            sector_off += sectors;
        }
        Ok(())
    }

    /// Add the free (zero) bits among the first `bits` bits of `chunk` to the
    /// counters of the groups they belong to. `first_sector` is the sector
    /// described by the chunk's first bit.
    fn accumulate_free_bits(&mut self, chunk: &[u8], first_sector: u64, bits: u64) {
        let group_sectors = self.config.geometry.group_sectors();
        let mut pos = first_sector;
        let mut left = bits;
        let mut byte = 0usize;

        while left > 0 {
            let valid = left.min(64);
            let mut free = !load_word(chunk, byte) & low_mask(valid);
            let mut at = pos;
            let mut remaining = valid;

            while free != 0 && remaining != 0 {
                let g = at / group_sectors;
                let to_boundary = (g + 1) * group_sectors - at;
                let take = remaining.min(to_boundary);
                let seg = free & low_mask(take);
                if seg != 0 {
                    self.add_free(g, u64::from(seg.count_ones()));
                }
                free = if take >= 64 { 0 } else { free >> take };
                at += take;
                remaining -= take;
            }

            pos += valid;
            left -= valid;
            byte += 8;
        }
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn add_free(&mut self, g: u64, count: u64) {
        let size = self.group_size(g);
        let slot = &mut self.free_count[g as usize];
        // saturate at the group size; sizes fit u32
        *slot = (u64::from(*slot) + count).min(size) as u32;
    }
}
