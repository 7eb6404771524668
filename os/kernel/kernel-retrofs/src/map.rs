//! The in-RAM free-space summaries of one mounted volume.

use crate::FreeSpaceError;
use crate::bits::Bitset;
use crate::block::BlockDevice;
use crate::config::FreeSpaceConfig;
use crate::geometry::{Geometry, MapLayout, SECTOR_BITS, SECTOR_SIZE};
use alloc::vec::Vec;
use core::ops::Range;

/// Level-1 and Level-2 summaries derived from a volume's L0 bitmap.
///
/// The map is a pure cache of the on-disk bitmap: it is built once per mount
/// ([`build`](Self::build)), kept exact by every [`mark`](Self::mark), and
/// simply dropped at unmount.
///
/// # Invariants
/// - `free_count[g]` equals the number of zero bits in group `g`'s L0 bits.
/// - `l1_not_full[g] == (free_count[g] > 0)` and
///   `l1_all_free[g] == (free_count[g] == group_size(g))`.
/// - `l2_not_full[sg]` is the OR of its children's `l1_not_full`,
///   `l2_all_free[sg]` the AND of their `l1_all_free`.
#[derive(Clone, Debug)]
pub struct FreeSpaceMap {
    pub(crate) layout: MapLayout,
    pub(crate) config: FreeSpaceConfig,
    pub(crate) l1_groups: u64,
    pub(crate) l2_groups: u64,
    pub(crate) free_count: Vec<u32>,
    pub(crate) l1_not_full: Bitset,
    pub(crate) l1_all_free: Bitset,
    pub(crate) l2_not_full: Bitset,
    pub(crate) l2_all_free: Bitset,
}

impl FreeSpaceMap {
    /// Allocate zeroed summaries for `layout` (every group reads as full).
    pub(crate) fn try_empty(
        layout: MapLayout,
        config: FreeSpaceConfig,
    ) -> Result<Self, FreeSpaceError> {
        layout.validate()?;
        let geometry = config.geometry;
        let l1_groups = layout.total_sectors.div_ceil(geometry.group_sectors());
        let l2_groups = l1_groups.div_ceil(geometry.groups_per_super());

        let groups = usize::try_from(l1_groups).map_err(|_| FreeSpaceError::OutOfMemory)?;
        let mut free_count = Vec::new();
        free_count.try_reserve_exact(groups)?;
        free_count.resize(groups, 0);

        Ok(Self {
            layout,
            config,
            l1_groups,
            l2_groups,
            free_count,
            l1_not_full: Bitset::try_new(l1_groups)?,
            l1_all_free: Bitset::try_new(l1_groups)?,
            l2_not_full: Bitset::try_new(l2_groups)?,
            l2_all_free: Bitset::try_new(l2_groups)?,
        })
    }

    #[inline]
    #[must_use]
    pub const fn layout(&self) -> MapLayout {
        self.layout
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> FreeSpaceConfig {
        self.config
    }

    #[inline]
    #[must_use]
    pub const fn geometry(&self) -> Geometry {
        self.config.geometry
    }

    #[inline]
    #[must_use]
    pub const fn total_sectors(&self) -> u64 {
        self.layout.total_sectors
    }

    /// Number of groups (L1 entries).
    #[inline]
    #[must_use]
    pub const fn l1_groups(&self) -> u64 {
        self.l1_groups
    }

    /// Number of super-groups (L2 entries).
    #[inline]
    #[must_use]
    pub const fn l2_groups(&self) -> u64 {
        self.l2_groups
    }

    /// First sector of group `g`.
    #[inline]
    #[must_use]
    pub const fn group_start(&self, g: u64) -> u64 {
        g * self.config.geometry.group_sectors()
    }

    /// Number of sectors in group `g`; only the tail group can be short.
    #[inline]
    #[must_use]
    pub const fn group_size(&self, g: u64) -> u64 {
        let start = self.group_start(g);
        let end = start + self.config.geometry.group_sectors();
        if end <= self.layout.total_sectors {
            self.config.geometry.group_sectors()
        } else {
            self.layout.total_sectors.saturating_sub(start)
        }
    }

    /// The group that holds `sector`.
    #[inline]
    #[must_use]
    pub const fn group_of(&self, sector: u64) -> u64 {
        sector / self.config.geometry.group_sectors()
    }

    /// The child groups of super-group `sg`.
    #[inline]
    #[must_use]
    pub fn super_children(&self, sg: u64) -> Range<u64> {
        let per_super = self.config.geometry.groups_per_super();
        let first = sg * per_super;
        first..(first + per_super).min(self.l1_groups)
    }

    /// # Panics
    /// Panics if `g` is not a group of this volume.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn free_count(&self, g: u64) -> u64 {
        u64::from(self.free_count[g as usize])
    }

    /// # Panics
    /// Panics if `g` is not a group of this volume.
    #[inline]
    #[must_use]
    pub fn l1_not_full(&self, g: u64) -> bool {
        self.l1_not_full.get(g)
    }

    /// # Panics
    /// Panics if `g` is not a group of this volume.
    #[inline]
    #[must_use]
    pub fn l1_all_free(&self, g: u64) -> bool {
        self.l1_all_free.get(g)
    }

    /// # Panics
    /// Panics if `sg` is not a super-group of this volume.
    #[inline]
    #[must_use]
    pub fn l2_not_full(&self, sg: u64) -> bool {
        self.l2_not_full.get(sg)
    }

    /// # Panics
    /// Panics if `sg` is not a super-group of this volume.
    #[inline]
    #[must_use]
    pub fn l2_all_free(&self, sg: u64) -> bool {
        self.l2_all_free.get(sg)
    }

    /// Total free sectors, summed over the L1 counters.
    #[must_use]
    pub fn free_sectors(&self) -> u64 {
        let free: u64 = self.free_count.iter().map(|&c| u64::from(c)).sum();
        free.min(self.layout.total_sectors)
    }

    #[must_use]
    pub fn used_sectors(&self) -> u64 {
        self.layout.total_sectors - self.free_sectors()
    }

    /// Store a new free count for `g` and re-derive its L1 flags.
    ///
    /// The owning super-group is left stale; callers refold it with
    /// [`refold_super`](Self::refold_super) once they are done with the group.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn set_free_count(&mut self, g: u64, count: u64) {
        let size = self.group_size(g);
        let count = count.min(size);
        // group sizes are bounded by u32::MAX (see `Geometry::new`)
        self.free_count[g as usize] = count as u32;
        self.l1_not_full.set(g, count > 0);
        self.l1_all_free.set(g, count == size);
    }

    /// Recompute the L2 flags of super-group `sg` from its children.
    pub(crate) fn refold_super(&mut self, sg: u64) {
        let mut any_free = false;
        let mut all_free = true;
        for g in self.super_children(sg) {
            any_free |= self.l1_not_full.get(g);
            all_free &= self.l1_all_free.get(g);
        }
        self.l2_not_full.set(sg, any_free);
        self.l2_all_free.set(sg, all_free);
    }

    /// Groups worth looking at: not-full groups inside not-full super-groups.
    pub(crate) fn candidate_groups(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.l2_groups)
            .filter(move |&sg| self.l2_not_full.get(sg))
            .flat_map(move |sg| self.super_children(sg))
            .filter(move |&g| self.l1_not_full.get(g))
    }

    /// Where group `g`'s bits live in the L0 bitmap.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn window(&self, g: u64) -> GroupWindow {
        let first_bit = self.group_start(g);
        let bit_offset = first_bit % SECTOR_BITS;
        let bits = self.group_size(g);
        let sectors = (bit_offset + bits).div_ceil(SECTOR_BITS);
        GroupWindow {
            lba: self.layout.l0_start_sector + first_bit / SECTOR_BITS,
            // at most u32::MAX / SECTOR_BITS + 1 sectors per group
            sectors: sectors as u32,
            bit_offset,
            bits,
            owns_sectors: self.config.geometry.groups_own_sectors()
                && bits == sectors * SECTOR_BITS,
        }
    }

    /// A buffer large enough for any group window.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn scratch(&self) -> Result<Vec<u8>, FreeSpaceError> {
        let group_sectors = self.config.geometry.group_sectors();
        let bytes = group_sectors.div_ceil(SECTOR_BITS) as usize * SECTOR_SIZE;
        let mut buf = Vec::new();
        buf.try_reserve_exact(bytes)?;
        buf.resize(bytes, 0);
        Ok(buf)
    }
}

/// The L0 sectors that hold one group's bits.
///
/// With the default geometry this is exactly one bitmap sector per group;
/// smaller groups share a sector and start at `bit_offset` inside it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct GroupWindow {
    /// Absolute (volume-relative) sector of the first bitmap sector.
    pub lba: u64,
    pub sectors: u32,
    /// First bit of the group inside the loaded sectors.
    pub bit_offset: u64,
    /// Number of valid bits (the group size).
    pub bits: u64,
    /// Every bit of the loaded sectors belongs to this group, so they can be
    /// rewritten without a read. False for shared sectors and for a short
    /// tail group, whose sector also holds padding.
    pub owns_sectors: bool,
}

impl GroupWindow {
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn byte_len(&self) -> usize {
        self.sectors as usize * SECTOR_SIZE
    }

    /// Bit range of the group inside the loaded buffer.
    #[inline]
    pub const fn bit_range(&self) -> Range<u64> {
        self.bit_offset..self.bit_offset + self.bits
    }

    pub fn read<'b, D: BlockDevice + ?Sized>(
        &self,
        device: &mut D,
        scratch: &'b mut [u8],
    ) -> Result<&'b mut [u8], FreeSpaceError> {
        let buf = &mut scratch[..self.byte_len()];
        device
            .read_sectors(self.lba, self.sectors, buf)
            .inspect_err(|e| log::warn!("level-0 read at sector {} failed: {e}", self.lba))?;
        Ok(buf)
    }

    pub fn write<D: BlockDevice + ?Sized>(
        &self,
        device: &mut D,
        bits: &[u8],
    ) -> Result<(), FreeSpaceError> {
        device
            .write_sectors(self.lba, self.sectors, &bits[..self.byte_len()])
            .inspect_err(|e| log::warn!("level-0 write at sector {} failed: {e}", self.lba))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FreeSpaceConfig, Geometry};

    fn empty(total: u64, geometry: Geometry) -> FreeSpaceMap {
        let layout = MapLayout::for_volume(total).unwrap();
        FreeSpaceMap::try_empty(layout, FreeSpaceConfig::new(geometry)).unwrap()
    }

    #[test]
    fn small_groups_share_a_bitmap_sector() {
        let map = empty(10_000, Geometry::new(1024, 4).unwrap());
        let w = map.window(5);
        assert_eq!(w.lba, map.layout().l0_start_sector + 1);
        assert_eq!(w.bit_offset, 1024);
        assert_eq!(w.sectors, 1);
        assert!(!w.owns_sectors);
        assert_eq!(w.bit_range(), 1024..2048);
    }

    #[test]
    fn only_full_sector_groups_own_their_sectors() {
        let total = 2 * 8192 + 5000;
        let map = empty(total, Geometry::new(8192, 4).unwrap());
        let full = map.window(1);
        assert_eq!(full.lba, map.layout().l0_start_sector + 2);
        assert_eq!(full.sectors, 2);
        assert!(full.owns_sectors);

        // 5000 bits need two sectors but leave padding in the second
        let tail = map.window(2);
        assert_eq!(tail.bits, 5000);
        assert_eq!(tail.sectors, 2);
        assert!(!tail.owns_sectors);
    }

    #[test]
    fn flags_follow_counts_and_fold_upwards() {
        let mut map = empty(10_000, Geometry::new(1024, 4).unwrap());
        assert_eq!(map.l1_groups(), 10);
        assert_eq!(map.l2_groups(), 3);
        assert_eq!(map.super_children(2), 8..10);

        map.set_free_count(8, 1024);
        map.set_free_count(9, 10_000 - 9 * 1024);
        map.refold_super(2);
        assert!(map.l2_all_free(2));

        map.set_free_count(9, 0);
        map.refold_super(2);
        assert!(map.l2_not_full(2));
        assert!(!map.l2_all_free(2));
        assert_eq!(map.candidate_groups().collect::<Vec<_>>(), [8]);
    }
}
