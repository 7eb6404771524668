//! Sizes and on-disk placement of the free-space map.
//!
//! ```text
//!  sector:  0 ......................................... total_sectors
//!           | head metadata |   file data ...   | L0 bitmap (tail) |
//!                                               ^ l0_start_sector
//!
//!  L0 bit i  <->  sector i          (LSB first, 1 = used, 0 = free)
//!  group g   =  sectors [g*G, min((g+1)*G, total))
//!  super sg  =  groups  [sg*S, min((sg+1)*S, l1_groups))
//! ```

use crate::FreeSpaceError;
use crate::bits::byte_len_for_bits;

/// Size of a sector in bytes; the allocation atom.
pub const SECTOR_SIZE: usize = 512;

/// Number of L0 bits held by one bitmap sector.
pub const SECTOR_BITS: u64 = SECTOR_SIZE as u64 * 8;

/// Default group size: one L0 sector's worth of bits (2 MiB of data).
pub const DEFAULT_GROUP_SECTORS: u64 = SECTOR_BITS;

/// Default number of groups summarized by one super-group.
pub const DEFAULT_GROUPS_PER_SUPER: u64 = 1024;

/// Default mount-time read-ahead, in sectors (64 KiB).
pub const DEFAULT_READ_CHUNK_SECTORS: u32 = 128;

/// Group (L1) and super-group (L2) sizes.
///
/// A group's bits must map onto L0 sectors cleanly: either the group size
/// divides [`SECTOR_BITS`] (several groups share one bitmap sector) or it is
/// a multiple of it (each group owns whole bitmap sectors).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Geometry {
    group_sectors: u64,
    groups_per_super: u64,
}

impl Geometry {
    /// The on-disk default: 4096-sector groups, 1024 groups per super-group.
    pub const DEFAULT: Self = Self {
        group_sectors: DEFAULT_GROUP_SECTORS,
        groups_per_super: DEFAULT_GROUPS_PER_SUPER,
    };

    /// # Errors
    /// [`FreeSpaceError::InvalidGeometry`] if either size is zero, the group
    /// does not fit a 32-bit free counter, or the group size neither divides
    /// nor is a multiple of [`SECTOR_BITS`].
    pub const fn new(group_sectors: u64, groups_per_super: u64) -> Result<Self, FreeSpaceError> {
        if group_sectors == 0 || groups_per_super == 0 {
            return Err(FreeSpaceError::InvalidGeometry("group sizes must be non-zero"));
        }
        if group_sectors > u32::MAX as u64 {
            return Err(FreeSpaceError::InvalidGeometry("group too large"));
        }
        if SECTOR_BITS % group_sectors != 0 && group_sectors % SECTOR_BITS != 0 {
            return Err(FreeSpaceError::InvalidGeometry(
                "group size must divide or be a multiple of the bits per bitmap sector",
            ));
        }
        Ok(Self {
            group_sectors,
            groups_per_super,
        })
    }

    /// Sectors per group (`G`).
    #[inline]
    #[must_use]
    pub const fn group_sectors(self) -> u64 {
        self.group_sectors
    }

    /// Groups per super-group (`S`).
    #[inline]
    #[must_use]
    pub const fn groups_per_super(self) -> u64 {
        self.groups_per_super
    }

    /// Whether every group owns whole bitmap sectors, which allows whole
    /// groups to be written without reading them first.
    #[inline]
    #[must_use]
    pub const fn groups_own_sectors(self) -> bool {
        self.group_sectors % SECTOR_BITS == 0
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The three description-block fields the allocator needs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MapLayout {
    /// First sector of the L0 bitmap, relative to the volume start.
    pub l0_start_sector: u64,
    /// Length of the L0 bitmap in sectors.
    pub l0_length_sectors: u64,
    /// Number of allocatable sectors; bit `i` of L0 covers sector `i`.
    pub total_sectors: u64,
}

impl MapLayout {
    #[must_use]
    pub const fn new(l0_start_sector: u64, l0_length_sectors: u64, total_sectors: u64) -> Self {
        Self {
            l0_start_sector,
            l0_length_sectors,
            total_sectors,
        }
    }

    /// The layout `format` writes: the bitmap occupies the last sectors of
    /// the volume.
    ///
    /// # Errors
    /// [`FreeSpaceError::InvalidGeometry`] for an empty volume or one too
    /// small to hold its own bitmap.
    pub fn for_volume(total_sectors: u64) -> Result<Self, FreeSpaceError> {
        if total_sectors == 0 {
            return Err(FreeSpaceError::InvalidGeometry("empty volume"));
        }
        let map_bytes = byte_len_for_bits(total_sectors);
        let map_sectors = map_bytes.div_ceil(SECTOR_SIZE as u64);
        if map_sectors >= total_sectors {
            return Err(FreeSpaceError::InvalidGeometry("volume too small for its bitmap"));
        }
        let layout = Self::new(total_sectors - map_sectors, map_sectors, total_sectors);
        layout.validate()?;
        Ok(layout)
    }

    /// Checks that the bitmap lies inside the volume and has a bit for every
    /// sector.
    ///
    /// # Errors
    /// [`FreeSpaceError::InvalidGeometry`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), FreeSpaceError> {
        if self.total_sectors == 0 {
            return Err(FreeSpaceError::InvalidGeometry("empty volume"));
        }
        if self.l0_length_sectors == 0 {
            return Err(FreeSpaceError::InvalidGeometry("missing level-0 bitmap"));
        }
        if let Some(bits) = self.l0_length_sectors.checked_mul(SECTOR_BITS)
            && bits < self.total_sectors
        {
            return Err(FreeSpaceError::InvalidGeometry(
                "level-0 bitmap too short for the volume",
            ));
        }
        match self.l0_start_sector.checked_add(self.l0_length_sectors) {
            Some(end) if end <= self.total_sectors => Ok(()),
            _ => Err(FreeSpaceError::InvalidGeometry(
                "level-0 bitmap extends past the volume",
            )),
        }
    }

    /// The sectors occupied by the bitmap itself.
    #[must_use]
    pub const fn map_extent(&self) -> crate::Extent {
        crate::Extent::new(self.l0_start_sector, self.l0_length_sectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_rules() {
        assert!(Geometry::new(4, 2).is_ok());
        assert!(Geometry::new(4096, 1024).is_ok());
        assert!(Geometry::new(8192, 16).is_ok());
        assert!(Geometry::new(0, 16).is_err());
        assert!(Geometry::new(4, 0).is_err());
        assert!(Geometry::new(3, 16).is_err());
        assert!(Geometry::new(6144, 16).is_err());
        assert!(!Geometry::new(4, 1).unwrap().groups_own_sectors());
        assert!(Geometry::DEFAULT.groups_own_sectors());
    }

    #[test]
    fn format_layout_puts_map_at_the_tail() {
        let layout = MapLayout::for_volume(100_000).unwrap();
        // 100000 bits -> 12500 bytes -> 25 sectors
        assert_eq!(layout.l0_length_sectors, 25);
        assert_eq!(layout.l0_start_sector, 100_000 - 25);
        assert_eq!(layout.total_sectors, 100_000);

        let small = MapLayout::for_volume(10).unwrap();
        assert_eq!(small.l0_length_sectors, 1);
        assert_eq!(small.l0_start_sector, 9);
    }

    #[test]
    fn degenerate_volumes_are_rejected() {
        assert!(MapLayout::for_volume(0).is_err());
        assert!(MapLayout::for_volume(1).is_err());
        assert!(MapLayout::for_volume(2).is_ok());
    }

    #[test]
    fn validate_checks_coverage_and_bounds() {
        assert!(MapLayout::new(10, 1, 4096).validate().is_ok());
        assert!(MapLayout::new(10, 1, 4097).validate().is_err());
        assert!(MapLayout::new(4096, 1, 4096).validate().is_err());
        assert!(MapLayout::new(u64::MAX, 2, 4096).validate().is_err());
        assert!(MapLayout::new(0, 0, 4096).validate().is_err());
    }
}
