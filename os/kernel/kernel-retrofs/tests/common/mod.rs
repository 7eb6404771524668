#![allow(dead_code)]

use kernel_retrofs::{
    BlockDevice, BlockIoError, FreeSpaceConfig, FreeSpaceMap, Geometry, MapLayout, RamDisk,
    SECTOR_SIZE,
};

/// Small geometry that makes group and super-group edges easy to hit.
pub fn tiny_config(group_sectors: u64, groups_per_super: u64) -> FreeSpaceConfig {
    FreeSpaceConfig::new(Geometry::new(group_sectors, groups_per_super).unwrap())
        .with_read_chunk_sectors(1)
}

/// A volume of `total` sectors whose bitmap sits in its last sector.
pub fn single_sector_layout(total: u64) -> MapLayout {
    MapLayout::new(total - 1, 1, total)
}

/// Reads the whole L0 bitmap of `layout`.
pub fn read_level0<D: BlockDevice>(disk: &mut D, layout: MapLayout) -> Vec<u8> {
    let mut buf = vec![0u8; layout.l0_length_sectors as usize * SECTOR_SIZE];
    disk.read_sectors(
        layout.l0_start_sector,
        layout.l0_length_sectors as u32,
        &mut buf,
    )
    .unwrap();
    buf
}

pub fn is_used(bitmap: &[u8], sector: u64) -> bool {
    bitmap[(sector / 8) as usize] >> (sector % 8) & 1 == 1
}

/// Checks every summary entry against a brute-force count of the bitmap.
pub fn assert_consistent<D: BlockDevice>(map: &FreeSpaceMap, disk: &mut D) {
    let layout = map.layout();
    let bitmap = read_level0(disk, layout);
    let g_size = map.geometry().group_sectors();

    for g in 0..map.l1_groups() {
        let start = g * g_size;
        let end = (start + g_size).min(layout.total_sectors);
        let free = (start..end).filter(|&s| !is_used(&bitmap, s)).count() as u64;
        assert_eq!(map.free_count(g), free, "free count of group {g}");
        assert_eq!(map.l1_not_full(g), free > 0, "not_full of group {g}");
        assert_eq!(map.l1_all_free(g), free == end - start, "all_free of group {g}");
    }

    let per_super = map.geometry().groups_per_super();
    for sg in 0..map.l2_groups() {
        let children = sg * per_super..((sg + 1) * per_super).min(map.l1_groups());
        let any = children.clone().any(|g| map.l1_not_full(g));
        let all = children.clone().all(|g| map.l1_all_free(g));
        assert_eq!(map.l2_not_full(sg), any, "not_full of super-group {sg}");
        assert_eq!(map.l2_all_free(sg), all, "all_free of super-group {sg}");
    }

    // padding past the last sector stays clear
    let padding_bits = bitmap.len() as u64 * 8;
    for b in layout.total_sectors..padding_bits {
        assert!(!is_used(&bitmap, b), "padding bit {b} is set");
    }
}

/// Deterministic xorshift generator for randomized scenarios.
pub struct XorShift(pub u64);

impl XorShift {
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }
}

/// Wraps a [`RamDisk`], counts transfers and starts failing after a number
/// of operations.
pub struct FlakyDisk {
    pub inner: RamDisk,
    pub writes_left: Option<usize>,
    pub reads_left: Option<usize>,
    pub reads: usize,
    pub writes: usize,
}

impl FlakyDisk {
    pub fn new(inner: RamDisk) -> Self {
        Self {
            inner,
            writes_left: None,
            reads_left: None,
            reads: 0,
            writes: 0,
        }
    }
}

fn consume(budget: &mut Option<usize>) -> Result<(), BlockIoError> {
    match budget {
        Some(0) => Err(BlockIoError::Device),
        Some(n) => {
            *n -= 1;
            Ok(())
        }
        None => Ok(()),
    }
}

impl BlockDevice for FlakyDisk {
    fn sector_count(&self) -> u64 {
        self.inner.sector_count()
    }

    fn read_sectors(&mut self, start: u64, count: u32, buf: &mut [u8]) -> Result<(), BlockIoError> {
        consume(&mut self.reads_left)?;
        self.reads += 1;
        self.inner.read_sectors(start, count, buf)
    }

    fn write_sectors(&mut self, start: u64, count: u32, buf: &[u8]) -> Result<(), BlockIoError> {
        consume(&mut self.writes_left)?;
        self.writes += 1;
        self.inner.write_sectors(start, count, buf)
    }
}
