//! # RetroFS Free-Space Map
//!
//! Sector allocation for RetroFS volumes. The authoritative record of which
//! sectors are in use is a flat on-disk bitmap (Level 0); this crate derives
//! two small in-RAM summary levels from it at mount time and uses them to
//! find and commit contiguous extents while touching as little of Level 0 as
//! possible.
//!
//! ## Levels
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  L2  (RAM)   one not_full / all_free pair per       │
//! │              super-group of S groups                │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ OR / AND fold
//! ┌─────────────────▼───────────────────────────────────┐
//! │  L1  (RAM)   free_count + not_full / all_free per   │
//! │              group of G sectors                     │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ popcount of inverted bits
//! ┌─────────────────▼───────────────────────────────────┐
//! │  L0  (disk)  one bit per sector, 1 = used           │
//! │              LSB first, stored at the volume tail   │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! With the default geometry (G = 4096, S = 1024) a group is exactly one
//! bitmap sector and a 1 TiB volume needs about 2 MiB of summaries.
//!
//! ## Operations
//!
//! * [`FreeSpaceMap::build`] streams L0 once and derives L1/L2.
//! * [`FreeSpaceMap::find_free`] locates a run of free sectors, descending
//!   L2 → L1 and reading at most a couple of L0 groups per candidate.
//! * [`FreeSpaceMap::mark`] writes L0 first, then updates the affected
//!   groups and refolds their super-group.
//! * [`FreeSpaceMap::format`] lays out and clears a new bitmap.
//! * [`FreeSpaceMap::verify`] compares the caches with a fresh scan.
//!
//! [`Volume`] bundles a [`BlockDevice`] with its map behind a ticket lock
//! ([`VolumeLock`]) so that finding and committing an extent is atomic with
//! respect to other threads.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_retrofs::{FreeSpaceConfig, RamDisk, Volume};
//!
//! let volume = Volume::format(RamDisk::new(100_000), 16, FreeSpaceConfig::default())?;
//! let extent = volume.allocate(300)?.expect("an empty volume has room");
//! assert_eq!(extent.start, 16);
//!
//! volume.release(extent)?;
//! assert!(volume.verify()?.is_clean());
//! # Ok::<(), kernel_retrofs::FreeSpaceError>(())
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod bits;
mod block;
mod build;
mod commit;
mod config;
mod error;
mod extent;
mod find;
mod format;
mod geometry;
mod lock;
mod map;
mod verify;
mod volume;

pub use block::{BlockDevice, BlockIoError, RamDisk, check_request};
pub use config::FreeSpaceConfig;
pub use error::FreeSpaceError;
pub use extent::Extent;
pub use geometry::{
    DEFAULT_GROUP_SECTORS, DEFAULT_GROUPS_PER_SUPER, DEFAULT_READ_CHUNK_SECTORS, Geometry,
    MapLayout, SECTOR_BITS, SECTOR_SIZE,
};
pub use lock::{VolumeGuard, VolumeLock};
pub use map::FreeSpaceMap;
pub use verify::VerifyReport;
pub use volume::{Volume, VolumeState};
