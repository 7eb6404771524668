use crate::FreeSpaceError;
use crate::bits::apply_range;
use crate::block::BlockDevice;
use crate::map::{FreeSpaceMap, GroupWindow};
use log::trace;

impl FreeSpaceMap {
    /// Mark `length` sectors starting at `start` as used or free.
    ///
    /// L0 is written first; the summaries of a group are only updated once
    /// its bitmap write succeeded, after which the owning super-group is
    /// refolded. A range that covers a whole group whose bits own their
    /// bitmap sectors is written without reading; every other piece is an
    /// exact read-modify-write that skips the write when no bit changes.
    ///
    /// `length` is clamped to the end of the volume.
    ///
    /// # Errors
    /// - [`FreeSpaceError::InvalidArgument`] if `start` lies outside the
    ///   volume or `length` is zero.
    /// - [`FreeSpaceError::Io`] if a bitmap read or write fails. Groups
    ///   processed before the failure stay committed on disk and in the
    ///   summaries; the rest of the range is untouched.
    pub fn mark<D: BlockDevice + ?Sized>(
        &mut self,
        device: &mut D,
        start: u64,
        length: u64,
        used: bool,
    ) -> Result<(), FreeSpaceError> {
        let total = self.layout.total_sectors;
        if start >= total {
            return Err(FreeSpaceError::InvalidArgument("start sector outside the volume"));
        }
        let length = length.min(total - start);
        if length == 0 {
            return Err(FreeSpaceError::InvalidArgument("zero-length extent"));
        }

        let mut scratch = self.scratch()?;
        let per_super = self.config.geometry.groups_per_super();
        let end = start + length;
        let mut pos = start;

        while pos < end {
            let g = self.group_of(pos);
            let group_start = self.group_start(g);
            let size = self.group_size(g);
            let take = (end - pos).min(group_start + size - pos);
            let window = self.window(g);

            let changed = if take == size && window.owns_sectors {
                self.overwrite_group(device, g, &window, used, &mut scratch)?;
                true
            } else {
                let local = pos - group_start;
                self.patch_group(device, g, &window, local..local + take, used, &mut scratch)?
            };
            if changed {
                self.refold_super(g / per_super);
            }

            pos += take;
        }
        Ok(())
    }

    /// Whole-group fast path: write all ones or all zeros, no read.
    fn overwrite_group<D: BlockDevice + ?Sized>(
        &mut self,
        device: &mut D,
        g: u64,
        window: &GroupWindow,
        used: bool,
        scratch: &mut [u8],
    ) -> Result<(), FreeSpaceError> {
        let bits = &mut scratch[..window.byte_len()];
        bits.fill(if used { 0xFF } else { 0x00 });
        window.write(device, bits)?;

        trace!("group {g}: whole-group write, used={used}");
        self.set_free_count(g, if used { 0 } else { window.bits });
        Ok(())
    }

    /// Read-modify-write of the group-local sector range `local`.
    ///
    /// Returns whether any bit changed.
    fn patch_group<D: BlockDevice + ?Sized>(
        &mut self,
        device: &mut D,
        g: u64,
        window: &GroupWindow,
        local: core::ops::Range<u64>,
        used: bool,
        scratch: &mut [u8],
    ) -> Result<bool, FreeSpaceError> {
        let bits = window.read(device, scratch)?;
        let transitions = apply_range(
            bits,
            window.bit_offset + local.start,
            window.bit_offset + local.end,
            used,
        );
        if transitions == 0 {
            return Ok(false);
        }
        window.write(device, bits)?;

        let count = self.free_count(g);
        let count = if used {
            count.saturating_sub(transitions)
        } else {
            (count + transitions).min(window.bits)
        };
        trace!(
            "group {g}: {transitions} bits in {}..{} flipped, used={used}, free={count}",
            local.start, local.end
        );
        self.set_free_count(g, count);
        Ok(true)
    }
}
