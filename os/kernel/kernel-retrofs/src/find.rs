use crate::FreeSpaceError;
use crate::bits::{find_zero_run, zero_prefix, zero_suffix};
use crate::block::BlockDevice;
use crate::map::FreeSpaceMap;
use log::trace;

impl FreeSpaceMap {
    /// Locate `need` contiguous free sectors and return the first one.
    ///
    /// Walks L2 → L1 and only reads L0 for groups whose summaries cannot
    /// settle the question on their own. Requests that fit in one group are
    /// served first-fit from a single group; larger ones are stitched from a
    /// group's free tail, any number of wholly free groups, and the free head
    /// of the group after them, costing at most two L0 group reads per
    /// candidate chain.
    ///
    /// This never mutates the bitmap or the summaries. The result is only a
    /// candidate until committed with [`mark`](Self::mark); callers that can
    /// race must hold the volume lock across both calls.
    ///
    /// Returns `Ok(None)` if no such run exists.
    ///
    /// # Errors
    /// - [`FreeSpaceError::InvalidArgument`] if `need` is zero.
    /// - [`FreeSpaceError::Io`] if an L0 read fails.
    pub fn find_free<D: BlockDevice + ?Sized>(
        &self,
        device: &mut D,
        need: u64,
    ) -> Result<Option<u64>, FreeSpaceError> {
        if need == 0 {
            return Err(FreeSpaceError::InvalidArgument("zero-length extent"));
        }
        if need > self.layout.total_sectors {
            return Ok(None);
        }

        let mut scratch = self.scratch()?;
        let found = if need <= self.config.geometry.group_sectors() {
            self.find_in_one_group(device, need, &mut scratch)?
        } else {
            self.find_across_groups(device, need, &mut scratch)?
        };
        trace!("find_free({need}) -> {found:?}");
        Ok(found)
    }

    fn find_in_one_group<D: BlockDevice + ?Sized>(
        &self,
        device: &mut D,
        need: u64,
        scratch: &mut [u8],
    ) -> Result<Option<u64>, FreeSpaceError> {
        for g in self.candidate_groups() {
            if self.l1_all_free.get(g) {
                if need <= self.group_size(g) {
                    return Ok(Some(self.group_start(g)));
                }
                continue;
            }
            if self.free_count(g) < need {
                continue;
            }

            let window = self.window(g);
            let bits = window.read(device, scratch)?;
            let range = window.bit_range();
            if let Some(at) = find_zero_run(bits, range.start, range.end, need) {
                return Ok(Some(self.group_start(g) + (at - window.bit_offset)));
            }
        }
        Ok(None)
    }

    fn find_across_groups<D: BlockDevice + ?Sized>(
        &self,
        device: &mut D,
        need: u64,
        scratch: &mut [u8],
    ) -> Result<Option<u64>, FreeSpaceError> {
        for g in self.candidate_groups() {
            let size = self.group_size(g);
            let tail = if self.l1_all_free.get(g) {
                size
            } else {
                let window = self.window(g);
                let bits = window.read(device, scratch)?;
                let range = window.bit_range();
                zero_suffix(bits, range.start, range.end)
            };
            if tail == 0 {
                continue;
            }

            let start = self.group_start(g) + (size - tail);
            let mut collected = tail;
            let mut next = g + 1;
            while collected < need && next < self.l1_groups && self.l1_all_free.get(next) {
                collected += self.group_size(next);
                next += 1;
            }

            // `next` is not wholly free here, so its head has to come from L0.
            if collected < need && next < self.l1_groups && self.l1_not_full.get(next) {
                let window = self.window(next);
                let bits = window.read(device, scratch)?;
                let range = window.bit_range();
                collected += zero_prefix(bits, range.start, range.end);
            }

            if collected >= need {
                return Ok(Some(start));
            }
        }
        Ok(None)
    }
}
