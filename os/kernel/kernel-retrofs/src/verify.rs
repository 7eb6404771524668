use crate::FreeSpaceError;
use crate::block::BlockDevice;
use crate::map::FreeSpaceMap;
use log::{debug, warn};

/// Outcome of comparing the live summaries with a fresh scan of L0.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub groups_checked: u64,
    /// Groups whose count or L1 flags differ from the bitmap.
    pub group_mismatches: u64,
    /// Super-groups whose L2 flags differ from the fold of their children.
    pub super_mismatches: u64,
    /// Lowest mismatching group, if any.
    pub first_mismatch: Option<u64>,
}

impl VerifyReport {
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.group_mismatches == 0 && self.super_mismatches == 0
    }
}

impl FreeSpaceMap {
    /// Re-scan L0 and check every summary entry against it.
    ///
    /// The map itself is not repaired; a dirty report means the caches should
    /// be rebuilt with [`build`](Self::build).
    ///
    /// # Errors
    /// Whatever [`build`](Self::build) returns for the same layout.
    pub fn verify<D: BlockDevice + ?Sized>(
        &self,
        device: &mut D,
    ) -> Result<VerifyReport, FreeSpaceError> {
        let fresh = Self::build(device, self.layout, self.config)?;
        let mut report = VerifyReport {
            groups_checked: self.l1_groups,
            ..VerifyReport::default()
        };

        for g in 0..self.l1_groups {
            let not_full = self.l1_not_full.get(g);
            let all_free = self.l1_all_free.get(g);
            let consistent = self.free_count(g) == fresh.free_count(g)
                && not_full == fresh.l1_not_full.get(g)
                && all_free == fresh.l1_all_free.get(g)
                && (!all_free || not_full);
            if !consistent {
                warn!(
                    "group {g}: cached {} free, bitmap has {}",
                    self.free_count(g),
                    fresh.free_count(g)
                );
                report.group_mismatches += 1;
                report.first_mismatch.get_or_insert(g);
            }
        }

        for sg in 0..self.l2_groups {
            let (mut any_free, mut all_free) = (false, true);
            for g in self.super_children(sg) {
                any_free |= self.l1_not_full.get(g);
                all_free &= self.l1_all_free.get(g);
            }
            if self.l2_not_full.get(sg) != any_free || self.l2_all_free.get(sg) != all_free {
                warn!("super-group {sg}: flags out of date with its groups");
                report.super_mismatches += 1;
            }
        }

        debug!("verified {} groups: {report:?}", report.groups_checked);
        Ok(report)
    }
}
