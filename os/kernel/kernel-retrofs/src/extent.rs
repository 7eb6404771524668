use core::fmt;

/// A contiguous run of sectors.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Extent {
    pub start: u64,
    pub length: u64,
}

impl Extent {
    #[inline]
    #[must_use]
    pub const fn new(start: u64, length: u64) -> Self {
        Self { start, length }
    }

    /// One past the last sector.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start + self.length
    }

    #[inline]
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{})", self.start, self.end())
    }
}
