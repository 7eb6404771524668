use crate::block::BlockIoError;

/// Errors surfaced by the free-space map.
///
/// "No free extent of the requested size" is not an error; the finder reports
/// it as `Ok(None)` so callers can fall back to a smaller request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FreeSpaceError {
    /// A Level-0 bitmap read or write failed.
    #[error("level-0 bitmap I/O failed: {0}")]
    Io(#[from] BlockIoError),
    /// The summary arrays (or an I/O scratch buffer) could not be allocated.
    #[error("out of memory for free-space summaries")]
    OutOfMemory,
    /// Zero-length or out-of-range request.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The volume layout or the group geometry cannot describe a usable map.
    #[error("invalid free-space map geometry: {0}")]
    InvalidGeometry(&'static str),
}

impl From<alloc::collections::TryReserveError> for FreeSpaceError {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        Self::OutOfMemory
    }
}
