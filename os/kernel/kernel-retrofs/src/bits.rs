//! Bit primitives for packed bitmaps.
//!
//! Bit `i` lives in byte `i / 8` at position `i % 8` (LSB first). This is the
//! on-disk L0 order, and it is also the bit order of a little-endian `u64`
//! loaded from eight consecutive bytes, so byte-wise and word-wise views of a
//! buffer agree.
//!
//! All range helpers take half-open bit ranges `[start, end)` relative to the
//! start of the buffer they operate on.

use alloc::collections::TryReserveError;
use alloc::vec::Vec;

/// Number of bytes needed to hold `bits` packed bits.
#[inline]
#[must_use]
pub const fn byte_len_for_bits(bits: u64) -> u64 {
    bits.div_ceil(8)
}

/// Mask with the low `n` bits set; `n >= 64` yields all ones.
#[inline]
#[must_use]
pub const fn low_mask(n: u64) -> u64 {
    if n >= 64 { !0 } else { (1 << n) - 1 }
}

/// Loads the little-endian word starting at `byte_index`.
#[inline]
#[must_use]
pub fn load_word(buf: &[u8], byte_index: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[byte_index..byte_index + 8]);
    u64::from_le_bytes(word)
}

#[inline]
fn store_word(buf: &mut [u8], byte_index: usize, word: u64) {
    buf[byte_index..byte_index + 8].copy_from_slice(&word.to_le_bytes());
}

/// Reads a single bit of a packed byte slice.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn bit(buf: &[u8], index: u64) -> bool {
    (buf[(index >> 3) as usize] >> (index & 7)) & 1 != 0
}

/// Owned, fixed-length bitset with bounds-checked accessors.
///
/// Used for the in-RAM L1/L2 summary flags. Indexing past the end
/// panics, just like slice indexing; use [`checked_get`](Self::checked_get)
/// when the index is not known to be in range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bitset {
    bytes: Vec<u8>,
    bits: u64,
}

impl Bitset {
    /// Allocates a zeroed bitset of `bits` bits, failing instead of aborting
    /// when memory is short.
    ///
    /// # Errors
    /// Returns the allocator's [`TryReserveError`] if the backing buffer
    /// cannot be reserved.
    pub fn try_new(bits: u64) -> Result<Self, TryReserveError> {
        let len = usize::try_from(byte_len_for_bits(bits)).unwrap_or(usize::MAX);
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len)?;
        bytes.resize(len, 0);
        Ok(Self { bytes, bits })
    }

    #[inline]
    #[must_use]
    pub fn checked_get(&self, index: u64) -> Option<bool> {
        (index < self.bits).then(|| bit(&self.bytes, index))
    }

    /// # Panics
    /// Panics if `index` is not below the bitset's length.
    #[inline]
    #[must_use]
    #[track_caller]
    pub fn get(&self, index: u64) -> bool {
        match self.checked_get(index) {
            Some(value) => value,
            None => out_of_bounds(index, self.bits),
        }
    }

    /// # Panics
    /// Panics if `index` is not below the bitset's length.
    #[inline]
    #[track_caller]
    #[allow(clippy::cast_possible_truncation)]
    pub fn set(&mut self, index: u64, value: bool) {
        if index >= self.bits {
            out_of_bounds(index, self.bits);
        }
        let byte = &mut self.bytes[(index >> 3) as usize];
        let mask = 1u8 << (index & 7);
        if value {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }
}

#[cold]
#[track_caller]
fn out_of_bounds(index: u64, len: u64) -> ! {
    panic!("bit index {index} out of range for bitset of {len} bits")
}

/// Sets (`used`) or clears the bits in `[start, end)` and returns how many
/// bits actually changed state.
///
/// Aligned 64-bit stretches are handled a word at a time; the ragged edges
/// use byte masks. Transitions are the popcount of the masked delta, so the
/// cost is proportional to the range length divided by the word size.
#[allow(clippy::cast_possible_truncation)]
pub fn apply_range(buf: &mut [u8], start: u64, end: u64, used: bool) -> u64 {
    let mut transitions = 0u64;
    let mut b = start;
    while b < end {
        let index = (b >> 3) as usize;
        if b & 63 == 0 && end - b >= 64 {
            let before = load_word(buf, index);
            let delta = if used { !before } else { before };
            transitions += u64::from(delta.count_ones());
            store_word(buf, index, if used { !0 } else { 0 });
            b += 64;
            continue;
        }

        let offset = b & 7;
        let span = (8 - offset).min(end - b);
        let mask = (((1u16 << span) - 1) << offset) as u8;
        let before = buf[index];
        let delta = if used { !before & mask } else { before & mask };
        transitions += u64::from(delta.count_ones());
        buf[index] = if used { before | mask } else { before & !mask };
        b += span;
    }
    transitions
}

/// Finds the first run of `need` zero bits inside `[start, end)` and returns
/// the index of its first bit.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn find_zero_run(buf: &[u8], start: u64, end: u64, need: u64) -> Option<u64> {
    if need == 0 {
        return Some(start);
    }
    let mut run = 0u64;
    let mut run_start = start;
    let mut b = start;
    while b < end {
        if b & 7 == 0 && end - b >= 8 {
            match buf[(b >> 3) as usize] {
                0xFF => {
                    run = 0;
                    b += 8;
                    continue;
                }
                0x00 => {
                    if run == 0 {
                        run_start = b;
                    }
                    run += 8;
                    if run >= need {
                        return Some(run_start);
                    }
                    b += 8;
                    continue;
                }
                _ => {}
            }
        }

        if bit(buf, b) {
            run = 0;
        } else {
            if run == 0 {
                run_start = b;
            }
            run += 1;
            if run >= need {
                return Some(run_start);
            }
        }
        b += 1;
    }
    None
}

/// Length of the run of zero bits starting at `start` (bounded by `end`).
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn zero_prefix(buf: &[u8], start: u64, end: u64) -> u64 {
    let mut b = start;
    while b < end {
        if b & 7 == 0 && end - b >= 8 && buf[(b >> 3) as usize] == 0 {
            b += 8;
        } else if bit(buf, b) {
            break;
        } else {
            b += 1;
        }
    }
    b - start
}

/// Length of the run of zero bits ending at `end` (bounded by `start`).
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn zero_suffix(buf: &[u8], start: u64, end: u64) -> u64 {
    let mut b = end;
    while b > start {
        if b & 7 == 0 && b - start >= 8 && buf[((b >> 3) - 1) as usize] == 0 {
            b -= 8;
        } else if bit(buf, b - 1) {
            break;
        } else {
            b -= 1;
        }
    }
    end - b
}
