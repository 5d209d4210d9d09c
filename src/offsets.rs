//! Offset table: the ordered sequence of byte offsets locating each
//! bitvector within a serialized bitmap region (`spec.md` §3, §4.2).
//!
//! Mirrors the teacher crate's zero-copy round trip
//! (`BitVectorData::from_bytes`/`to_bytes` in
//! `examples/triblespace-sucds/src/bit_vector/bit_vector.rs`): the table is
//! backed by an `anybytes::View` so reopening an index file does not copy
//! the offsets out of the mapped or read buffer.

use anybytes::{Bytes, View};

use crate::error::{IbisError, Result};

/// Offset-table entry width on disk, chosen by the builder from the total
/// serialized size (`spec.md` §3: 32-bit when `M * max_bitvector_size <
/// 2^31`, else 64-bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    W32,
    W64,
}

impl Width {
    pub fn byte_width(self) -> u8 {
        match self {
            Width::W32 => 4,
            Width::W64 => 8,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            4 => Ok(Width::W32),
            8 => Ok(Width::W64),
            other => Err(IbisError::integrity(
                "<offset table>",
                format!("offset width byte must be 4 or 8, got {other}"),
            )),
        }
    }
}

/// `M+1` monotonically non-decreasing byte offsets.
#[derive(Debug, Clone)]
pub enum Offsets {
    Narrow(View<[u32]>),
    Wide(View<[u64]>),
}

impl Offsets {
    /// Chooses a width from the projected total bitmap-region size and
    /// builds the table from already-computed cumulative offsets.
    pub fn build(offsets: &[u64]) -> Self {
        let max = offsets.last().copied().unwrap_or(0);
        if max < (1u64 << 31) {
            Offsets::Narrow(
                Bytes::from_source(offsets.iter().map(|&o| o as u32).collect::<Vec<u32>>())
                    .view::<[u32]>()
                    .expect("freshly built offsets are well-aligned"),
            )
        } else {
            Offsets::Wide(
                Bytes::from_source(offsets.to_vec())
                    .view::<[u64]>()
                    .expect("freshly built offsets are well-aligned"),
            )
        }
    }

    pub fn width(&self) -> Width {
        match self {
            Offsets::Narrow(_) => Width::W32,
            Offsets::Wide(_) => Width::W64,
        }
    }

    /// `M`, the number of bitvectors described (one less than the number
    /// of offset entries).
    pub fn count(&self) -> usize {
        self.len().saturating_sub(1)
    }

    fn len(&self) -> usize {
        match self {
            Offsets::Narrow(v) => v.len(),
            Offsets::Wide(v) => v.len(),
        }
    }

    pub fn get(&self, i: usize) -> u64 {
        match self {
            Offsets::Narrow(v) => v[i] as u64,
            Offsets::Wide(v) => v[i],
        }
    }

    /// Byte range `[o[i], o[i+1])` occupied by bitvector `i`.
    pub fn range(&self, i: usize) -> Result<(u64, u64)> {
        if i + 1 >= self.len() {
            return Err(IbisError::integrity(
                "<offset table>",
                format!("offset index {i} out of range for table of {} entries", self.len()),
            ));
        }
        Ok((self.get(i), self.get(i + 1)))
    }

    /// `true` if bitvector `i` is the logical all-zero bitvector
    /// (`o[i+1] == o[i]`).
    pub fn is_empty_slot(&self, i: usize) -> Result<bool> {
        let (lo, hi) = self.range(i)?;
        Ok(lo == hi)
    }

    /// Loads an offset table of `width` from a raw byte source containing
    /// exactly `count + 1` entries.
    pub fn load(source: Bytes, width: Width, count: usize) -> Result<Self> {
        match width {
            Width::W32 => {
                let view = source.view::<[u32]>().map_err(|e| {
                    IbisError::integrity("<offset table>", format!("offset table misaligned: {e}"))
                })?;
                if view.len() != count + 1 {
                    return Err(IbisError::integrity(
                        "<offset table>",
                        format!("offset table has {} entries, expected {}", view.len(), count + 1),
                    ));
                }
                Ok(Offsets::Narrow(view))
            }
            Width::W64 => {
                let view = source.view::<[u64]>().map_err(|e| {
                    IbisError::integrity("<offset table>", format!("offset table misaligned: {e}"))
                })?;
                if view.len() != count + 1 {
                    return Err(IbisError::integrity(
                        "<offset table>",
                        format!("offset table has {} entries, expected {}", view.len(), count + 1),
                    ));
                }
                Ok(Offsets::Wide(view))
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            Offsets::Narrow(v) => v.clone().bytes(),
            Offsets::Wide(v) => v.clone().bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrow_width_for_small_totals() {
        let offs = Offsets::build(&[0, 10, 30, 30, 90]);
        assert_eq!(offs.width(), Width::W32);
        assert_eq!(offs.count(), 4);
        assert_eq!(offs.range(0).unwrap(), (0, 10));
        assert!(offs.is_empty_slot(2).unwrap());
    }

    #[test]
    fn wide_width_for_large_totals() {
        let big = 1u64 << 32;
        let offs = Offsets::build(&[0, big]);
        assert_eq!(offs.width(), Width::W64);
        assert_eq!(offs.get(1), big);
    }

    #[test]
    fn range_out_of_bounds_is_integrity_error() {
        let offs = Offsets::build(&[0, 10]);
        assert!(offs.range(5).is_err());
    }
}
