//! Bitmap store: materializes bitvectors out of a serialized bitmap region
//! on demand, over whichever back-end (whole-file, mmap, callback) the
//! caller chose (`spec.md` §2 "Bitmap store", §4.2).

mod backend;
mod file_manager;

pub use backend::{ByteSource, CallbackSource, MmapSource, WholeFileSource};
pub use file_manager::{FileHandle, FileManager, StorePreference};

use crate::bitvector::Bitvector;
use crate::context::Context;
use crate::error::Result;
use crate::offsets::Offsets;

/// Copies a byte slice taken out of a packed bitmap region into a freshly
/// allocated buffer before handing it to [`Bitvector::from_bytes`].
///
/// The region itself is read (or mapped) zero-copy, but an individual
/// bitvector's control words start at whatever byte offset the offset
/// table gives it, which is not generally 8-byte aligned; copying restores
/// the alignment `u64` control words need. The cost is bounded by one
/// bitvector's compressed size, not the whole region.
fn realign(bytes: &anybytes::Bytes) -> anybytes::Bytes {
    anybytes::Bytes::from_source(bytes.as_ref().to_vec())
}

/// Materializes bitvectors for one index's bitmap region, given its offset
/// table and declared row count `n`.
pub struct BitmapStore {
    source: std::sync::Arc<dyn ByteSource>,
    region_start: u64,
    n: usize,
}

impl BitmapStore {
    /// `region_start` is the byte offset of the bitmap region within
    /// `source` (the offset table's entries are relative to it).
    pub fn new(source: std::sync::Arc<dyn ByteSource>, region_start: u64, n: usize) -> Self {
        Self {
            source,
            region_start,
            n,
        }
    }

    /// Materializes bitvector `i`. Per `spec.md` §4.2, an offset-table slot
    /// with `o[i+1] == o[i]` is the logical zero bitvector and never
    /// touches the store.
    pub fn get_bitmap(&self, offsets: &Offsets, ctx: &Context, i: usize) -> Result<Bitvector> {
        let (lo, hi) = offsets.range(i)?;
        if lo == hi {
            return Ok(Bitvector::zero(self.n));
        }
        let raw = self
            .source
            .read_range(self.region_start + lo, self.region_start + hi)?;
        let bv = Bitvector::from_bytes(self.n, realign(&raw))?;
        ctx.note_materialized(1);
        Ok(bv)
    }

    /// Materializes bitvectors `[ib, ie)` in one I/O when the back-end
    /// supports reading a contiguous range cheaply (all three back-ends
    /// here do, since `read_range` already spans arbitrary byte ranges).
    pub fn get_bitmap_range(
        &self,
        offsets: &Offsets,
        ctx: &Context,
        ib: usize,
        ie: usize,
    ) -> Result<Vec<Bitvector>> {
        if ib == ie {
            return Ok(Vec::new());
        }
        let (span_lo, _) = offsets.range(ib)?;
        let (_, span_hi) = offsets.range(ie - 1)?;
        let raw = if span_hi > span_lo {
            Some(
                self.source
                    .read_range(self.region_start + span_lo, self.region_start + span_hi)?,
            )
        } else {
            None
        };

        let mut out = Vec::with_capacity(ie - ib);
        for i in ib..ie {
            let (lo, hi) = offsets.range(i)?;
            if lo == hi {
                out.push(Bitvector::zero(self.n));
                continue;
            }
            let slice = match &raw {
                Some(bytes) => bytes.slice((lo - span_lo) as usize..(hi - span_lo) as usize),
                None => unreachable!("non-empty slot implies a non-empty span"),
            };
            out.push(Bitvector::from_bytes(self.n, realign(&slice))?);
        }
        ctx.note_materialized(out.len() as u64);
        Ok(out)
    }

    /// Materializes every non-empty bitvector referenced by `offsets`
    /// (`spec.md` §4.2 `activate()`).
    pub fn activate(&self, offsets: &Offsets, ctx: &Context) -> Result<Vec<Bitvector>> {
        self.get_bitmap_range(offsets, ctx, 0, offsets.count())
    }
}
