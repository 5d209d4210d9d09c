//! Concrete index encodings (`spec.md` §3 "Encoding taxonomy", §4.3 common
//! contract, §6 wire tags) and the shared machinery they build on: the
//! `Encoding` trait, the on-disk header, and the `EncodingTag` wire enum.
//!
//! Per `spec.md` §9 "Polymorphic dispatch over encodings", this crate models
//! dispatch as a tagged variant keyed on [`EncodingTag`] rather than a deep
//! inheritance hierarchy; [`crate::factory`] is the dispatch table.

pub mod basic;
pub mod binned;
pub mod bitslice;
pub mod direct;
pub mod interval;
pub mod io;
pub mod keywords;
pub mod multicomponent;
pub mod range;
pub mod reduced_precision;

use crate::bitvector::Bitvector;
use crate::context::Context;
use crate::error::{IbisError, Result};
use crate::extractor::ValueSource;
use crate::predicate::Predicate;

/// `#IBIS`, the 5-byte magic at the start of every index file (`spec.md` §6).
pub const MAGIC: &[u8; 5] = b"#IBIS";

/// The wire-format encoding tag, stable and append-only (`spec.md` §6).
/// Three values (`Mesh`, `Band`, `Generic`) are reserved placeholders the
/// source never populated (`spec.md` §9 Open Question iii) and are included
/// here only so the enum round-trips every byte the header may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(dead_code)]
pub enum EncodingTag {
    EqualityBinning = 0,
    Range = 1,
    Interval = 2,
    Ambit = 3,
    Pale = 4,
    Pack = 5,
    Zone = 6,
    BasicEquality = 7,
    Roster = 8,
    BitSliceRecoded = 9,
    MulticomponentRange = 10,
    MulticomponentInterval = 11,
    MulticomponentEquality = 12,
    Egale = 13,
    Moins = 14,
    Entre = 15,
    Bak = 16,
    Bak2 = 17,
    Keywords = 18,
    Mesh = 19,
    Band = 20,
    Direct = 21,
    Generic = 22,
    RangeEqualityUnbinned = 23,
    IntervalEqualityUnbinned = 24,
    EqualityEqualityUnbinned = 25,
    IntervalEqualityBinned = 26,
    BitSlice = 27,
    External = 28,
}

impl EncodingTag {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Result<Self> {
        use EncodingTag::*;
        Ok(match v {
            0 => EqualityBinning,
            1 => Range,
            2 => Interval,
            3 => Ambit,
            4 => Pale,
            5 => Pack,
            6 => Zone,
            7 => BasicEquality,
            8 => Roster,
            9 => BitSliceRecoded,
            10 => MulticomponentRange,
            11 => MulticomponentInterval,
            12 => MulticomponentEquality,
            13 => Egale,
            14 => Moins,
            15 => Entre,
            16 => Bak,
            17 => Bak2,
            18 => Keywords,
            19 => Mesh,
            20 => Band,
            21 => Direct,
            22 => Generic,
            23 => RangeEqualityUnbinned,
            24 => IntervalEqualityUnbinned,
            25 => EqualityEqualityUnbinned,
            26 => IntervalEqualityBinned,
            27 => BitSlice,
            28 => External,
            other => return Err(IbisError::Input(format!("unrecognized encoding tag {other}"))),
        })
    }
}

/// An 8-byte index-file header (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub tag: EncodingTag,
    pub offset_width: u8,
}

impl Header {
    pub fn to_bytes(self) -> [u8; 8] {
        let mut h = [0u8; 8];
        h[0..5].copy_from_slice(MAGIC);
        h[5] = self.tag.as_u8();
        h[6] = self.offset_width;
        h[7] = 0;
        h
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(IbisError::integrity("<index header>", "file shorter than 8-byte header"));
        }
        if &bytes[0..5] != MAGIC {
            return Err(IbisError::integrity("<index header>", "missing #IBIS magic"));
        }
        let tag = EncodingTag::from_u8(bytes[5])?;
        let offset_width = bytes[6];
        if offset_width != 4 && offset_width != 8 {
            return Err(IbisError::integrity(
                "<index header>",
                format!("offset width must be 4 or 8, got {offset_width}"),
            ));
        }
        Ok(Header { tag, offset_width })
    }
}

/// Result of [`Encoding::estimate`]: `lower ⊆ actual_hits ⊆ upper`, both of
/// length N. Exact encodings always return `lower == upper`.
#[derive(Debug, Clone)]
pub struct Estimate {
    pub lower: Bitvector,
    pub upper: Bitvector,
}

impl Estimate {
    /// An encoding that always decides exactly reports its answer as both
    /// bounds.
    pub fn exact(hits: Bitvector) -> Self {
        Self {
            lower: hits.clone(),
            upper: hits,
        }
    }

    pub fn is_exact(&self) -> bool {
        self.lower == self.upper
    }
}

/// The common contract every concrete encoding implements (`spec.md` §4.3,
/// §9 "Polymorphic dispatch over encodings").
pub trait Encoding: Send + Sync {
    fn tag(&self) -> EncodingTag;

    /// Row count N.
    fn n(&self) -> usize;

    /// `lower ⊆ actual_hits ⊆ upper`; `lower == upper` when the encoding can
    /// always decide exactly.
    fn estimate(&self, predicate: &Predicate, ctx: &Context) -> Result<Estimate>;

    /// Exact hits. The default residual-scans the `upper \ lower` "iffy"
    /// set against `values`, per `spec.md` §4.3/§4.4.
    fn evaluate(&self, predicate: &Predicate, ctx: &Context, values: &dyn ValueSource) -> Result<Bitvector> {
        let est = self.estimate(predicate, ctx)?;
        if est.is_exact() {
            return Ok(est.lower);
        }
        let mut result = est.lower.clone();
        let mut iffy = est.upper.clone();
        iffy.andnot_assign(&est.lower);

        ctx.check_cancelled()?;
        let array = values.get_values_array()?;
        for pos in iffy.iter_set() {
            ctx.check_cancelled()?;
            if predicate.matches(&array.scalar_at(pos)) {
                result.set_bit(pos, true);
            }
        }
        Ok(result)
    }

    /// The `upper \ lower` iffy set and the estimated hit fraction among it,
    /// used by a planner deciding whether a residual scan is worthwhile.
    fn undecidable(&self, predicate: &Predicate, ctx: &Context) -> Result<(Bitvector, f64)> {
        let est = self.estimate(predicate, ctx)?;
        let mut iffy = est.upper.clone();
        iffy.andnot_assign(&est.lower);
        let fraction = if iffy.size() == 0 {
            0.0
        } else {
            iffy.cnt() as f64 / iffy.size() as f64
        };
        Ok((iffy, fraction))
    }

    /// Serializes the full on-disk body (header included) per `spec.md` §6.
    fn serialize(&self) -> Result<anybytes::Bytes>;

    fn size_in_bytes(&self) -> usize;

    /// Bytes this encoding would need to touch to decide `predicate`,
    /// distinct from [`Encoding::size_in_bytes`]'s whole-encoding footprint
    /// (`spec.md` §9 supplemented `estimateCost`). The default is
    /// conservative: the full footprint. Encodings that can answer a
    /// predicate from a subset of their bitvectors (e.g. a binned range
    /// touching only the bins it spans) override this.
    fn estimate_cost(&self, _predicate: &Predicate) -> usize {
        self.size_in_bytes()
    }

    /// Eagerly decompresses bitvectors whose serialized size exceeds
    /// `threshold_bytes`, so later combine operations skip the
    /// decode-on-first-mutation cost (`spec.md` §6 `uncompressAll`, wired
    /// through by [`crate::factory::create`] as `threshold_bytes = 0`, and
    /// `uncompressLargeBitvector`). The default is a no-op; encodings
    /// override it to reach into their own bitvector fields.
    fn decompress_large_bitvectors(&mut self, _threshold_bytes: usize) {}
}

/// Per-type deserialization; not object-safe, so it lives outside
/// [`Encoding`] and is dispatched by tag in [`crate::factory`].
pub trait Decode: Sized {
    fn deserialize(bytes: anybytes::Bytes) -> Result<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = Header {
            tag: EncodingTag::BasicEquality,
            offset_width: 8,
        };
        let bytes = h.to_bytes();
        let back = Header::from_bytes(&bytes).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut bytes = Header {
            tag: EncodingTag::BasicEquality,
            offset_width: 4,
        }
        .to_bytes();
        bytes[0] = b'X';
        assert!(Header::from_bytes(&bytes).is_err());
    }

    #[test]
    fn tag_round_trips_every_value() {
        for v in 0u8..=28 {
            let tag = EncodingTag::from_u8(v).unwrap();
            assert_eq!(tag.as_u8(), v);
        }
        assert!(EncodingTag::from_u8(29).is_err());
    }
}
