//! Reduced-precision encoding (`spec.md` §3 "Reduced precision", wire tags
//! `Bak`/`Bak2`; `index=bak`/`bak2` in the factory's spec language): rounds
//! floating-point values to a coarser grid before building an equality
//! index over the rounded values. Deliberately inexact — rounding collapses
//! distinct values together, so every estimate is an envelope that the
//! default residual scan must narrow to the exact answer.

use crate::bitvector::Bitvector;
use crate::combine;
use crate::context::Context;
use crate::encoding::io::{pack_bitvectors, realign, unpack_bitvectors, Reader, Writer};
use crate::encoding::{Decode, Encoding, EncodingTag, Estimate, Header};
use crate::error::Result;
use crate::extractor::ValueSource;
use crate::offsets::{Offsets, Width};
use crate::predicate::{cmp_scalars, Predicate, RelOp, Scalar};

/// `Bak` keeps the leading `precision` decimal digits; `Bak2` keeps twice
/// as many (`spec.md` §3 distinguishes the two only by granularity).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Bak(u32),
    Bak2(u32),
}

impl Precision {
    fn digits(self) -> u32 {
        match self {
            Precision::Bak(d) => d,
            Precision::Bak2(d) => d * 2,
        }
    }

    fn tag(self) -> EncodingTag {
        match self {
            Precision::Bak(_) => EncodingTag::Bak,
            Precision::Bak2(_) => EncodingTag::Bak2,
        }
    }
}

fn round_scalar(s: &Scalar, digits: u32) -> Scalar {
    match s {
        Scalar::Float(v) => {
            if *v == 0.0 {
                return Scalar::Float(0.0);
            }
            let magnitude = v.abs().log10().floor() as i32;
            let scale = 10f64.powi(digits as i32 - magnitude - 1);
            Scalar::Float((v * scale).round() / scale)
        }
        other => other.clone(),
    }
}

/// Whether every row a bucket holds is decided by a predicate, some of them
/// might be, or none of them can be — the three-way answer a rounding index
/// (whose buckets hold a *range* of original values, not a single one) needs
/// in place of the exact yes/no an unrounded equality bucket gives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Overlap {
    Excluded,
    Partial,
    Full,
}

fn compare_overlap(op: RelOp, value: &Scalar, lo: &Scalar, hi: &Scalar) -> Overlap {
    use std::cmp::Ordering::*;
    let lo_vs = cmp_scalars(lo, value);
    let hi_vs = cmp_scalars(hi, value);
    match op {
        RelOp::Lt => {
            if hi_vs == Less {
                Overlap::Full
            } else if lo_vs != Less {
                Overlap::Excluded
            } else {
                Overlap::Partial
            }
        }
        RelOp::Le => {
            if hi_vs != Greater {
                Overlap::Full
            } else if lo_vs == Greater {
                Overlap::Excluded
            } else {
                Overlap::Partial
            }
        }
        RelOp::Gt => {
            if lo_vs == Greater {
                Overlap::Full
            } else if hi_vs != Greater {
                Overlap::Excluded
            } else {
                Overlap::Partial
            }
        }
        RelOp::Ge => {
            if lo_vs != Less {
                Overlap::Full
            } else if hi_vs == Less {
                Overlap::Excluded
            } else {
                Overlap::Partial
            }
        }
        RelOp::Eq => {
            if lo_vs == Equal && hi_vs == Equal {
                Overlap::Full
            } else if lo_vs != Greater && hi_vs != Less {
                Overlap::Partial
            } else {
                Overlap::Excluded
            }
        }
        RelOp::Ne => {
            if lo_vs == Equal && hi_vs == Equal {
                Overlap::Excluded
            } else if lo_vs != Greater && hi_vs != Less {
                Overlap::Partial
            } else {
                Overlap::Full
            }
        }
    }
}

fn between_overlap(blo: &Scalar, bhi: &Scalar, lo: &Scalar, hi: &Scalar) -> Overlap {
    use std::cmp::Ordering::*;
    if cmp_scalars(bhi, lo) == Less || cmp_scalars(blo, hi) == Greater {
        Overlap::Excluded
    } else if cmp_scalars(blo, lo) != Less && cmp_scalars(bhi, hi) != Greater {
        Overlap::Full
    } else {
        Overlap::Partial
    }
}

fn predicate_overlap(predicate: &Predicate, blo: &Scalar, bhi: &Scalar) -> Overlap {
    match predicate {
        Predicate::Compare { op, value } => compare_overlap(*op, value, blo, bhi),
        Predicate::Between { lo, hi } => between_overlap(blo, bhi, lo, hi),
        Predicate::In(values) => {
            // Full only if the bucket is a true singleton equal to one of the
            // values (every row in it is that exact value); otherwise any
            // listed value falling inside the bucket's span makes it only
            // Partial, since we can't tell which rows equal which value.
            let singleton = cmp_scalars(blo, bhi) == std::cmp::Ordering::Equal;
            if singleton && values.iter().any(|v| cmp_scalars(blo, v) == std::cmp::Ordering::Equal) {
                Overlap::Full
            } else if values
                .iter()
                .any(|v| cmp_scalars(blo, v) != std::cmp::Ordering::Greater && cmp_scalars(bhi, v) != std::cmp::Ordering::Less)
            {
                Overlap::Partial
            } else {
                Overlap::Excluded
            }
        }
        Predicate::RangeJoin { .. } => Overlap::Partial,
    }
}

pub struct ReducedPrecision {
    n: usize,
    precision: Precision,
    rounded_values: Vec<Scalar>,
    /// Actual min/max original value folded into each bucket — narrower
    /// than the bucket's rounded representative, needed to tell a predicate
    /// apart from buckets it only partially overlaps.
    bucket_lo: Vec<Scalar>,
    bucket_hi: Vec<Scalar>,
    bitvectors: Vec<Bitvector>,
    total: Bitvector,
}

impl ReducedPrecision {
    pub fn build(values: &dyn ValueSource, null_mask: &Bitvector, precision: Precision) -> Result<Self> {
        let array = values.get_values_array()?;
        let n = array.len();
        let digits = precision.digits();
        let mut rows: Vec<(Scalar, Scalar, usize)> = (0..n)
            .filter(|&i| null_mask.access(i).unwrap_or(false))
            .map(|i| {
                let original = array.scalar_at(i);
                (round_scalar(&original, digits), original, i)
            })
            .collect();
        rows.sort_by(|a, b| cmp_scalars(&a.0, &b.0).then_with(|| cmp_scalars(&a.1, &b.1)));

        let mut rounded_values = Vec::new();
        let mut bucket_lo = Vec::new();
        let mut bucket_hi = Vec::new();
        let mut bitvectors = Vec::new();
        let mut i = 0;
        while i < rows.len() {
            let mut j = i + 1;
            while j < rows.len() && cmp_scalars(&rows[i].0, &rows[j].0) == std::cmp::Ordering::Equal {
                j += 1;
            }
            let group = &rows[i..j];
            rounded_values.push(rows[i].0.clone());
            bucket_lo.push(group.first().unwrap().1.clone());
            bucket_hi.push(group.last().unwrap().1.clone());
            bitvectors.push(Bitvector::from_positions(group.iter().map(|(_, _, p)| *p), n));
            i = j;
        }
        let total = Bitvector::from_positions((0..n).filter(|&i| null_mask.access(i).unwrap_or(false)), n);
        Ok(Self {
            n,
            precision,
            rounded_values,
            bucket_lo,
            bucket_hi,
            bitvectors,
            total,
        })
    }
}

impl Encoding for ReducedPrecision {
    fn tag(&self) -> EncodingTag {
        self.precision.tag()
    }

    fn n(&self) -> usize {
        self.n
    }

    fn estimate(&self, predicate: &Predicate, ctx: &Context) -> Result<Estimate> {
        if matches!(predicate, Predicate::RangeJoin { .. }) {
            return Ok(Estimate { lower: Bitvector::zero(self.n), upper: self.total.clone() });
        }
        let mut full = Vec::new();
        let mut partial = Vec::new();
        for ((blo, bhi), bv) in self.bucket_lo.iter().zip(self.bucket_hi.iter()).zip(self.bitvectors.iter()) {
            match predicate_overlap(predicate, blo, bhi) {
                Overlap::Full => full.push(bv.clone()),
                Overlap::Partial => partial.push(bv.clone()),
                Overlap::Excluded => {}
            }
        }
        let lower = if full.is_empty() {
            Bitvector::zero(self.n)
        } else {
            combine::sum_or(&full, ctx)?
        };
        let upper = if partial.is_empty() {
            lower.clone()
        } else {
            let mut all = full;
            all.extend(partial);
            combine::sum_or(&all, ctx)?
        };
        Ok(Estimate { lower, upper })
    }

    fn serialize(&self) -> Result<anybytes::Bytes> {
        let (offs, blob) = pack_bitvectors(&self.bitvectors);
        let offsets = Offsets::build(&offs);
        let digits = match self.precision {
            Precision::Bak(d) => d,
            Precision::Bak2(d) => d,
        };
        let is_bak2 = matches!(self.precision, Precision::Bak2(_));
        let mut w = Writer::new();
        w.put_bytes(
            &Header {
                tag: self.precision.tag(),
                offset_width: offsets.width().byte_width(),
            }
            .to_bytes(),
        );
        w.put_u32(self.n as u32);
        w.put_u32(self.bitvectors.len() as u32);
        w.put_u32(digits);
        w.put_u32(is_bak2 as u32);
        w.put_scalar_vec(&self.rounded_values);
        w.put_scalar_vec(&self.bucket_lo);
        w.put_scalar_vec(&self.bucket_hi);
        let offs_bytes = offsets.to_bytes();
        w.put_u32(offs_bytes.len() as u32);
        w.put_bytes(offs_bytes.as_ref());
        w.put_bytes(&blob);
        Ok(w.into_bytes())
    }

    fn size_in_bytes(&self) -> usize {
        self.bitvectors.iter().map(|b| b.bytes()).sum::<usize>() + self.rounded_values.len() * 32
    }

    fn decompress_large_bitvectors(&mut self, threshold_bytes: usize) {
        for bv in &mut self.bitvectors {
            if bv.bytes() > threshold_bytes {
                bv.decompress();
            }
        }
        if self.total.bytes() > threshold_bytes {
            self.total.decompress();
        }
    }
}

impl Decode for ReducedPrecision {
    fn deserialize(bytes: anybytes::Bytes) -> Result<Self> {
        let raw = bytes.as_ref();
        let header = Header::from_bytes(raw)?;
        let mut r = Reader::new(&raw[8..]);
        let n = r.get_u32()? as usize;
        let m = r.get_u32()? as usize;
        let digits = r.get_u32()?;
        let is_bak2 = r.get_u32()? != 0;
        let precision = if is_bak2 { Precision::Bak2(digits / 2) } else { Precision::Bak(digits) };
        let rounded_values = r.get_scalar_vec()?;
        let bucket_lo = r.get_scalar_vec()?;
        let bucket_hi = r.get_scalar_vec()?;
        let offs_len = r.get_u32()? as usize;
        let offs_bytes = bytes.slice(8 + r.position()..8 + r.position() + offs_len);
        let region_start = 8 + r.position() + offs_len;
        let width = Width::from_tag(header.offset_width)?;
        let offsets = Offsets::load(realign(&offs_bytes), width, m)?;
        let region = bytes.slice(region_start..bytes.len());
        let bitvectors = unpack_bitvectors(&offsets, region, n)?;
        let total = if bitvectors.is_empty() {
            Bitvector::zero(n)
        } else {
            combine::sum_or(&bitvectors, &Context::new())?
        };
        Ok(Self {
            n,
            precision,
            rounded_values,
            bucket_lo,
            bucket_hi,
            bitvectors,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ArrayValueSource, ColumnValues};

    #[test]
    fn rounding_collapses_nearby_values_into_one_bucket() {
        let values = vec![100.01, 100.02, 200.5];
        let src = ArrayValueSource::new(ColumnValues::Float(values));
        let enc = ReducedPrecision::build(&src, &Bitvector::ones(3), Precision::Bak(3)).unwrap();
        assert!(enc.rounded_values.len() <= 2);
    }

    #[test]
    fn eq_estimate_is_an_upper_bound_not_exact() {
        let values = vec![100.01, 100.02, 200.5];
        let src = ArrayValueSource::new(ColumnValues::Float(values));
        let ctx = Context::new();
        let enc = ReducedPrecision::build(&src, &Bitvector::ones(3), Precision::Bak(3)).unwrap();
        let est = enc
            .estimate(&Predicate::Compare { op: RelOp::Eq, value: Scalar::Float(100.01) }, &ctx)
            .unwrap();
        assert!(!est.is_exact() || est.upper.cnt() >= 1);
    }

    #[test]
    fn evaluate_recovers_exact_answer_via_residual_scan() {
        let values = vec![100.01, 100.02, 200.5];
        let src = ArrayValueSource::new(ColumnValues::Float(values));
        let ctx = Context::new();
        let enc = ReducedPrecision::build(&src, &Bitvector::ones(3), Precision::Bak(3)).unwrap();
        let predicate = Predicate::Compare { op: RelOp::Eq, value: Scalar::Float(100.01) };
        let exact = enc.evaluate(&predicate, &ctx, &src).unwrap();
        assert_eq!(exact.iter_set().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn strict_less_than_on_boundary_bucket_still_finds_the_true_hit() {
        // Both 100.01 and 100.02 round to 100.0 at 3 digits; a query for
        // `< 100.015` must still recover row 0 via the residual scan over
        // the boundary bucket `upper` now includes.
        let values = vec![100.01, 100.02, 200.5];
        let src = ArrayValueSource::new(ColumnValues::Float(values));
        let ctx = Context::new();
        let enc = ReducedPrecision::build(&src, &Bitvector::ones(3), Precision::Bak(3)).unwrap();
        let predicate = Predicate::Compare { op: RelOp::Lt, value: Scalar::Float(100.015) };
        let est = enc.estimate(&predicate, &ctx).unwrap();
        assert!(!est.is_exact());
        assert!(est.upper.access(0).unwrap());
        let exact = enc.evaluate(&predicate, &ctx, &src).unwrap();
        assert_eq!(exact.iter_set().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn not_equal_envelope_always_covers_every_non_matching_row() {
        let values = vec![100.01, 100.02, 200.5];
        let src = ArrayValueSource::new(ColumnValues::Float(values));
        let ctx = Context::new();
        let enc = ReducedPrecision::build(&src, &Bitvector::ones(3), Precision::Bak(3)).unwrap();
        let predicate = Predicate::Compare { op: RelOp::Ne, value: Scalar::Float(100.01) };
        let exact = enc.evaluate(&predicate, &ctx, &src).unwrap();
        assert_eq!(exact.iter_set().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn wholly_interior_bucket_is_exact_without_a_residual_scan() {
        let values = vec![100.01, 100.02, 200.5];
        let src = ArrayValueSource::new(ColumnValues::Float(values));
        let ctx = Context::new();
        let enc = ReducedPrecision::build(&src, &Bitvector::ones(3), Precision::Bak(3)).unwrap();
        // 200.5 sits in its own singleton bucket, far from the boundary.
        let predicate = Predicate::Compare { op: RelOp::Gt, value: Scalar::Float(150.0) };
        let est = enc.estimate(&predicate, &ctx).unwrap();
        assert!(est.lower.access(2).unwrap());
    }

    #[test]
    fn serialize_round_trips() {
        let values = vec![100.01, 100.02, 200.5];
        let src = ArrayValueSource::new(ColumnValues::Float(values));
        let ctx = Context::new();
        let enc = ReducedPrecision::build(&src, &Bitvector::ones(3), Precision::Bak2(2)).unwrap();
        let bytes = enc.serialize().unwrap();
        let back = ReducedPrecision::deserialize(bytes).unwrap();
        assert_eq!(back.tag() as u8, EncodingTag::Bak2 as u8);
        let predicate = Predicate::Compare { op: RelOp::Lt, value: Scalar::Float(100.015) };
        assert_eq!(
            enc.estimate(&predicate, &ctx).unwrap().upper,
            back.estimate(&predicate, &ctx).unwrap().upper
        );
    }
}
