//! Binned equality encoding (`spec.md` §4.4 "Binned-encoding algorithm",
//! wire tag `EqualityBinning`): groups distinct values into `K` bins built
//! by [`crate::bins::divide_counts`], one bitvector per bin. A continuous
//! range resolves to two boundary bins (needing a residual scan) and a run
//! of interior bins that can be OR-ed in exactly.

use crate::bins::divide_counts;
use crate::bitvector::Bitvector;
use crate::combine;
use crate::context::Context;
use crate::encoding::io::{pack_bitvectors, realign, unpack_bitvectors, Reader, Writer};
use crate::encoding::{Decode, Encoding, EncodingTag, Estimate, Header};
use crate::error::Result;
use crate::extractor::ValueSource;
use crate::offsets::{Offsets, Width};
use crate::predicate::{cmp_scalars, Predicate, RelOp, Scalar};

/// One bitvector per bin, `bin_lo`/`bin_hi` the inclusive value range each
/// bin covers, ascending and non-overlapping.
pub struct BinnedEquality {
    n: usize,
    bin_lo: Vec<Scalar>,
    bin_hi: Vec<Scalar>,
    bin_counts: Vec<u64>,
    bitvectors: Vec<Bitvector>,
    total: Bitvector,
}

impl BinnedEquality {
    /// Builds `k` bins from `values`, following `spec.md` §4.4: groups rows
    /// by distinct value, runs [`divide_counts`] over the per-value
    /// histogram, then OR's each bin's member groups into one bitvector.
    pub fn build(values: &dyn ValueSource, null_mask: &Bitvector, k: usize, ctx: &Context) -> Result<Self> {
        let array = values.get_values_array()?;
        let n = array.len();
        let mut rows: Vec<(Scalar, usize)> = (0..n)
            .filter(|&i| null_mask.access(i).unwrap_or(false))
            .map(|i| (array.scalar_at(i), i))
            .collect();
        rows.sort_by(|a, b| cmp_scalars(&a.0, &b.0));

        let mut distinct_values = Vec::new();
        let mut groups: Vec<Bitvector> = Vec::new();
        let mut counts = Vec::new();
        let mut i = 0;
        while i < rows.len() {
            let mut j = i + 1;
            while j < rows.len() && cmp_scalars(&rows[i].0, &rows[j].0) == std::cmp::Ordering::Equal {
                j += 1;
            }
            distinct_values.push(rows[i].0.clone());
            groups.push(Bitvector::from_positions(rows[i..j].iter().map(|(_, p)| *p), n));
            counts.push((j - i) as u64);
            i = j;
        }

        let boundaries = divide_counts(&counts, k.max(1));
        let num_bins = boundaries.len() - 1;
        let mut bin_lo = Vec::with_capacity(num_bins);
        let mut bin_hi = Vec::with_capacity(num_bins);
        let mut bin_counts = Vec::with_capacity(num_bins);
        let mut bitvectors = Vec::with_capacity(num_bins);
        for g in 0..num_bins {
            let (lo, hi) = (boundaries[g], boundaries[g + 1]);
            bin_lo.push(distinct_values[lo].clone());
            bin_hi.push(distinct_values[hi - 1].clone());
            bin_counts.push(counts[lo..hi].iter().sum());
            let member = &groups[lo..hi];
            bitvectors.push(if member.len() == 1 {
                member[0].clone()
            } else {
                combine::sum_or(member, ctx)?
            });
        }
        let total = if bitvectors.is_empty() {
            Bitvector::zero(n)
        } else {
            combine::sum_or(&bitvectors, ctx)?
        };

        Ok(Self {
            n,
            bin_lo,
            bin_hi,
            bin_counts,
            bitvectors,
            total,
        })
    }

    pub fn bin_boundaries(&self) -> (&[Scalar], &[Scalar]) {
        (&self.bin_lo, &self.bin_hi)
    }

    pub fn bin_weights(&self) -> &[u64] {
        &self.bin_counts
    }

    /// Per-bin `(lo, hi, count)` triples in ascending order — `getDistribution`
    /// on the original's binned index, built from the same metadata
    /// [`Self::bin_boundaries`]/[`Self::bin_weights`] already expose.
    pub fn distribution(&self) -> Vec<(Scalar, Scalar, u64)> {
        self.bin_lo
            .iter()
            .cloned()
            .zip(self.bin_hi.iter().cloned())
            .zip(self.bin_counts.iter().copied())
            .map(|((lo, hi), count)| (lo, hi, count))
            .collect()
    }

    /// Running row total at or below each bin's upper edge —
    /// `getCumulativeDistribution`.
    pub fn cumulative_distribution(&self) -> Vec<u64> {
        let mut acc = 0u64;
        self.bin_counts
            .iter()
            .map(|&c| {
                acc += c;
                acc
            })
            .collect()
    }

    /// Rounds `[lo, hi]` outward to the enclosing bins' edges, so a caller
    /// re-querying with the returned bounds gets an answer decided by whole
    /// bins at both ends (`index.h`'s `expandRange`). Planning concern, not
    /// consulted by [`Self::estimate`] itself.
    pub fn expand_range(&self, lo: &Scalar, hi: &Scalar) -> (Scalar, Scalar) {
        let blo = self.bin_containing(lo);
        let bhi = self.bin_containing(hi);
        (self.bin_lo[blo].clone(), self.bin_hi[bhi].clone())
    }

    /// Rounds `[lo, hi]` inward to the enclosed bins' edges (`index.h`'s
    /// `contractRange`): drops a boundary bin entirely when `lo`/`hi` falls
    /// short of covering it. Returns `None` if no whole bin fits.
    pub fn contract_range(&self, lo: &Scalar, hi: &Scalar) -> Option<(Scalar, Scalar)> {
        let mut blo = self.bin_containing(lo);
        let mut bhi = self.bin_containing(hi);
        if cmp_scalars(&self.bin_lo[blo], lo) == std::cmp::Ordering::Less {
            blo += 1;
        }
        if cmp_scalars(&self.bin_hi[bhi], hi) == std::cmp::Ordering::Greater {
            if bhi == 0 {
                return None;
            }
            bhi -= 1;
        }
        if blo > bhi || blo >= self.bin_lo.len() {
            return None;
        }
        Some((self.bin_lo[blo].clone(), self.bin_hi[bhi].clone()))
    }

    /// The per-bin bitvectors themselves, for encodings built on top of a
    /// binned-equality base (e.g. [`crate::encoding::interval::Interval`]).
    pub(crate) fn bins(&self) -> &[Bitvector] {
        &self.bitvectors
    }

    /// Last bin whose lower bound is `<= x`, clamped into range — the bin
    /// that would hold `x` if present.
    fn bin_containing(&self, x: &Scalar) -> usize {
        self.bin_lo
            .iter()
            .enumerate()
            .rev()
            .find(|(_, lo)| cmp_scalars(lo, x) != std::cmp::Ordering::Greater)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Bin `b`'s bitvector, or the zero bitvector if `b` is out of range —
    /// reachable when the column has no non-null rows at all and
    /// `bitvectors` is empty but [`Self::bin_containing`] still reports `0`
    /// (`spec.md` §7 "never abort").
    fn bin(&self, b: usize) -> Bitvector {
        self.bitvectors.get(b).cloned().unwrap_or_else(|| Bitvector::zero(self.n))
    }

    fn or_range(&self, lo: usize, hi: usize, ctx: &Context) -> Result<Bitvector> {
        // inclusive [lo, hi]; caller guarantees lo <= hi when non-empty
        if self.bitvectors.is_empty() || lo > hi {
            return Ok(Bitvector::zero(self.n));
        }
        combine::sum_or(&self.bitvectors[lo..=hi], ctx)
    }

    fn ge_estimate(&self, x: &Scalar, ctx: &Context) -> Result<Estimate> {
        let b = self.bin_containing(x);
        let last = self.bin_lo.len().saturating_sub(1);
        let lower = if b + 1 <= last { self.or_range(b + 1, last, ctx)? } else { Bitvector::zero(self.n) };
        let mut upper = lower.clone();
        upper.or_assign(&self.bin(b));
        Ok(Estimate { lower, upper })
    }

    fn le_estimate(&self, x: &Scalar, ctx: &Context) -> Result<Estimate> {
        let b = self.bin_containing(x);
        let lower = if b > 0 { self.or_range(0, b - 1, ctx)? } else { Bitvector::zero(self.n) };
        let mut upper = lower.clone();
        upper.or_assign(&self.bin(b));
        Ok(Estimate { lower, upper })
    }

    fn between_estimate(&self, lo: &Scalar, hi: &Scalar, ctx: &Context) -> Result<Estimate> {
        let blo = self.bin_containing(lo);
        let bhi = self.bin_containing(hi);
        let lower = if blo + 1 <= bhi.saturating_sub(1) {
            self.or_range(blo + 1, bhi - 1, ctx)?
        } else {
            Bitvector::zero(self.n)
        };
        let mut upper = lower.clone();
        upper.or_assign(&self.bin(blo));
        upper.or_assign(&self.bin(bhi));
        Ok(Estimate { lower, upper })
    }

    fn eq_estimate(&self, x: &Scalar) -> Estimate {
        let b = self.bin_containing(x);
        Estimate {
            lower: Bitvector::zero(self.n),
            upper: self.bin(b),
        }
    }
}

impl Encoding for BinnedEquality {
    fn tag(&self) -> EncodingTag {
        EncodingTag::EqualityBinning
    }

    fn n(&self) -> usize {
        self.n
    }

    fn estimate(&self, predicate: &Predicate, ctx: &Context) -> Result<Estimate> {
        match predicate {
            Predicate::Compare { op, value } => match op {
                RelOp::Ge | RelOp::Gt => self.ge_estimate(value, ctx),
                RelOp::Le | RelOp::Lt => self.le_estimate(value, ctx),
                RelOp::Eq => Ok(self.eq_estimate(value)),
                RelOp::Ne => {
                    let eq = self.eq_estimate(value);
                    let mut lower = self.total.clone();
                    lower.andnot_assign(&eq.upper);
                    Ok(Estimate { lower, upper: self.total.clone() })
                }
            },
            Predicate::Between { lo, hi } => self.between_estimate(lo, hi, ctx),
            Predicate::In(values) => {
                let mut upper = Bitvector::zero(self.n);
                for v in values {
                    upper.or_assign(&self.eq_estimate(v).upper);
                }
                Ok(Estimate { lower: Bitvector::zero(self.n), upper })
            }
            Predicate::RangeJoin { .. } => Ok(Estimate {
                lower: Bitvector::zero(self.n),
                upper: self.total.clone(),
            }),
        }
    }

    fn serialize(&self) -> Result<anybytes::Bytes> {
        let (offs, blob) = pack_bitvectors(&self.bitvectors);
        let offsets = Offsets::build(&offs);
        let mut w = Writer::new();
        w.put_bytes(
            &Header {
                tag: EncodingTag::EqualityBinning,
                offset_width: offsets.width().byte_width(),
            }
            .to_bytes(),
        );
        w.put_u32(self.n as u32);
        w.put_u32(self.bitvectors.len() as u32);
        w.put_scalar_vec(&self.bin_lo);
        w.put_scalar_vec(&self.bin_hi);
        w.put_u32_vec(&self.bin_counts.iter().map(|&c| c as u32).collect::<Vec<_>>());
        let offs_bytes = offsets.to_bytes();
        w.put_u32(offs_bytes.len() as u32);
        w.put_bytes(offs_bytes.as_ref());
        w.put_bytes(&blob);
        Ok(w.into_bytes())
    }

    fn size_in_bytes(&self) -> usize {
        self.bitvectors.iter().map(|b| b.bytes()).sum::<usize>() + self.bin_lo.len() * 32
    }

    fn estimate_cost(&self, predicate: &Predicate) -> usize {
        let span = |blo: usize, bhi: usize| -> usize {
            if self.bitvectors.is_empty() {
                return 0;
            }
            let (lo, hi) = (blo.min(bhi), blo.max(bhi));
            self.bitvectors[lo..=hi].iter().map(|b| b.bytes()).sum()
        };
        match predicate {
            Predicate::Compare { value, .. } => span(self.bin_containing(value), self.bin_containing(value)),
            Predicate::Between { lo, hi } => span(self.bin_containing(lo), self.bin_containing(hi)),
            Predicate::In(values) => values.iter().map(|v| span(self.bin_containing(v), self.bin_containing(v))).sum(),
            Predicate::RangeJoin { .. } => self.size_in_bytes(),
        }
    }

    fn decompress_large_bitvectors(&mut self, threshold_bytes: usize) {
        for bv in &mut self.bitvectors {
            if bv.bytes() > threshold_bytes {
                bv.decompress();
            }
        }
    }
}

impl Decode for BinnedEquality {
    fn deserialize(bytes: anybytes::Bytes) -> Result<Self> {
        let raw = bytes.as_ref();
        let header = Header::from_bytes(raw)?;
        let mut r = Reader::new(&raw[8..]);
        let n = r.get_u32()? as usize;
        let m = r.get_u32()? as usize;
        let bin_lo = r.get_scalar_vec()?;
        let bin_hi = r.get_scalar_vec()?;
        let bin_counts = r.get_u32_vec()?.into_iter().map(|c| c as u64).collect();
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
        Ok(Self { n, bin_lo, bin_hi, bin_counts, bitvectors, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ArrayValueSource, ColumnValues};

    fn uniform_1000() -> Vec<f64> {
        (0..1000).map(|i| i as f64 / 1000.0).collect()
    }

    #[test]
    fn s2_range_on_binned_matches_reference_scan() {
        let values = uniform_1000();
        let src = ArrayValueSource::new(ColumnValues::Float(values.clone()));
        let ctx = Context::new();
        let enc = BinnedEquality::build(&src, &Bitvector::ones(1000), 10, &ctx).unwrap();
        assert_eq!(enc.bitvectors.len(), 10);

        let predicate = Predicate::Between {
            lo: Scalar::Float(0.25),
            hi: Scalar::Float(0.749999),
        };
        let est = enc.estimate(&predicate, &ctx).unwrap();
        assert!(est.lower.cnt() <= est.upper.cnt());

        let reference: Vec<usize> = values
            .iter()
            .enumerate()
            .filter(|(_, &v)| (0.25..=0.749999).contains(&v))
            .map(|(i, _)| i)
            .collect();
        for pos in est.lower.iter_set() {
            assert!(reference.contains(&pos), "lower bound row {pos} not actually in range");
        }
        for &pos in &reference {
            assert!(est.upper.access(pos).unwrap(), "upper bound missed actual hit {pos}");
        }
    }

    #[test]
    fn all_null_column_answers_queries_without_panicking() {
        let values = uniform_1000();
        let src = ArrayValueSource::new(ColumnValues::Float(values));
        let ctx = Context::new();
        let enc = BinnedEquality::build(&src, &Bitvector::zero(1000), 10, &ctx).unwrap();
        assert!(enc.bitvectors.is_empty());

        let eq = enc
            .estimate(&Predicate::Compare { op: RelOp::Eq, value: Scalar::Float(0.5) }, &ctx)
            .unwrap();
        assert_eq!(eq.upper.cnt(), 0);

        let between = enc
            .estimate(&Predicate::Between { lo: Scalar::Float(0.1), hi: Scalar::Float(0.9) }, &ctx)
            .unwrap();
        assert_eq!(between.upper.cnt(), 0);

        let ge = enc
            .estimate(&Predicate::Compare { op: RelOp::Ge, value: Scalar::Float(0.5) }, &ctx)
            .unwrap();
        assert_eq!(ge.upper.cnt(), 0);
    }

    #[test]
    fn evaluate_matches_full_scan_via_residual() {
        let values = uniform_1000();
        let src = ArrayValueSource::new(ColumnValues::Float(values.clone()));
        let ctx = Context::new();
        let enc = BinnedEquality::build(&src, &Bitvector::ones(1000), 10, &ctx).unwrap();
        let predicate = Predicate::Between { lo: Scalar::Float(0.25), hi: Scalar::Float(0.75) };
        let exact = enc.evaluate(&predicate, &ctx, &src).unwrap();
        let reference: Vec<usize> = values
            .iter()
            .enumerate()
            .filter(|(_, &v)| (0.25..=0.75).contains(&v))
            .map(|(i, _)| i)
            .collect();
        let mut got: Vec<_> = exact.iter_set().collect();
        got.sort();
        assert_eq!(got, reference);
    }

    #[test]
    fn serialize_round_trips() {
        let values = uniform_1000();
        let src = ArrayValueSource::new(ColumnValues::Float(values));
        let ctx = Context::new();
        let enc = BinnedEquality::build(&src, &Bitvector::ones(1000), 10, &ctx).unwrap();
        let bytes = enc.serialize().unwrap();
        let back = BinnedEquality::deserialize(bytes).unwrap();
        assert_eq!(back.bin_weights(), enc.bin_weights());
    }

    #[test]
    fn cumulative_distribution_is_running_total_of_weights() {
        let values = uniform_1000();
        let src = ArrayValueSource::new(ColumnValues::Float(values));
        let ctx = Context::new();
        let enc = BinnedEquality::build(&src, &Bitvector::ones(1000), 10, &ctx).unwrap();
        let cum = enc.cumulative_distribution();
        assert_eq!(*cum.last().unwrap(), 1000);
        assert!(cum.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn expand_then_contract_range_bracket_the_original_bounds() {
        let values = uniform_1000();
        let src = ArrayValueSource::new(ColumnValues::Float(values));
        let ctx = Context::new();
        let enc = BinnedEquality::build(&src, &Bitvector::ones(1000), 10, &ctx).unwrap();
        let (lo, hi) = (Scalar::Float(0.34), Scalar::Float(0.56));
        let (elo, ehi) = enc.expand_range(&lo, &hi);
        assert!(cmp_scalars(&elo, &lo) != std::cmp::Ordering::Greater);
        assert!(cmp_scalars(&ehi, &hi) != std::cmp::Ordering::Less);
        if let Some((clo, chi)) = enc.contract_range(&lo, &hi) {
            assert!(cmp_scalars(&clo, &lo) != std::cmp::Ordering::Less);
            assert!(cmp_scalars(&chi, &hi) != std::cmp::Ordering::Greater);
        }
    }
}
