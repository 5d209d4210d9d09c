//! Interval encoding (`spec.md` §3 "Interval", wire tag `Interval`, `mesa`
//! in the source's naming): built on top of a [`BinnedEquality`] base —
//! `bits[k]` covers a window of `⌊K/2⌋` consecutive base equality bins
//! starting at `k`, so a range query needs fewer OR'd bitvectors than the
//! plain binned encoding at the cost of overlapping storage.

use crate::bitvector::Bitvector;
use crate::combine;
use crate::context::Context;
use crate::encoding::binned::BinnedEquality;
use crate::encoding::io::{pack_bitvectors, realign, unpack_bitvectors, Reader, Writer};
use crate::encoding::{Decode, Encoding, EncodingTag, Estimate, Header};
use crate::error::Result;
use crate::extractor::ValueSource;
use crate::offsets::{Offsets, Width};
use crate::predicate::{cmp_scalars, Predicate, RelOp, Scalar};

pub struct Interval {
    n: usize,
    window_lo: Vec<Scalar>,
    window_hi: Vec<Scalar>,
    windows: Vec<Bitvector>,
    total: Bitvector,
}

impl Interval {
    /// `k_bins` base equality bins (via [`crate::bins::divide_counts`]); each window
    /// spans `half = max(1, k_bins / 2)` consecutive base bins.
    pub fn build(values: &dyn ValueSource, null_mask: &Bitvector, k_bins: usize, ctx: &Context) -> Result<Self> {
        let base = BinnedEquality::build(values, null_mask, k_bins, ctx)?;
        let (bin_lo, bin_hi) = base.bin_boundaries();
        let base_bins = base.bins();
        let num_base = base_bins.len();
        let half = (k_bins / 2).max(1);

        let mut window_lo = Vec::with_capacity(num_base);
        let mut window_hi = Vec::with_capacity(num_base);
        let mut windows = Vec::with_capacity(num_base);
        for k in 0..num_base {
            let end = (k + half).min(num_base);
            window_lo.push(bin_lo[k].clone());
            window_hi.push(bin_hi[end - 1].clone());
            windows.push(if end - k == 1 {
                base_bins[k].clone()
            } else {
                combine::sum_or(&base_bins[k..end], ctx)?
            });
        }
        let total = if windows.is_empty() {
            Bitvector::zero(base.n())
        } else {
            combine::sum_or(&windows, ctx)?
        };
        Ok(Self { n: base.n(), window_lo, window_hi, windows, total })
    }

    fn window_containing(&self, x: &Scalar) -> usize {
        self.window_lo
            .iter()
            .enumerate()
            .rev()
            .find(|(_, lo)| cmp_scalars(lo, x) != std::cmp::Ordering::Greater)
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    fn or_range(&self, lo: usize, hi: usize, ctx: &Context) -> Result<Bitvector> {
        if self.windows.is_empty() || lo > hi {
            return Ok(Bitvector::zero(self.n));
        }
        combine::sum_or(&self.windows[lo..=hi], ctx)
    }

    fn ge_estimate(&self, x: &Scalar, ctx: &Context) -> Result<Estimate> {
        let b = self.window_containing(x);
        let last = self.window_lo.len().saturating_sub(1);
        let lower = if b + 1 <= last { self.or_range(b + 1, last, ctx)? } else { Bitvector::zero(self.n) };
        let mut upper = lower.clone();
        upper.or_assign(&self.windows[b]);
        Ok(Estimate { lower, upper })
    }

    fn le_estimate(&self, x: &Scalar, ctx: &Context) -> Result<Estimate> {
        let b = self.window_containing(x);
        let lower = if b > 0 { self.or_range(0, b - 1, ctx)? } else { Bitvector::zero(self.n) };
        let mut upper = lower.clone();
        upper.or_assign(&self.windows[b]);
        Ok(Estimate { lower, upper })
    }

    fn between_estimate(&self, lo: &Scalar, hi: &Scalar, ctx: &Context) -> Result<Estimate> {
        let blo = self.window_containing(lo);
        let bhi = self.window_containing(hi);
        let lower = if blo + 1 <= bhi.saturating_sub(1) {
            self.or_range(blo + 1, bhi - 1, ctx)?
        } else {
            Bitvector::zero(self.n)
        };
        let mut upper = lower.clone();
        upper.or_assign(&self.windows[blo]);
        upper.or_assign(&self.windows[bhi]);
        Ok(Estimate { lower, upper })
    }

    fn eq_estimate(&self, x: &Scalar) -> Estimate {
        let b = self.window_containing(x);
        Estimate { lower: Bitvector::zero(self.n), upper: self.windows[b].clone() }
    }
}

impl Encoding for Interval {
    fn tag(&self) -> EncodingTag {
        EncodingTag::Interval
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
            Predicate::RangeJoin { .. } => Ok(Estimate { lower: Bitvector::zero(self.n), upper: self.total.clone() }),
        }
    }

    fn serialize(&self) -> Result<anybytes::Bytes> {
        let (offs, blob) = pack_bitvectors(&self.windows);
        let offsets = Offsets::build(&offs);
        let mut w = Writer::new();
        w.put_bytes(
            &Header {
                tag: EncodingTag::Interval,
                offset_width: offsets.width().byte_width(),
            }
            .to_bytes(),
        );
        w.put_u32(self.n as u32);
        w.put_u32(self.windows.len() as u32);
        w.put_scalar_vec(&self.window_lo);
        w.put_scalar_vec(&self.window_hi);
        let offs_bytes = offsets.to_bytes();
        w.put_u32(offs_bytes.len() as u32);
        w.put_bytes(offs_bytes.as_ref());
        w.put_bytes(&blob);
        Ok(w.into_bytes())
    }

    fn size_in_bytes(&self) -> usize {
        self.windows.iter().map(|b| b.bytes()).sum::<usize>() + self.window_lo.len() * 32
    }

    fn decompress_large_bitvectors(&mut self, threshold_bytes: usize) {
        for bv in &mut self.windows {
            if bv.bytes() > threshold_bytes {
                bv.decompress();
            }
        }
        if self.total.bytes() > threshold_bytes {
            self.total.decompress();
        }
    }
}

impl Decode for Interval {
    fn deserialize(bytes: anybytes::Bytes) -> Result<Self> {
        let raw = bytes.as_ref();
        let header = Header::from_bytes(raw)?;
        let mut r = Reader::new(&raw[8..]);
        let n = r.get_u32()? as usize;
        let m = r.get_u32()? as usize;
        let window_lo = r.get_scalar_vec()?;
        let window_hi = r.get_scalar_vec()?;
        let offs_len = r.get_u32()? as usize;
        let offs_bytes = bytes.slice(8 + r.position()..8 + r.position() + offs_len);
        let region_start = 8 + r.position() + offs_len;
        let width = Width::from_tag(header.offset_width)?;
        let offsets = Offsets::load(realign(&offs_bytes), width, m)?;
        let region = bytes.slice(region_start..bytes.len());
        let windows = unpack_bitvectors(&offsets, region, n)?;
        let total = if windows.is_empty() {
            Bitvector::zero(n)
        } else {
            combine::sum_or(&windows, &Context::new())?
        };
        Ok(Self { n, window_lo, window_hi, windows, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ArrayValueSource, ColumnValues};

    #[test]
    fn between_matches_reference_scan_after_residual() {
        let values: Vec<f64> = (0..500).map(|i| i as f64).collect();
        let src = ArrayValueSource::new(ColumnValues::Float(values.clone()));
        let ctx = Context::new();
        let enc = Interval::build(&src, &Bitvector::ones(500), 10, &ctx).unwrap();
        let predicate = Predicate::Between { lo: Scalar::Float(100.0), hi: Scalar::Float(200.0) };
        let exact = enc.evaluate(&predicate, &ctx, &src).unwrap();
        let reference: Vec<usize> = values
            .iter()
            .enumerate()
            .filter(|(_, &v)| (100.0..=200.0).contains(&v))
            .map(|(i, _)| i)
            .collect();
        let mut got: Vec<_> = exact.iter_set().collect();
        got.sort();
        assert_eq!(got, reference);
    }

    #[test]
    fn serialize_round_trips() {
        let values: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let src = ArrayValueSource::new(ColumnValues::Float(values));
        let ctx = Context::new();
        let enc = Interval::build(&src, &Bitvector::ones(200), 8, &ctx).unwrap();
        let bytes = enc.serialize().unwrap();
        let back = Interval::deserialize(bytes).unwrap();
        assert_eq!(back.windows.len(), enc.windows.len());
    }
}
