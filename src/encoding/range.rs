//! Cumulative range encoding (`spec.md` §3 "Range (cumulative equality)",
//! wire tag `Range`): `bits[k]` = positions where the column value is `<=`
//! the k-th distinct value. A range `v < x ≤ w` is answered by one OR plus
//! one ANDNOT (`spec.md` §4.3 bullet 2).

use crate::bitvector::Bitvector;
use crate::context::Context;
use crate::encoding::io::{pack_bitvectors, realign, unpack_bitvectors, Reader, Writer};
use crate::encoding::{Decode, Encoding, EncodingTag, Estimate, Header};
use crate::error::Result;
use crate::extractor::ValueSource;
use crate::offsets::{Offsets, Width};
use crate::predicate::{cmp_scalars, Predicate, RelOp, Scalar};

/// `bitvectors[k]` covers every row whose value is `<= values[k]`,
/// `values` sorted ascending.
pub struct RangeEquality {
    n: usize,
    values: Vec<Scalar>,
    bitvectors: Vec<Bitvector>,
}

impl RangeEquality {
    pub fn build(values: &dyn ValueSource, null_mask: &Bitvector) -> Result<Self> {
        let array = values.get_values_array()?;
        let n = array.len();
        let mut rows: Vec<(Scalar, usize)> = (0..n)
            .filter(|&i| null_mask.access(i).unwrap_or(false))
            .map(|i| (array.scalar_at(i), i))
            .collect();
        rows.sort_by(|a, b| cmp_scalars(&a.0, &b.0));

        let mut distinct_values = Vec::new();
        let mut cumulative = Vec::new();
        let mut acc = Bitvector::zero(n);
        let mut i = 0;
        while i < rows.len() {
            let mut j = i + 1;
            while j < rows.len() && cmp_scalars(&rows[i].0, &rows[j].0) == std::cmp::Ordering::Equal {
                j += 1;
            }
            let group = Bitvector::from_positions(rows[i..j].iter().map(|(_, pos)| *pos), n);
            acc.or_assign(&group);
            distinct_values.push(rows[i].0.clone());
            cumulative.push(acc.clone());
            i = j;
        }
        Ok(Self {
            n,
            values: distinct_values,
            bitvectors: cumulative,
        })
    }

    /// Largest index `k` with `values[k] <= x`, or `None` if every value
    /// exceeds `x`.
    fn le_index(&self, x: &Scalar) -> Option<usize> {
        self.values
            .iter()
            .enumerate()
            .rev()
            .find(|(_, v)| cmp_scalars(v, x) != std::cmp::Ordering::Greater)
            .map(|(i, _)| i)
    }

    /// Largest index `k` with `values[k] < x`, or `None`.
    fn lt_index(&self, x: &Scalar) -> Option<usize> {
        self.values
            .iter()
            .enumerate()
            .rev()
            .find(|(_, v)| cmp_scalars(v, x) == std::cmp::Ordering::Less)
            .map(|(i, _)| i)
    }

    fn at_or_zero(&self, idx: Option<usize>) -> Bitvector {
        match idx {
            Some(k) => self.bitvectors[k].clone(),
            None => Bitvector::zero(self.n),
        }
    }

    fn le(&self, x: &Scalar) -> Bitvector {
        self.at_or_zero(self.le_index(x))
    }

    fn lt(&self, x: &Scalar) -> Bitvector {
        self.at_or_zero(self.lt_index(x))
    }

    fn complement(&self, bv: &Bitvector) -> Bitvector {
        let mut c = bv.clone();
        c.flip();
        c
    }

    fn eq(&self, x: &Scalar) -> Bitvector {
        let mut hi = self.le(x);
        let lo = self.lt(x);
        hi.andnot_assign(&lo);
        hi
    }

    fn between(&self, lo: &Scalar, hi: &Scalar) -> Bitvector {
        let mut upper = self.le(hi);
        let below = self.lt(lo);
        upper.andnot_assign(&below);
        upper
    }
}

impl Encoding for RangeEquality {
    fn tag(&self) -> EncodingTag {
        EncodingTag::Range
    }

    fn n(&self) -> usize {
        self.n
    }

    fn estimate(&self, predicate: &Predicate, _ctx: &Context) -> Result<Estimate> {
        let hits = match predicate {
            Predicate::Compare { op, value } => match op {
                RelOp::Le => self.le(value),
                RelOp::Lt => self.lt(value),
                RelOp::Ge => self.complement(&self.lt(value)),
                RelOp::Gt => self.complement(&self.le(value)),
                RelOp::Eq => self.eq(value),
                RelOp::Ne => self.complement(&self.eq(value)),
            },
            Predicate::Between { lo, hi } => self.between(lo, hi),
            Predicate::In(values) => {
                let mut acc = Bitvector::zero(self.n);
                for v in values {
                    acc.or_assign(&self.eq(v));
                }
                acc
            }
            Predicate::RangeJoin { .. } => Bitvector::zero(self.n),
        };
        Ok(Estimate::exact(hits))
    }

    fn serialize(&self) -> Result<anybytes::Bytes> {
        let (offs, blob) = pack_bitvectors(&self.bitvectors);
        let offsets = Offsets::build(&offs);
        let mut w = Writer::new();
        w.put_bytes(
            &Header {
                tag: EncodingTag::Range,
                offset_width: offsets.width().byte_width(),
            }
            .to_bytes(),
        );
        w.put_u32(self.n as u32);
        w.put_u32(self.bitvectors.len() as u32);
        w.put_scalar_vec(&self.values);
        let offs_bytes = offsets.to_bytes();
        w.put_u32(offs_bytes.len() as u32);
        w.put_bytes(offs_bytes.as_ref());
        w.put_bytes(&blob);
        Ok(w.into_bytes())
    }

    fn size_in_bytes(&self) -> usize {
        self.bitvectors.iter().map(|b| b.bytes()).sum::<usize>() + self.values.len() * 16
    }

    fn decompress_large_bitvectors(&mut self, threshold_bytes: usize) {
        for bv in &mut self.bitvectors {
            if bv.bytes() > threshold_bytes {
                bv.decompress();
            }
        }
    }
}

impl Decode for RangeEquality {
    fn deserialize(bytes: anybytes::Bytes) -> Result<Self> {
        let raw = bytes.as_ref();
        let header = Header::from_bytes(raw)?;
        let mut r = Reader::new(&raw[8..]);
        let n = r.get_u32()? as usize;
        let m = r.get_u32()? as usize;
        let values = r.get_scalar_vec()?;
        let offs_len = r.get_u32()? as usize;
        let offs_bytes = bytes.slice(8 + r.position()..8 + r.position() + offs_len);
        let region_start = 8 + r.position() + offs_len;
        let width = Width::from_tag(header.offset_width)?;
        let offsets = Offsets::load(realign(&offs_bytes), width, m)?;
        let region = bytes.slice(region_start..bytes.len());
        let bitvectors = unpack_bitvectors(&offsets, region, n)?;
        Ok(Self { n, values, bitvectors })
    }
}
