//! Direct encoding (`spec.md` §3 "Direct", wire tag `Direct`; `index=direkte`
//! in the factory's spec language): one bitvector per small non-negative
//! integer value, indexed by the value itself rather than by a sorted
//! distinct-value lookup. Exact for every predicate kind, the same way
//! [`crate::encoding::basic::Equality`] is, but cheaper to build and query
//! when the column's domain is already a dense range of small integers
//! (a row count, an enum ordinal, a bounded code).

use crate::bitvector::Bitvector;
use crate::combine;
use crate::context::Context;
use crate::encoding::io::{pack_bitvectors, realign, unpack_bitvectors, Reader, Writer};
use crate::encoding::{Decode, Encoding, EncodingTag, Estimate, Header};
use crate::error::{IbisError, Result};
use crate::extractor::ValueSource;
use crate::offsets::{Offsets, Width};
use crate::predicate::{Predicate, RelOp, Scalar};

fn as_index(s: &Scalar) -> Option<usize> {
    match s {
        Scalar::Int(v) if *v >= 0 => Some(*v as usize),
        Scalar::UInt(v) => Some(*v as usize),
        _ => None,
    }
}

/// `bitvectors[v]` covers every row whose value equals `v`; values outside
/// `0..bitvectors.len()` never match anything.
pub struct Direct {
    n: usize,
    bitvectors: Vec<Bitvector>,
}

impl Direct {
    pub fn build(values: &dyn ValueSource, null_mask: &Bitvector) -> Result<Self> {
        let array = values.get_values_array()?;
        let n = array.len();
        let mut max_value = 0usize;
        let mut indices = Vec::with_capacity(n);
        for i in 0..n {
            if !null_mask.access(i).unwrap_or(false) {
                indices.push(None);
                continue;
            }
            let idx = as_index(&array.scalar_at(i))
                .ok_or_else(|| IbisError::Input("direct encoding requires non-negative integer values".into()))?;
            max_value = max_value.max(idx);
            indices.push(Some(idx));
        }
        let mut bitvectors: Vec<_> = (0..=max_value).map(|_| Vec::new()).collect();
        for (row, idx) in indices.into_iter().enumerate() {
            if let Some(idx) = idx {
                bitvectors[idx].push(row);
            }
        }
        let bitvectors = bitvectors
            .into_iter()
            .map(|positions| Bitvector::from_positions(positions, n))
            .collect();
        Ok(Self { n, bitvectors })
    }

    /// Extends the index to cover newly appended rows, growing existing
    /// bitvectors and allocating fresh ones for values above the previous
    /// maximum, rather than rebuilding from scratch (`spec.md` §3 Lifecycle
    /// "append").
    pub fn append(&mut self, values: &dyn ValueSource, null_mask: &Bitvector) -> Result<()> {
        let array = values.get_values_array()?;
        let new_n = array.len();
        if new_n <= self.n {
            return Ok(());
        }
        for bv in &mut self.bitvectors {
            let set: Vec<usize> = bv.iter_set().collect();
            *bv = Bitvector::from_positions(set, new_n);
        }
        for i in self.n..new_n {
            if !null_mask.access(i).unwrap_or(false) {
                continue;
            }
            let idx = as_index(&array.scalar_at(i))
                .ok_or_else(|| IbisError::Input("direct encoding requires non-negative integer values".into()))?;
            while idx >= self.bitvectors.len() {
                self.bitvectors.push(Bitvector::zero(new_n));
            }
            self.bitvectors[idx].set_bit(i, true);
        }
        self.n = new_n;
        Ok(())
    }

    fn at(&self, v: usize) -> Bitvector {
        self.bitvectors.get(v).cloned().unwrap_or_else(|| Bitvector::zero(self.n))
    }

    fn matching(&self, predicate: &Predicate) -> Vec<usize> {
        (0..self.bitvectors.len())
            .filter(|&v| {
                let s = Scalar::UInt(v as u64);
                predicate.matches(&s)
            })
            .collect()
    }
}

impl Encoding for Direct {
    fn tag(&self) -> EncodingTag {
        EncodingTag::Direct
    }

    fn n(&self) -> usize {
        self.n
    }

    fn estimate(&self, predicate: &Predicate, ctx: &Context) -> Result<Estimate> {
        if let Predicate::Compare { op: RelOp::Eq, value } = predicate {
            if let Some(v) = as_index(value) {
                return Ok(Estimate::exact(self.at(v)));
            }
        }
        let matches = self.matching(predicate);
        let bvs: Vec<_> = matches.iter().map(|&v| self.at(v)).collect();
        let combined = if bvs.is_empty() {
            Bitvector::zero(self.n)
        } else {
            combine::sum_or(&bvs, ctx)?
        };
        Ok(Estimate::exact(combined))
    }

    fn serialize(&self) -> Result<anybytes::Bytes> {
        let (offs, blob) = pack_bitvectors(&self.bitvectors);
        let offsets = Offsets::build(&offs);
        let mut w = Writer::new();
        w.put_bytes(
            &Header {
                tag: EncodingTag::Direct,
                offset_width: offsets.width().byte_width(),
            }
            .to_bytes(),
        );
        w.put_u32(self.n as u32);
        w.put_u32(self.bitvectors.len() as u32);
        let offs_bytes = offsets.to_bytes();
        w.put_u32(offs_bytes.len() as u32);
        w.put_bytes(offs_bytes.as_ref());
        w.put_bytes(&blob);
        Ok(w.into_bytes())
    }

    fn size_in_bytes(&self) -> usize {
        self.bitvectors.iter().map(|b| b.bytes()).sum()
    }

    fn decompress_large_bitvectors(&mut self, threshold_bytes: usize) {
        for bv in &mut self.bitvectors {
            if bv.bytes() > threshold_bytes {
                bv.decompress();
            }
        }
    }
}

impl Decode for Direct {
    fn deserialize(bytes: anybytes::Bytes) -> Result<Self> {
        let raw = bytes.as_ref();
        let header = Header::from_bytes(raw)?;
        let mut r = Reader::new(&raw[8..]);
        let n = r.get_u32()? as usize;
        let m = r.get_u32()? as usize;
        let offs_len = r.get_u32()? as usize;
        let offs_bytes = bytes.slice(8 + r.position()..8 + r.position() + offs_len);
        let region_start = 8 + r.position() + offs_len;
        let width = Width::from_tag(header.offset_width)?;
        let offsets = Offsets::load(realign(&offs_bytes), width, m)?;
        let region = bytes.slice(region_start..bytes.len());
        let bitvectors = unpack_bitvectors(&offsets, region, n)?;
        Ok(Self { n, bitvectors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ArrayValueSource, ColumnValues};

    fn build() -> Direct {
        let values = vec![3u64, 1, 4, 1, 5, 9, 2, 6, 5, 3];
        let src = ArrayValueSource::new(ColumnValues::UInt(values));
        Direct::build(&src, &Bitvector::ones(10)).unwrap()
    }

    #[test]
    fn eq_lookup_is_exact() {
        let enc = build();
        let ctx = Context::new();
        let est = enc
            .estimate(&Predicate::Compare { op: RelOp::Eq, value: Scalar::UInt(5) }, &ctx)
            .unwrap();
        assert_eq!(est.lower.iter_set().collect::<Vec<_>>(), vec![4, 8]);
        assert!(est.is_exact());
    }

    #[test]
    fn in_query_matches_any_listed_value() {
        let enc = build();
        let ctx = Context::new();
        let est = enc
            .estimate(&Predicate::In(vec![Scalar::UInt(1), Scalar::UInt(3)]), &ctx)
            .unwrap();
        assert_eq!(est.lower.iter_set().collect::<Vec<_>>(), vec![0, 1, 3, 9]);
    }

    #[test]
    fn value_past_max_never_matches() {
        let enc = build();
        let ctx = Context::new();
        let est = enc
            .estimate(&Predicate::Compare { op: RelOp::Eq, value: Scalar::UInt(99) }, &ctx)
            .unwrap();
        assert_eq!(est.lower.cnt(), 0);
    }

    #[test]
    fn append_extends_index_with_values_past_previous_max() {
        let mut enc = build();
        let ctx = Context::new();
        let mut values = vec![3u64, 1, 4, 1, 5, 9, 2, 6, 5, 3];
        values.extend([20, 5]);
        let src = ArrayValueSource::new(ColumnValues::UInt(values));
        enc.append(&src, &Bitvector::ones(12)).unwrap();
        assert_eq!(enc.n, 12);

        let est20 = enc
            .estimate(&Predicate::Compare { op: RelOp::Eq, value: Scalar::UInt(20) }, &ctx)
            .unwrap();
        assert_eq!(est20.lower.iter_set().collect::<Vec<_>>(), vec![10]);

        let est5 = enc
            .estimate(&Predicate::Compare { op: RelOp::Eq, value: Scalar::UInt(5) }, &ctx)
            .unwrap();
        assert_eq!(est5.lower.iter_set().collect::<Vec<_>>(), vec![4, 8, 11]);
    }

    #[test]
    fn serialize_round_trips() {
        let enc = build();
        let ctx = Context::new();
        let bytes = enc.serialize().unwrap();
        let back = Direct::deserialize(bytes).unwrap();
        let p = Predicate::Compare { op: RelOp::Eq, value: Scalar::UInt(5) };
        assert_eq!(
            enc.estimate(&p, &ctx).unwrap().lower,
            back.estimate(&p, &ctx).unwrap().lower
        );
    }
}
