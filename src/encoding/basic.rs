//! Basic equality encoding (`spec.md` §3 "Equality (basic)", wire tag
//! `BasicEquality`; `index=basic`/`relic` in the factory's spec language).
//!
//! One bitvector per distinct value. Because every distinct value keeps its
//! own exact bitvector, every predicate kind this crate supports (`spec.md`
//! §4.3) can be decided exactly by OR-ing the bitvectors of the distinct
//! values that satisfy it — no residual scan is ever needed.

use crate::bitvector::Bitvector;
use crate::combine;
use crate::context::Context;
use crate::encoding::io::{pack_bitvectors, realign, unpack_bitvectors, Reader, Writer};
use crate::encoding::{Decode, Encoding, EncodingTag, Estimate, Header};
use crate::error::Result;
use crate::extractor::ValueSource;
use crate::offsets::Offsets;
use crate::predicate::{cmp_scalars, Predicate, Scalar};

/// One bitvector per distinct value, kept in ascending value order.
pub struct Equality {
    n: usize,
    values: Vec<Scalar>,
    bitvectors: Vec<Bitvector>,
}

impl Equality {
    /// Builds an equality index over `values`, skipping rows `null_mask`
    /// marks invalid (`spec.md` §3 Column "null-mask").
    pub fn build(values: &dyn ValueSource, null_mask: &Bitvector) -> Result<Self> {
        let array = values.get_values_array()?;
        let n = array.len();
        let mut rows: Vec<(Scalar, usize)> = (0..n)
            .filter(|&i| null_mask.access(i).unwrap_or(false))
            .map(|i| (array.scalar_at(i), i))
            .collect();
        rows.sort_by(|a, b| cmp_scalars(&a.0, &b.0));

        let mut values = Vec::new();
        let mut bitvectors = Vec::new();
        let mut i = 0;
        while i < rows.len() {
            let mut j = i + 1;
            while j < rows.len() && cmp_scalars(&rows[i].0, &rows[j].0) == std::cmp::Ordering::Equal {
                j += 1;
            }
            let positions = rows[i..j].iter().map(|(_, pos)| *pos);
            values.push(rows[i].0.clone());
            bitvectors.push(Bitvector::from_positions(positions, n));
            i = j;
        }
        Ok(Self { n, values, bitvectors })
    }

    /// Distinct value count — the index's cardinality `C`.
    pub fn distinct_count(&self) -> usize {
        self.values.len()
    }

    /// Extends the index to cover newly appended rows `self.n()..values.len()`
    /// by growing existing bitvectors and adding a fresh one per newly seen
    /// distinct value, rather than rebuilding from scratch (`spec.md` §3
    /// Lifecycle "append is supported by the encoding only if the append
    /// path reconstructs the tail bitvectors").
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
            let v = array.scalar_at(i);
            match self.values.iter().position(|x| cmp_scalars(x, &v) == std::cmp::Ordering::Equal) {
                Some(idx) => self.bitvectors[idx].set_bit(i, true),
                None => {
                    self.values.push(v);
                    self.bitvectors.push(Bitvector::from_positions([i], new_n));
                }
            }
        }
        self.n = new_n;
        let mut order: Vec<usize> = (0..self.values.len()).collect();
        order.sort_by(|&a, &b| cmp_scalars(&self.values[a], &self.values[b]));
        self.values = order.iter().map(|&i| self.values[i].clone()).collect();
        self.bitvectors = order.iter().map(|&i| self.bitvectors[i].clone()).collect();
        Ok(())
    }

    fn matching_bitvectors(&self, predicate: &Predicate) -> Vec<Bitvector> {
        self.values
            .iter()
            .zip(self.bitvectors.iter())
            .filter(|(v, _)| predicate.matches(v))
            .map(|(_, bv)| bv.clone())
            .collect()
    }
}

impl Encoding for Equality {
    fn tag(&self) -> EncodingTag {
        EncodingTag::BasicEquality
    }

    fn n(&self) -> usize {
        self.n
    }

    fn estimate(&self, predicate: &Predicate, ctx: &Context) -> Result<Estimate> {
        let hits = self.matching_bitvectors(predicate);
        let combined = if hits.is_empty() {
            Bitvector::zero(self.n)
        } else {
            combine::sum_or(&hits, ctx)?
        };
        Ok(Estimate::exact(combined))
    }

    fn serialize(&self) -> Result<anybytes::Bytes> {
        let (offs, blob) = pack_bitvectors(&self.bitvectors);
        let offsets = Offsets::build(&offs);

        let mut w = Writer::new();
        w.put_bytes(
            &Header {
                tag: EncodingTag::BasicEquality,
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

impl Decode for Equality {
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
        let width = crate::offsets::Width::from_tag(header.offset_width)?;
        let offsets = Offsets::load(realign(&offs_bytes), width, m)?;
        let region = bytes.slice(region_start..bytes.len());
        let bitvectors = unpack_bitvectors(&offsets, region, n)?;
        Ok(Self { n, values, bitvectors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ArrayValueSource, ColumnValues};
    use crate::predicate::RelOp;

    fn build_s1() -> Equality {
        let values = vec![3, 1, 4, 1, 5, 9, 2, 6, 5, 3];
        let src = ArrayValueSource::new(ColumnValues::Int(values));
        let null_mask = Bitvector::ones(10);
        Equality::build(&src, &null_mask).unwrap()
    }

    #[test]
    fn s1_equality_value_query() {
        let enc = build_s1();
        let ctx = Context::new();
        let est = enc
            .estimate(&Predicate::Compare { op: RelOp::Eq, value: Scalar::Int(5) }, &ctx)
            .unwrap();
        assert_eq!(est.lower.iter_set().collect::<Vec<_>>(), vec![4, 8]);
        assert!(est.is_exact());
    }

    #[test]
    fn s1_equality_in_query() {
        let enc = build_s1();
        let ctx = Context::new();
        let est = enc
            .estimate(&Predicate::In(vec![Scalar::Int(1), Scalar::Int(3)]), &ctx)
            .unwrap();
        assert_eq!(est.lower.iter_set().collect::<Vec<_>>(), vec![0, 1, 3, 9]);
    }

    #[test]
    fn invariant3_or_of_all_bitvectors_equals_null_mask() {
        let enc = build_s1();
        let ctx = Context::new();
        let combined = combine::sum_or(&enc.bitvectors, &ctx).unwrap();
        assert_eq!(combined.cnt(), 10);
    }

    #[test]
    fn append_extends_index_without_full_rebuild() {
        let mut enc = build_s1();
        let ctx = Context::new();
        let mut values = vec![3, 1, 4, 1, 5, 9, 2, 6, 5, 3];
        values.extend([5, 7]);
        let src = ArrayValueSource::new(ColumnValues::Int(values));
        enc.append(&src, &Bitvector::ones(12)).unwrap();
        assert_eq!(enc.n, 12);

        let est = enc
            .estimate(&Predicate::Compare { op: RelOp::Eq, value: Scalar::Int(5) }, &ctx)
            .unwrap();
        assert_eq!(est.lower.iter_set().collect::<Vec<_>>(), vec![4, 8, 10]);

        let est7 = enc
            .estimate(&Predicate::Compare { op: RelOp::Eq, value: Scalar::Int(7) }, &ctx)
            .unwrap();
        assert_eq!(est7.lower.iter_set().collect::<Vec<_>>(), vec![11]);
    }

    #[test]
    fn serialize_then_deserialize_preserves_answers() {
        let enc = build_s1();
        let ctx = Context::new();
        let bytes = enc.serialize().unwrap();
        let back = Equality::deserialize(bytes).unwrap();
        let p = Predicate::Compare { op: RelOp::Eq, value: Scalar::Int(5) };
        assert_eq!(
            enc.estimate(&p, &ctx).unwrap().lower,
            back.estimate(&p, &ctx).unwrap().lower
        );
        assert_eq!(back.tag() as u8, EncodingTag::BasicEquality as u8);
    }
}
