//! Keyword encoding (`spec.md` §3 "Keywords", wire tag `Keywords`;
//! `index=keywords` with a `delimiters=` option in the factory's spec
//! language): tokenizes a text column on a configurable delimiter set and
//! keeps one exact bitvector per distinct token. An `In` predicate is
//! read as "contains any of these tokens" and is decided exactly by OR-ing
//! the matching token bitvectors — no residual scan is needed because
//! token membership is itself the exact answer, not an approximation of it.

use std::collections::BTreeMap;

use crate::bitvector::Bitvector;
use crate::combine;
use crate::context::Context;
use crate::encoding::io::{pack_bitvectors, realign, unpack_bitvectors, Reader, Writer};
use crate::encoding::{Decode, Encoding, EncodingTag, Estimate, Header};
use crate::error::Result;
use crate::extractor::ValueSource;
use crate::offsets::{Offsets, Width};
use crate::predicate::{Predicate, Scalar};

pub const DEFAULT_DELIMITERS: &str = " \t\n,;|";

fn tokenize(text: &str, delimiters: &str) -> impl Iterator<Item = &str> {
    text.split(|c| delimiters.contains(c)).filter(|t| !t.is_empty())
}

/// `tokens[i]` is the distinct token string stored at `bitvectors[i]`.
pub struct Keywords {
    n: usize,
    delimiters: String,
    tokens: Vec<String>,
    bitvectors: Vec<Bitvector>,
}

impl Keywords {
    pub fn build(values: &dyn ValueSource, null_mask: &Bitvector, delimiters: &str) -> Result<Self> {
        let array = values.get_values_array()?;
        let n = array.len();
        let mut rows_by_token: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for i in 0..n {
            if !null_mask.access(i).unwrap_or(false) {
                continue;
            }
            if let Scalar::Text(text) = array.scalar_at(i) {
                for token in tokenize(&text, delimiters) {
                    rows_by_token.entry(token.to_string()).or_default().push(i);
                }
            }
        }
        let mut tokens = Vec::with_capacity(rows_by_token.len());
        let mut bitvectors = Vec::with_capacity(rows_by_token.len());
        for (token, rows) in rows_by_token {
            tokens.push(token);
            bitvectors.push(Bitvector::from_positions(rows, n));
        }
        Ok(Self { n, delimiters: delimiters.to_string(), tokens, bitvectors })
    }

    fn matching_bitvectors(&self, needles: &[&str]) -> Vec<Bitvector> {
        self.tokens
            .iter()
            .zip(self.bitvectors.iter())
            .filter(|(t, _)| needles.iter().any(|n| *n == t.as_str()))
            .map(|(_, bv)| bv.clone())
            .collect()
    }
}

impl Encoding for Keywords {
    fn tag(&self) -> EncodingTag {
        EncodingTag::Keywords
    }

    fn n(&self) -> usize {
        self.n
    }

    fn estimate(&self, predicate: &Predicate, ctx: &Context) -> Result<Estimate> {
        let needles: Vec<String> = match predicate {
            Predicate::Compare { value: Scalar::Text(t), .. } => vec![t.clone()],
            Predicate::In(values) => values
                .iter()
                .filter_map(|v| match v {
                    Scalar::Text(t) => Some(t.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        let refs: Vec<&str> = needles.iter().map(|s| s.as_str()).collect();
        let hits = self.matching_bitvectors(&refs);
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
                tag: EncodingTag::Keywords,
                offset_width: offsets.width().byte_width(),
            }
            .to_bytes(),
        );
        w.put_u32(self.n as u32);
        w.put_u32(self.bitvectors.len() as u32);
        w.put_scalar(&Scalar::Text(self.delimiters.clone()));
        w.put_scalar_vec(&self.tokens.iter().map(|t| Scalar::Text(t.clone())).collect::<Vec<_>>());
        let offs_bytes = offsets.to_bytes();
        w.put_u32(offs_bytes.len() as u32);
        w.put_bytes(offs_bytes.as_ref());
        w.put_bytes(&blob);
        Ok(w.into_bytes())
    }

    fn size_in_bytes(&self) -> usize {
        self.bitvectors.iter().map(|b| b.bytes()).sum::<usize>()
            + self.tokens.iter().map(|t| t.len()).sum::<usize>()
    }

    fn decompress_large_bitvectors(&mut self, threshold_bytes: usize) {
        for bv in &mut self.bitvectors {
            if bv.bytes() > threshold_bytes {
                bv.decompress();
            }
        }
    }
}

impl Decode for Keywords {
    fn deserialize(bytes: anybytes::Bytes) -> Result<Self> {
        let raw = bytes.as_ref();
        let header = Header::from_bytes(raw)?;
        let mut r = Reader::new(&raw[8..]);
        let n = r.get_u32()? as usize;
        let m = r.get_u32()? as usize;
        let delimiters = match r.get_scalar()? {
            Scalar::Text(t) => t,
            _ => DEFAULT_DELIMITERS.to_string(),
        };
        let tokens = r
            .get_scalar_vec()?
            .into_iter()
            .map(|s| match s {
                Scalar::Text(t) => t,
                other => format!("{other:?}"),
            })
            .collect();
        let offs_len = r.get_u32()? as usize;
        let offs_bytes = bytes.slice(8 + r.position()..8 + r.position() + offs_len);
        let region_start = 8 + r.position() + offs_len;
        let width = Width::from_tag(header.offset_width)?;
        let offsets = Offsets::load(realign(&offs_bytes), width, m)?;
        let region = bytes.slice(region_start..bytes.len());
        let bitvectors = unpack_bitvectors(&offsets, region, n)?;
        Ok(Self { n, delimiters, tokens, bitvectors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ArrayValueSource, ColumnValues};

    fn build() -> Keywords {
        let values = vec![
            "red fast car".to_string(),
            "blue slow car".to_string(),
            "red bicycle".to_string(),
        ];
        let src = ArrayValueSource::new(ColumnValues::Text(values));
        Keywords::build(&src, &Bitvector::ones(3), DEFAULT_DELIMITERS).unwrap()
    }

    #[test]
    fn in_query_matches_rows_containing_any_token() {
        let enc = build();
        let ctx = Context::new();
        let est = enc
            .estimate(&Predicate::In(vec![Scalar::Text("red".into())]), &ctx)
            .unwrap();
        let mut got: Vec<_> = est.lower.iter_set().collect();
        got.sort();
        assert_eq!(got, vec![0, 2]);
        assert!(est.is_exact());
    }

    #[test]
    fn unknown_token_matches_nothing() {
        let enc = build();
        let ctx = Context::new();
        let est = enc
            .estimate(&Predicate::In(vec![Scalar::Text("truck".into())]), &ctx)
            .unwrap();
        assert_eq!(est.lower.cnt(), 0);
    }

    #[test]
    fn serialize_round_trips() {
        let enc = build();
        let ctx = Context::new();
        let bytes = enc.serialize().unwrap();
        let back = Keywords::deserialize(bytes).unwrap();
        let p = Predicate::In(vec![Scalar::Text("car".into())]);
        assert_eq!(
            enc.estimate(&p, &ctx).unwrap().lower,
            back.estimate(&p, &ctx).unwrap().lower
        );
    }
}
