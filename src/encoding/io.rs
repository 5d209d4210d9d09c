//! Manual little-endian byte packing for encoding bodies (`spec.md` §6 body
//! layout). No serialization-framework dependency carries the wire format
//! here; each concrete encoding writes a flat sequence of fixed-width
//! fields in the order the body layout table specifies, the same way the
//! offset table itself is packed in [`crate::offsets`].

use crate::bitvector::Bitvector;
use crate::error::{IbisError, Result};
use crate::offsets::Offsets;
use crate::predicate::Scalar;

#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32_vec(&mut self, vs: &[u32]) {
        self.put_u32(vs.len() as u32);
        for &v in vs {
            self.put_u32(v);
        }
    }

    pub fn put_f64_vec(&mut self, vs: &[f64]) {
        self.put_u32(vs.len() as u32);
        for &v in vs {
            self.put_f64(v);
        }
    }

    /// Pads the body so far to a 4-byte boundary, per `spec.md` §6 "Every
    /// bitvector is padded to a 4-byte boundary."
    pub fn pad4(&mut self) {
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
    }

    pub fn put_scalar(&mut self, s: &Scalar) {
        match s {
            Scalar::Int(v) => {
                self.buf.push(0);
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            Scalar::UInt(v) => {
                self.buf.push(1);
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            Scalar::Float(v) => {
                self.buf.push(2);
                self.buf.extend_from_slice(&v.to_le_bytes());
            }
            Scalar::Text(s) => {
                self.buf.push(3);
                let bytes = s.as_bytes();
                self.buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                self.buf.extend_from_slice(bytes);
            }
        }
    }

    pub fn put_scalar_vec(&mut self, vs: &[Scalar]) {
        self.put_u32(vs.len() as u32);
        for v in vs {
            self.put_scalar(v);
        }
    }

    pub fn into_bytes(self) -> anybytes::Bytes {
        anybytes::Bytes::from_source(self.buf)
    }
}

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(IbisError::integrity("<index body>", "unexpected end of encoding body"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn get_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn get_u32_vec(&mut self) -> Result<Vec<u32>> {
        let len = self.get_u32()? as usize;
        (0..len).map(|_| self.get_u32()).collect()
    }

    pub fn get_f64_vec(&mut self) -> Result<Vec<f64>> {
        let len = self.get_u32()? as usize;
        (0..len).map(|_| self.get_f64()).collect()
    }

    pub fn pad4(&mut self) {
        while self.pos % 4 != 0 && self.pos < self.buf.len() {
            self.pos += 1;
        }
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn get_scalar(&mut self) -> Result<Scalar> {
        let tag = self.take(1)?[0];
        Ok(match tag {
            0 => Scalar::Int(i64::from_le_bytes(self.take(8)?.try_into().unwrap())),
            1 => Scalar::UInt(u64::from_le_bytes(self.take(8)?.try_into().unwrap())),
            2 => Scalar::Float(f64::from_le_bytes(self.take(8)?.try_into().unwrap())),
            3 => {
                let len = self.get_u32()? as usize;
                let bytes = self.take(len)?.to_vec();
                Scalar::Text(
                    String::from_utf8(bytes).map_err(|e| IbisError::integrity("<index body>", e.to_string()))?,
                )
            }
            other => return Err(IbisError::integrity("<index body>", format!("bad scalar tag {other}"))),
        })
    }

    pub fn get_scalar_vec(&mut self) -> Result<Vec<Scalar>> {
        let len = self.get_u32()? as usize;
        (0..len).map(|_| self.get_scalar()).collect()
    }
}

/// Concatenates each bitvector's serialized control words back to back and
/// records cumulative byte offsets, ready for [`Offsets::build`]. Every
/// `Bitvector::to_bytes` output is already a whole number of 8-byte control
/// words, so the `spec.md` §6 "padded to a 4-byte boundary" requirement is
/// satisfied without extra padding.
pub fn pack_bitvectors(bvs: &[Bitvector]) -> (Vec<u64>, Vec<u8>) {
    let mut offs = vec![0u64];
    let mut blob = Vec::new();
    for bv in bvs {
        let (_, bytes) = bv.to_bytes();
        blob.extend_from_slice(bytes.as_ref());
        offs.push(blob.len() as u64);
    }
    (offs, blob)
}

/// Copies a byte slice taken out of a serialized encoding body into a
/// freshly allocated, properly aligned buffer before handing it to
/// [`Offsets::load`]'s zero-copy `u32`/`u64` view — mirrors
/// `crate::store::realign`'s rationale: a slice starting at an arbitrary
/// byte offset within the body is not guaranteed aligned.
pub fn realign(bytes: &anybytes::Bytes) -> anybytes::Bytes {
    anybytes::Bytes::from_source(bytes.as_ref().to_vec())
}

/// Reconstructs the bitvectors packed by [`pack_bitvectors`] by routing the
/// in-memory region through the same [`crate::store::BitmapStore`] a
/// file-backed index uses, rather than duplicating its alignment handling.
pub fn unpack_bitvectors(offsets: &Offsets, region: anybytes::Bytes, n: usize) -> Result<Vec<Bitvector>> {
    use std::sync::Arc;

    use crate::context::Context;
    use crate::store::{BitmapStore, ByteSource, WholeFileSource};

    let source: Arc<dyn ByteSource> = Arc::new(WholeFileSource::new("<encoding body>", region));
    let store = BitmapStore::new(source, 0, n);
    let ctx = Context::new();
    store.get_bitmap_range(offsets, &ctx, 0, offsets.count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_reader_round_trip_scalars() {
        let mut w = Writer::new();
        w.put_u32(7);
        w.put_u64(1 << 40);
        w.put_f64(3.5);
        w.put_u32_vec(&[1, 2, 3]);
        w.put_f64_vec(&[1.0, 2.0]);
        let bytes = w.into_bytes();
        let mut r = Reader::new(bytes.as_ref());
        assert_eq!(r.get_u32().unwrap(), 7);
        assert_eq!(r.get_u64().unwrap(), 1 << 40);
        assert_eq!(r.get_f64().unwrap(), 3.5);
        assert_eq!(r.get_u32_vec().unwrap(), vec![1, 2, 3]);
        assert_eq!(r.get_f64_vec().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn reader_rejects_truncated_input() {
        let mut r = Reader::new(&[1, 2, 3]);
        assert!(r.get_u64().is_err());
    }

    #[test]
    fn scalar_round_trips_every_variant() {
        let values = vec![Scalar::Int(-5), Scalar::UInt(9), Scalar::Float(1.25), Scalar::Text("hi".into())];
        let mut w = Writer::new();
        w.put_scalar_vec(&values);
        let bytes = w.into_bytes();
        let mut r = Reader::new(bytes.as_ref());
        assert_eq!(r.get_scalar_vec().unwrap(), values);
    }

    #[test]
    fn pack_unpack_bitvectors_round_trips() {
        let bvs = vec![
            Bitvector::from_positions([0, 2], 10),
            Bitvector::zero(10),
            Bitvector::from_positions([9], 10),
        ];
        let (offs, blob) = pack_bitvectors(&bvs);
        let offsets = Offsets::build(&offs);
        let back = unpack_bitvectors(&offsets, anybytes::Bytes::from_source(blob), 10).unwrap();
        assert_eq!(back, bvs);
    }
}
