//! Raw (flat, 64-bit-per-word) bit accumulation, and the conversions
//! between that flat form and the compressed word-aligned-hybrid control
//! words used by [`super::Bitvector`].
//!
//! The flat builder mirrors the teacher crate's `BitVectorBuilder`
//! (`examples/triblespace-sucds/src/bit_vector/bit_vector.rs`): push bits
//! or whole words one word at a time, tracking a running bit length.

use super::word::{decode, make_fill, make_literal, Decoded, MAX_FILL_RUN, PAYLOAD_BITS};

pub const WORD_LEN: usize = 64;

/// Accumulates a flat (uncompressed) bit stream, one machine word at a time.
#[derive(Debug, Default, Clone)]
pub struct RawBitBuilder {
    words: Vec<u64>,
    len: usize,
}

impl RawBitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_len_hint(bits: usize) -> Self {
        Self {
            words: Vec::with_capacity(bits / WORD_LEN + 1),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn push_bit(&mut self, bit: bool) {
        let pos_in_word = self.len % WORD_LEN;
        if pos_in_word == 0 {
            self.words.push(bit as u64);
        } else if bit {
            *self.words.last_mut().unwrap() |= 1 << pos_in_word;
        }
        self.len += 1;
    }

    /// Pushes the low `n` bits of `bits` (`n` in `0..=64`).
    pub fn push_bits_n(&mut self, bits: u64, n: usize) {
        debug_assert!(n <= WORD_LEN);
        if n == 0 {
            return;
        }
        let mask = if n == WORD_LEN { u64::MAX } else { (1u64 << n) - 1 };
        let bits = bits & mask;

        let pos_in_word = self.len % WORD_LEN;
        if pos_in_word == 0 {
            self.words.push(bits);
        } else {
            *self.words.last_mut().unwrap() |= bits << pos_in_word;
            if n > WORD_LEN - pos_in_word {
                self.words.push(bits >> (WORD_LEN - pos_in_word));
            }
        }
        self.len += n;
    }

    /// Pushes `count` repetitions of a constant bit, a word at a time.
    pub fn push_run(&mut self, bit: bool, mut count: u64) {
        let fill_word = if bit { u64::MAX } else { 0 };
        // Fast path: push whole words while aligned, then handle the tail.
        while count > 0 {
            let pos_in_word = self.len % WORD_LEN;
            if pos_in_word == 0 && count >= WORD_LEN as u64 {
                self.words.push(fill_word);
                self.len += WORD_LEN;
                count -= WORD_LEN as u64;
            } else {
                let room = (WORD_LEN - pos_in_word) as u64;
                let take = count.min(room) as usize;
                self.push_bits_n(fill_word, take);
                count -= take as u64;
            }
        }
    }

    pub fn into_words(self) -> (Vec<u64>, usize) {
        (self.words, self.len)
    }
}

/// Returns the `len`-bit group starting at bit position `pos` of `words`,
/// zero-extended if the group would run past `total_len`. `len` must be
/// `<= 64`.
fn get_bits(words: &[u64], total_len: usize, pos: usize, len: usize) -> u64 {
    if len == 0 || pos >= total_len {
        return 0;
    }
    let avail = (total_len - pos).min(len);
    let block = pos / WORD_LEN;
    let shift = pos % WORD_LEN;
    let mut acc: u64 = if block < words.len() { words[block] >> shift } else { 0 };
    if shift + avail > WORD_LEN && block + 1 < words.len() {
        acc |= words[block + 1] << (WORD_LEN - shift);
    }
    if avail < 64 {
        acc &= (1u64 << avail) - 1;
    }
    acc
}

/// Compresses a flat bit array into word-aligned-hybrid control words.
pub fn compress_words(words: &[u64], len: usize) -> Vec<u64> {
    let mut out = Vec::new();
    let payload = PAYLOAD_BITS as usize;
    let mut pos = 0usize;
    while pos < len {
        let take = payload.min(len - pos);
        let group = get_bits(words, len, pos, take);
        let full_zero = take == payload && group == 0;
        let full_one = take == payload && group == (1u64 << payload) - 1;
        if full_zero || full_one {
            let bit = full_one;
            let mut run: u64 = 1;
            let mut p2 = pos + payload;
            while p2 + payload <= len {
                let g2 = get_bits(words, len, p2, payload);
                let v2 = g2 == (1u64 << payload) - 1;
                let z2 = g2 == 0;
                if (bit && v2) || (!bit && z2) {
                    run += 1;
                    p2 += payload;
                } else {
                    break;
                }
            }
            let mut remaining = run;
            while remaining > 0 {
                let chunk = remaining.min(MAX_FILL_RUN);
                out.push(make_fill(bit, chunk));
                remaining -= chunk;
            }
            pos = p2;
        } else {
            out.push(make_literal(group));
            pos += take;
        }
    }
    out
}

/// Expands word-aligned-hybrid control words back into a flat bit array of
/// exactly `len` bits.
pub fn decompress_words(ctrl: &[u64], len: usize) -> Vec<u64> {
    let mut builder = RawBitBuilder::with_len_hint(len);
    let payload = PAYLOAD_BITS as u64;
    for &w in ctrl {
        if builder.len() >= len {
            break;
        }
        match decode(w) {
            Decoded::Literal(bits) => {
                let take = payload.min((len - builder.len()) as u64) as usize;
                builder.push_bits_n(bits, take);
            }
            Decoded::Fill { bit, run } => {
                let total_bits = run * payload;
                let take = total_bits.min((len - builder.len()) as u64);
                builder.push_run(bit, take);
            }
        }
    }
    // Pad with zeros if control words under-cover (shouldn't happen for
    // well-formed input, but keeps the function total).
    while builder.len() < len {
        builder.push_bit(false);
    }
    let (words, _) = builder.into_words();
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_builder_push_bit() {
        let mut b = RawBitBuilder::new();
        for bit in [true, false, false, true] {
            b.push_bit(bit);
        }
        let (words, len) = b.into_words();
        assert_eq!(len, 4);
        assert_eq!(words[0] & 0b1111, 0b1001);
    }

    #[test]
    fn compress_decompress_roundtrip_mixed() {
        let mut b = RawBitBuilder::new();
        // 200 zeros, 5 ones, 300 zeros, alternate tail
        b.push_run(false, 200);
        b.push_run(true, 5);
        b.push_run(false, 300);
        for i in 0..10 {
            b.push_bit(i % 2 == 0);
        }
        let (words, len) = b.into_words();
        let ctrl = compress_words(&words, len);
        let back = decompress_words(&ctrl, len);
        assert_eq!(words, back);
    }

    #[test]
    fn compress_all_zero_is_few_words() {
        let mut b = RawBitBuilder::new();
        b.push_run(false, 1_000_000);
        let (words, len) = b.into_words();
        let ctrl = compress_words(&words, len);
        assert!(ctrl.len() < 10, "expected heavy compression, got {} words", ctrl.len());
        let back = decompress_words(&ctrl, len);
        assert_eq!(words, back);
    }
}
