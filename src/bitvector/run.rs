//! Restartable run iteration over a [`super::Bitvector`] (`spec.md` §4.1,
//! §9 "coroutine-like lazy bitvector iteration" design note).
//!
//! Each [`Run`] is either a single literal word or a `(start, length)` fill
//! of one constant bit — the contract the bit-combination core
//! ([`crate::combine`]) relies on for size-aware strategy selection.

use super::builder::WORD_LEN;
use super::Bitvector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Run {
    /// A literal word: `width` valid bits of `bits`, starting at `start`.
    Literal { start: usize, bits: u64, width: usize },
    /// A run of `length` consecutive bits equal to `bit`, starting at `start`.
    Fill { start: usize, length: usize, bit: bool },
}

impl Run {
    pub fn start(&self) -> usize {
        match *self {
            Run::Literal { start, .. } => start,
            Run::Fill { start, .. } => start,
        }
    }

    pub fn len(&self) -> usize {
        match *self {
            Run::Literal { width, .. } => width,
            Run::Fill { length, .. } => length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Forward iterator over the runs of a bitvector, restartable from any bit
/// position via [`Bitvector::runs_from`].
pub struct RunIter<'a> {
    bv: &'a Bitvector,
    pos: usize,
    // Cache of the decompressed view so each `next()` isn't O(n).
    words: std::borrow::Cow<'a, [u64]>,
}

impl<'a> RunIter<'a> {
    pub(super) fn new(bv: &'a Bitvector, start_pos: usize) -> Self {
        let words = bv.words_view();
        Self {
            bv,
            pos: start_pos,
            words,
        }
    }
}

impl<'a> Iterator for RunIter<'a> {
    type Item = Run;

    fn next(&mut self) -> Option<Run> {
        let len = self.bv.size();
        if self.pos >= len {
            return None;
        }
        let start = self.pos;
        let block = start / WORD_LEN;
        let shift = start % WORD_LEN;
        let word = self.words.get(block).copied().unwrap_or(0);
        let payload = word >> shift;
        let width = (len - start).min(WORD_LEN - shift);
        let masked = if width < 64 {
            payload & ((1u64 << width) - 1)
        } else {
            payload
        };

        // Detect a uniform run spanning this and subsequent words so large
        // fills collapse into one `Run::Fill` instead of many literals.
        let all_zero = masked == 0;
        let all_one = masked == if width < 64 { (1u64 << width) - 1 } else { u64::MAX };
        if (all_zero || all_one) && width == (WORD_LEN - shift).min(len - start) {
            let bit = all_one;
            let mut end = start + width;
            while end < len {
                let b2 = end / WORD_LEN;
                let w2 = self.words.get(b2).copied().unwrap_or(0);
                let take = (len - end).min(WORD_LEN);
                let v2 = if take < 64 { w2 & ((1u64 << take) - 1) } else { w2 };
                let full = if bit {
                    v2 == if take < 64 { (1u64 << take) - 1 } else { u64::MAX }
                } else {
                    v2 == 0
                };
                if full {
                    end += take;
                } else {
                    break;
                }
            }
            self.pos = end;
            return Some(Run::Fill {
                start,
                length: end - start,
                bit,
            });
        }

        self.pos = start + width;
        Some(Run::Literal {
            start,
            bits: masked,
            width,
        })
    }
}

/// Summarizes a bitvector's control-word-level decomposition for
/// diagnostics (not used in the hot path; `runs()` above is what
/// `combine` consumes).
pub fn describe(bv: &Bitvector) -> Vec<(usize, &'static str)> {
    bv.runs()
        .map(|r| {
            let kind = match r {
                Run::Literal { .. } => "literal",
                Run::Fill { bit: true, .. } => "fill1",
                Run::Fill { bit: false, .. } => "fill0",
            };
            (r.len(), kind)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_collapse_large_fill() {
        let bv = Bitvector::zero(1000);
        let runs: Vec<_> = bv.runs().collect();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].len(), 1000);
    }

    #[test]
    fn runs_cover_mixed_bitvector() {
        let bv = Bitvector::from_positions([0, 1, 500, 999], 1000);
        let total: usize = bv.runs().map(|r| r.len()).sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn runs_from_restarts_midway() {
        let bv = Bitvector::from_positions([10, 200, 800], 1000);
        let full: Vec<_> = bv.runs().collect();
        let from_500: Vec<_> = bv.runs_from(500).collect();
        let total_from_full: usize = full.iter().filter(|r| r.start() >= 500).map(|r| r.len()).sum();
        let total_from_restart: usize = from_500.iter().map(|r| r.len()).sum();
        // total covered bits match even though the chunking may differ.
        assert_eq!(total_from_full + 500, 1000);
        assert_eq!(total_from_restart, 500);
    }
}
