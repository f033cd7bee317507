// bitmap.rs — Fixed-size bit vector keyed by topological node id
//
// Reach sets and subgraph membership are stored as `LargeBitmap`s of length N
// (node count), so unions and containment checks are word-wise operations.

use std::fmt;

const WORD_BITS: usize = 64;

/// A fixed-length bit vector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LargeBitmap {
    words: Vec<u64>,
    len: usize,
}

impl LargeBitmap {
    pub fn new(len: usize) -> Self {
        LargeBitmap {
            words: vec![0; len.div_ceil(WORD_BITS)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Set bit `i`. Out-of-range indices are ignored.
    pub fn set(&mut self, i: usize) {
        if i < self.len {
            self.words[i / WORD_BITS] |= 1u64 << (i % WORD_BITS);
        }
    }

    pub fn get(&self, i: usize) -> bool {
        i < self.len && (self.words[i / WORD_BITS] & (1u64 << (i % WORD_BITS))) != 0
    }

    /// `self |= other`. Both bitmaps must have the same length.
    pub fn union_with(&mut self, other: &LargeBitmap) {
        debug_assert_eq!(self.len, other.len);
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst |= *src;
        }
    }

    /// `self &= !other`.
    pub fn subtract(&mut self, other: &LargeBitmap) {
        debug_assert_eq!(self.len, other.len);
        for (dst, src) in self.words.iter_mut().zip(&other.words) {
            *dst &= !*src;
        }
    }

    /// Set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            let mut w = word;
            std::iter::from_fn(move || {
                if w == 0 {
                    return None;
                }
                let bit = w.trailing_zeros() as usize;
                w &= w - 1;
                Some(wi * WORD_BITS + bit)
            })
        })
    }
}

/// Render ascending ids as compressed ranges: `0~3,5,7~9`.
pub fn compress_ranges(ids: impl IntoIterator<Item = usize>) -> String {
    let mut out = String::new();
    let mut run: Option<(usize, usize)> = None;
    let flush = |out: &mut String, (lo, hi): (usize, usize)| {
        if !out.is_empty() {
            out.push(',');
        }
        if lo == hi {
            out.push_str(&lo.to_string());
        } else {
            out.push_str(&format!("{lo}~{hi}"));
        }
    };
    for id in ids {
        run = match run {
            Some((lo, hi)) if id == hi + 1 => Some((lo, id)),
            Some(prev) => {
                flush(&mut out, prev);
                Some((id, id))
            }
            None => Some((id, id)),
        };
    }
    if let Some(last) = run {
        flush(&mut out, last);
    }
    out
}

impl fmt::Display for LargeBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", compress_ranges(self.iter()))
    }
}
