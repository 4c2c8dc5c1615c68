//! Golomb-Rice coding of the split-point sequence.
//!
//! The encoder appends two kinds of codes to one growing bit sequence,
//! packed LSB-first into 64-bit words: fixed-width truncated-binary codes
//! (the low `log2golomb` bits of each value, written pre-order during the
//! recursive split) and unary codes (the quotients, appended after all
//! fixed codes of a bucket). The reader keeps two cursors, one per region,
//! and must consume codes in exactly the order they were appended.

use keydex_common::{Result, error::Error};

use crate::bits::select64;

/// Growing Golomb-Rice bit stream.
#[derive(Default)]
pub struct GolombRice {
    bit_count: usize,
    data: Vec<u64>,
}

impl GolombRice {
    /// Appends the unary encoding of every value in `unary`: `u` zero bits
    /// followed by a single set bit.
    pub fn append_unary_all(&mut self, unary: &[u64]) {
        let mut bit_inc = 0usize;
        for &u in unary {
            bit_inc += u as usize + 1;
        }
        let target = (self.bit_count + bit_inc).div_ceil(64);
        self.data.resize(target.max(self.data.len()), 0);

        for &u in unary {
            self.bit_count += u as usize;
            self.data[self.bit_count / 64] |= 1u64 << (self.bit_count & 63);
            self.bit_count += 1;
        }
    }

    /// Appends the low `log2golomb` bits of `v` at the current cursor,
    /// splitting across a word boundary when needed. Width 0 is a no-op
    /// (degenerate single-slot case).
    pub fn append_fixed(&mut self, v: u64, log2golomb: u32) {
        if log2golomb == 0 {
            return;
        }
        let lower_bits = v & ((1u64 << log2golomb) - 1);
        let used_bits = (self.bit_count & 63) as u32;
        let target = (self.bit_count + log2golomb as usize).div_ceil(64);
        self.data.resize(target.max(self.data.len()), 0);
        let mut ptr = self.bit_count / 64;
        let mut word = self.data[ptr] | (lower_bits << used_bits);
        if used_bits + log2golomb > 64 {
            self.data[ptr] = word;
            ptr += 1;
            word = lower_bits >> (64 - used_bits);
        }
        self.data[ptr] = word;
        self.bit_count += log2golomb as usize;
    }

    /// Total bits appended so far.
    pub fn bits(&self) -> usize {
        self.bit_count
    }

    pub fn data(&self) -> &[u64] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u64> {
        self.data
    }
}

/// Cursor pair over an encoded Golomb-Rice stream: a fixed-code cursor and
/// a unary cursor running ahead of it within one bucket's region. Every
/// word access is bounds checked and surfaces a corrupt-index error rather
/// than panicking.
pub struct GolombRiceReader<'a> {
    data: &'a [u64],
    fixed_offset: usize,
    unary_window: u64,
    unary_ptr: usize,
    valid_lower_bits: usize,
}

impl<'a> GolombRiceReader<'a> {
    pub fn new(data: &'a [u64]) -> GolombRiceReader<'a> {
        GolombRiceReader {
            data,
            fixed_offset: 0,
            unary_window: 0,
            unary_ptr: 0,
            valid_lower_bits: 0,
        }
    }

    fn word(&self, idx: usize) -> Result<u64> {
        self.data.get(idx).copied().ok_or_else(|| {
            Error::invalid_format(
                "golomb-rice stream",
                format!("read past end of stream (word {idx} of {})", self.data.len()),
            )
        })
    }

    /// Positions the fixed-code cursor at `bit_pos` and the unary cursor
    /// `unary_offset` bits further, at the start of the unary region.
    pub fn read_reset(&mut self, bit_pos: usize, unary_offset: usize) -> Result<()> {
        self.fixed_offset = bit_pos;
        let unary_pos = bit_pos + unary_offset;
        self.unary_ptr = unary_pos / 64;
        self.unary_window = self.word(self.unary_ptr)? >> (unary_pos & 63);
        self.valid_lower_bits = 64 - (unary_pos & 63);
        self.unary_ptr += 1;
        Ok(())
    }

    /// Reads the next Golomb-Rice code: unary quotient from the unary
    /// cursor, `log2golomb` remainder bits from the fixed cursor.
    pub fn read_next(&mut self, log2golomb: u32) -> Result<u64> {
        let mut result = 0u64;
        if self.unary_window == 0 {
            result += self.valid_lower_bits as u64;
            self.unary_window = self.word(self.unary_ptr)?;
            self.unary_ptr += 1;
            while self.unary_window == 0 {
                result += 64;
                self.unary_window = self.word(self.unary_ptr)?;
                self.unary_ptr += 1;
            }
            self.valid_lower_bits = 64;
        }
        let pos = self.unary_window.trailing_zeros() as usize;
        self.unary_window >>= pos;
        self.unary_window >>= 1;
        self.valid_lower_bits -= pos + 1;
        result += pos as u64;

        if log2golomb > 0 {
            let idx = self.fixed_offset / 64;
            let shift = (self.fixed_offset & 63) as u32;
            let mut fixed = self.word(idx)? >> shift;
            if shift + log2golomb > 64 {
                fixed |= self.word(idx + 1)? << (64 - shift);
            }
            result = (result << log2golomb) | (fixed & ((1u64 << log2golomb) - 1));
            self.fixed_offset += log2golomb as usize;
        }
        Ok(result)
    }

    /// Skips `nodes` unary codes and advances the fixed cursor by
    /// `fixed_bits`, jumping over an entire encoded subtree.
    pub fn skip_subtree(&mut self, nodes: usize, fixed_bits: usize) -> Result<()> {
        if nodes == 0 {
            self.fixed_offset += fixed_bits;
            return Ok(());
        }
        let mut missing = nodes;
        let mut cnt = self.unary_window.count_ones() as usize;
        while cnt < missing {
            missing -= cnt;
            self.unary_window = self.word(self.unary_ptr)?;
            self.unary_ptr += 1;
            self.valid_lower_bits = 64;
            cnt = self.unary_window.count_ones() as usize;
        }
        let pos = select64(self.unary_window, missing - 1);
        self.unary_window >>= pos;
        self.unary_window >>= 1;
        self.valid_lower_bits -= pos + 1;
        self.fixed_offset += fixed_bits;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_fixed_and_unary() {
        let log2 = 4u32;
        let values = [0u64, 1, 5, 15, 16, 100, 255, 1000];
        let mut gr = GolombRice::default();
        let mut unary = Vec::new();
        for &v in &values {
            gr.append_fixed(v, log2);
            unary.push(v >> log2);
        }
        let fixed_bits = gr.bits();
        assert_eq!(fixed_bits, values.len() * log2 as usize);
        gr.append_unary_all(&unary);

        let mut reader = GolombRiceReader::new(gr.data());
        reader.read_reset(0, fixed_bits).unwrap();
        for &v in &values {
            assert_eq!(reader.read_next(log2).unwrap(), v);
        }
    }

    #[test]
    fn test_zero_width_fixed_is_noop() {
        let mut gr = GolombRice::default();
        gr.append_fixed(12345, 0);
        assert_eq!(gr.bits(), 0);
        assert!(gr.data().is_empty());
    }

    #[test]
    fn test_fixed_code_word_boundary_split() {
        let mut gr = GolombRice::default();
        // 60 bits of padding, then a 13-bit value straddling word 0 and 1.
        gr.append_fixed(0, 30);
        gr.append_fixed(0, 30);
        gr.append_fixed(0x1ABC, 13);
        gr.append_unary_all(&[0, 0, 0]);

        let mut reader = GolombRiceReader::new(gr.data());
        reader.read_reset(0, 73).unwrap();
        assert_eq!(reader.read_next(30).unwrap(), 0);
        assert_eq!(reader.read_next(30).unwrap(), 0);
        assert_eq!(reader.read_next(13).unwrap(), 0x1ABC);
    }

    #[test]
    fn test_skip_subtree() {
        let log2 = 3u32;
        let values = [7u64, 9, 21, 4];
        let mut gr = GolombRice::default();
        let mut unary = Vec::new();
        for &v in &values {
            gr.append_fixed(v, log2);
            unary.push(v >> log2);
        }
        let fixed_bits = gr.bits();
        gr.append_unary_all(&unary);

        // Skip the first two codes as if they were a sibling subtree.
        let mut reader = GolombRiceReader::new(gr.data());
        reader.read_reset(0, fixed_bits).unwrap();
        reader.skip_subtree(2, 2 * log2 as usize).unwrap();
        assert_eq!(reader.read_next(log2).unwrap(), 21);
        assert_eq!(reader.read_next(log2).unwrap(), 4);
    }

    #[test]
    fn test_read_past_end_is_corrupt_not_panic() {
        let gr = GolombRice::default();
        let mut reader = GolombRiceReader::new(gr.data());
        let err = reader.read_reset(0, 0).unwrap_err();
        assert!(matches!(
            err.kind(),
            keydex_common::error::ErrorKind::InvalidFormat { .. }
        ));
    }

    #[test]
    fn test_long_unary_run_spanning_words() {
        let mut gr = GolombRice::default();
        gr.append_unary_all(&[200, 3]);
        let mut reader = GolombRiceReader::new(gr.data());
        reader.read_reset(0, 0).unwrap();
        assert_eq!(reader.read_next(0).unwrap(), 200);
        assert_eq!(reader.read_next(0).unwrap(), 3);
    }
}
