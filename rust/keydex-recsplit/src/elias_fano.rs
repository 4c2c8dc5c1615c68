//! Double Elias-Fano encoding of the two synchronized bucket accumulators:
//! cumulative key counts and cumulative bit positions. Both sequences are
//! monotone; each is split into densely packed low bits and a unary-coded
//! high-bits bitset, with a jump index over 2^14-bit windows for fast
//! select at read time.

use bincode::{Decode, Encode};
use keydex_common::{Result, error::Error, verify_arg, verify_data};

use crate::bits::{select64, set, set_bits};

const LOG2_Q: u64 = 8;
const Q: u64 = 1 << LOG2_Q;
const Q_MASK: u64 = Q - 1;
const SUPER_Q: u64 = 1 << 14;
const SUPER_Q_MASK: u64 = SUPER_Q - 1;
const Q_PER_SUPER_Q: u64 = SUPER_Q / Q;
const SUPER_Q_SIZE: u64 = 1 + Q_PER_SUPER_Q / 4;

/// Compact directory over `(cum_keys, position)` accumulator pairs.
#[derive(Debug, Clone, Encode, Decode)]
pub struct DoubleEliasFano {
    lower_bits: Vec<u64>,
    upper_bits_cum_keys: Vec<u64>,
    upper_bits_position: Vec<u64>,
    jump: Vec<u64>,
    lower_bits_mask_cum_keys: u64,
    lower_bits_mask_position: u64,
    num_buckets: u64,
    u_cum_keys: u64,
    u_position: u64,
    l_position: u64,
    l_cum_keys: u64,
    cum_keys_min_delta: i64,
    min_diff: i64,
    bits_per_key_fixed_point: u64,
}

impl DoubleEliasFano {
    /// Encodes the two accumulator sequences. Both must have the same
    /// length (`num_buckets + 1`), be non-decreasing, and start at 0.
    pub fn build(cum_keys: &[u64], position: &[u64]) -> Result<DoubleEliasFano> {
        verify_arg!(cum_keys, cum_keys.len() == position.len());
        verify_arg!(cum_keys, !cum_keys.is_empty());
        verify_arg!(cum_keys, cum_keys[0] == 0);
        verify_arg!(position, position[0] == 0);
        verify_arg!(cum_keys, cum_keys.windows(2).all(|w| w[0] <= w[1]));
        verify_arg!(position, position.windows(2).all(|w| w[0] <= w[1]));

        let num_buckets = (cum_keys.len() - 1) as u64;
        let n = num_buckets as usize;

        // Fixed-point (<<20) bits-per-key ratio used to linearize the
        // position sequence before delta-tightening.
        let bits_per_key_fixed_point = if cum_keys[n] == 0 {
            0
        } else {
            ((1u64 << 20) as f64 * (position[n] as f64 / cum_keys[n] as f64)) as u64
        };

        let mut min_diff = i64::MAX / 2;
        let mut cum_keys_min_delta = i64::MAX / 2;
        let mut prev_bucket_bits = 0i64;
        for i in 1..=n {
            let nkeys_delta = cum_keys[i] as i64 - cum_keys[i - 1] as i64;
            cum_keys_min_delta = cum_keys_min_delta.min(nkeys_delta);
            let bucket_bits =
                position[i] as i64 - ((bits_per_key_fixed_point * cum_keys[i]) >> 20) as i64;
            min_diff = min_diff.min(bucket_bits - prev_bucket_bits);
            prev_bucket_bits = bucket_bits;
        }
        if n == 0 {
            min_diff = 0;
            cum_keys_min_delta = 0;
        }

        let u_position = (position[n] as i64
            - ((bits_per_key_fixed_point * cum_keys[n]) >> 20) as i64
            - num_buckets as i64 * min_diff
            + 1) as u64;
        let l_position = if u_position / (num_buckets + 1) == 0 {
            0
        } else {
            63 - (u_position / (num_buckets + 1)).leading_zeros() as u64
        };
        let u_cum_keys = cum_keys[n] - num_buckets * cum_keys_min_delta as u64 + 1;
        let l_cum_keys = if u_cum_keys / (num_buckets + 1) == 0 {
            0
        } else {
            63 - (u_cum_keys / (num_buckets + 1)).leading_zeros() as u64
        };
        if l_cum_keys * 2 + l_position > 56 {
            return Err(Error::invalid_format(
                "elias-fano directory",
                format!(
                    "low-bit widths out of range: l_cum_keys {l_cum_keys} * 2 \
                     + l_position {l_position} > 56"
                ),
            ));
        }

        let lower_bits_mask_cum_keys = (1u64 << l_cum_keys) - 1;
        let lower_bits_mask_position = (1u64 << l_position) - 1;
        // One word of padding so reads of the following word stay in bounds.
        let words_lower_bits =
            (((num_buckets + 1) * (l_cum_keys + l_position) + 63) / 64 + 1) as usize;
        let words_cum_keys =
            ((num_buckets + 1 + (u_cum_keys >> l_cum_keys) + 63) / 64) as usize;
        let words_position =
            ((num_buckets + 1 + (u_position >> l_position) + 63) / 64) as usize;
        let mut lower_bits = vec![0u64; words_lower_bits];
        let mut upper_bits_cum_keys = vec![0u64; words_cum_keys];
        let mut upper_bits_position = vec![0u64; words_position];

        for i in 0..=num_buckets {
            let cum_delta = i as i64 * cum_keys_min_delta;
            let bit_delta = i as i64 * min_diff;
            let cum_value = (cum_keys[i as usize] as i64 - cum_delta) as u64;
            if l_cum_keys != 0 {
                set_bits(
                    &mut lower_bits,
                    i * (l_cum_keys + l_position),
                    l_cum_keys as u32,
                    cum_value & lower_bits_mask_cum_keys,
                );
            }
            set(&mut upper_bits_cum_keys, (cum_value >> l_cum_keys) + i);

            let pval = position[i as usize] as i64
                - ((bits_per_key_fixed_point * cum_keys[i as usize]) >> 20) as i64;
            let pos_value = (pval - bit_delta) as u64;
            if l_position != 0 {
                set_bits(
                    &mut lower_bits,
                    i * (l_cum_keys + l_position) + l_cum_keys,
                    l_position as u32,
                    pos_value & lower_bits_mask_position,
                );
            }
            set(&mut upper_bits_position, (pos_value >> l_position) + i);
        }

        let jump_blocks = (num_buckets + 1).div_ceil(SUPER_Q);
        let mut jump = vec![0u64; (jump_blocks * SUPER_Q_SIZE * 2) as usize];
        build_jump(&upper_bits_cum_keys, &mut jump, 0)?;
        build_jump(&upper_bits_position, &mut jump, 1)?;

        Ok(DoubleEliasFano {
            lower_bits,
            upper_bits_cum_keys,
            upper_bits_position,
            jump,
            lower_bits_mask_cum_keys,
            lower_bits_mask_position,
            num_buckets,
            u_cum_keys,
            u_position,
            l_position,
            l_cum_keys,
            cum_keys_min_delta,
            min_diff,
            bits_per_key_fixed_point,
        })
    }

    pub fn num_buckets(&self) -> u64 {
        self.num_buckets
    }

    fn word(words: &[u64], idx: u64) -> Result<u64> {
        words.get(idx as usize).copied().ok_or_else(|| {
            Error::invalid_format(
                "elias-fano directory",
                format!("word index {idx} out of bounds ({})", words.len()),
            )
        })
    }

    /// Common part of `get2`/`get3`: reconstructs `cum_keys[i]` and
    /// `position[i]`, returning the upper-bits scan state for `get3` to
    /// continue from.
    fn get_parts(&self, i: u64) -> Result<(u64, u64, u64, u64, u64)> {
        let pos_lower = i * (self.l_cum_keys + self.l_position);
        let idx64 = pos_lower / 64;
        let shift = pos_lower & 63;
        let mut lower = Self::word(&self.lower_bits, idx64)? >> shift;
        if shift > 0 {
            lower |= Self::word(&self.lower_bits, idx64 + 1)? << (64 - shift);
        }

        let jump_super_q = (i / SUPER_Q) * SUPER_Q_SIZE * 2;
        let jump_inside_super_q = (i % SUPER_Q) / Q;
        let mut idx16 = 4 * (jump_super_q + 2) + 2 * jump_inside_super_q;
        let mut idx64j = idx16 / 4;
        let mut shift16 = 16 * (idx16 % 4);
        let jump_cum_keys = Self::word(&self.jump, jump_super_q)?
            + ((Self::word(&self.jump, idx64j)? >> shift16) & 0xffff);
        idx16 += 1;
        idx64j = idx16 / 4;
        shift16 = 16 * (idx16 % 4);
        let jump_position = Self::word(&self.jump, jump_super_q + 1)?
            + ((Self::word(&self.jump, idx64j)? >> shift16) & 0xffff);

        let mut curr_word_cum_keys = jump_cum_keys / 64;
        let mut curr_word_position = jump_position / 64;
        let mut window_cum_keys =
            Self::word(&self.upper_bits_cum_keys, curr_word_cum_keys)? & (u64::MAX << (jump_cum_keys % 64));
        let mut window_position =
            Self::word(&self.upper_bits_position, curr_word_position)? & (u64::MAX << (jump_position % 64));
        let mut delta_cum_keys = (i & Q_MASK) as usize;
        let mut delta_position = (i & Q_MASK) as usize;

        loop {
            let bit_count = window_cum_keys.count_ones() as usize;
            if bit_count > delta_cum_keys {
                break;
            }
            curr_word_cum_keys += 1;
            window_cum_keys = Self::word(&self.upper_bits_cum_keys, curr_word_cum_keys)?;
            delta_cum_keys -= bit_count;
        }
        loop {
            let bit_count = window_position.count_ones() as usize;
            if bit_count > delta_position {
                break;
            }
            curr_word_position += 1;
            window_position = Self::word(&self.upper_bits_position, curr_word_position)?;
            delta_position -= bit_count;
        }

        let select_cum_keys = select64(window_cum_keys, delta_cum_keys) as u64;
        let cum_delta = (i as i64 * self.cum_keys_min_delta) as u64;
        let cum_keys = ((curr_word_cum_keys * 64 + select_cum_keys - i) << self.l_cum_keys
            | (lower & self.lower_bits_mask_cum_keys))
            .wrapping_add(cum_delta);

        lower >>= self.l_cum_keys;
        let bit_delta = (i as i64 * self.min_diff) as u64;
        let position = ((curr_word_position * 64
            + select64(window_position, delta_position) as u64
            - i)
            << self.l_position
            | (lower & self.lower_bits_mask_position))
            .wrapping_add(bit_delta)
            .wrapping_add((self.bits_per_key_fixed_point * cum_keys) >> 20);

        Ok((
            cum_keys,
            position,
            curr_word_cum_keys,
            window_cum_keys,
            select_cum_keys,
        ))
    }

    /// Returns `(cum_keys[i], position[i])`.
    pub fn get2(&self, i: u64) -> Result<(u64, u64)> {
        verify_arg!(i, i <= self.num_buckets);
        let (cum_keys, position, ..) = self.get_parts(i)?;
        Ok((cum_keys, position))
    }

    /// Returns `(cum_keys[i], cum_keys[i + 1], position[i])`.
    pub fn get3(&self, i: u64) -> Result<(u64, u64, u64)> {
        verify_arg!(i, i < self.num_buckets);
        let (cum_keys, position, mut curr_word, mut window, select) = self.get_parts(i)?;

        window &= (u64::MAX << select) << 1;
        while window == 0 {
            curr_word += 1;
            window = Self::word(&self.upper_bits_cum_keys, curr_word)?;
        }

        let pos_lower = i * (self.l_cum_keys + self.l_position) + self.l_cum_keys + self.l_position;
        let idx64 = pos_lower / 64;
        let shift = pos_lower & 63;
        let mut lower = Self::word(&self.lower_bits, idx64)? >> shift;
        if shift > 0 {
            lower |= Self::word(&self.lower_bits, idx64 + 1)? << (64 - shift);
        }

        let cum_delta = (i as i64 * self.cum_keys_min_delta) as u64;
        let cum_keys_next = ((curr_word * 64 + window.trailing_zeros() as u64 - i - 1)
            << self.l_cum_keys
            | (lower & self.lower_bits_mask_cum_keys))
            .wrapping_add(cum_delta)
            .wrapping_add(self.cum_keys_min_delta as u64);
        Ok((cum_keys, cum_keys_next, position))
    }
}

/// Builds the jump index for one high-bits bitset. `which` selects the
/// cum-keys (0) or position (1) slot inside each shared jump block.
fn build_jump(upper_bits: &[u64], jump: &mut [u64], which: u64) -> Result<()> {
    let mut c = 0u64;
    let mut last_super_q = 0u64;
    for (i, &word) in upper_bits.iter().enumerate() {
        for b in 0..64u64 {
            if word & (1u64 << b) == 0 {
                continue;
            }
            let bit_pos = i as u64 * 64 + b;
            if c & SUPER_Q_MASK == 0 {
                last_super_q = bit_pos;
                jump[((c / SUPER_Q) * SUPER_Q_SIZE * 2 + which) as usize] = last_super_q;
            }
            if c & Q_MASK == 0 {
                let offset = bit_pos - last_super_q;
                verify_data!(jump_offset, offset < (1 << 16));
                let idx16 = 4 * ((c / SUPER_Q) * SUPER_Q_SIZE * 2 + 2)
                    + 2 * ((c % SUPER_Q) / Q)
                    + which;
                let idx64 = (idx16 / 4) as usize;
                let shift = 16 * (idx16 % 4);
                let mask = 0xffffu64 << shift;
                jump[idx64] = (jump[idx64] & !mask) | (offset << shift);
            }
            c += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_round_trip(cum_keys: &[u64], position: &[u64]) {
        let ef = DoubleEliasFano::build(cum_keys, position).unwrap();
        let n = cum_keys.len() - 1;
        for i in 0..=n as u64 {
            let (c, p) = ef.get2(i).unwrap();
            assert_eq!(c, cum_keys[i as usize], "cum_keys[{i}]");
            assert_eq!(p, position[i as usize], "position[{i}]");
        }
        for i in 0..n as u64 {
            let (c, c_next, p) = ef.get3(i).unwrap();
            assert_eq!(c, cum_keys[i as usize]);
            assert_eq!(c_next, cum_keys[i as usize + 1]);
            assert_eq!(p, position[i as usize]);
        }
    }

    #[test]
    fn test_small_sequences() {
        check_round_trip(&[0, 4, 8, 13, 20], &[0, 100, 170, 300, 450]);
        check_round_trip(&[0, 1], &[0, 7]);
        check_round_trip(&[0, 0, 0, 5], &[0, 0, 0, 80]);
    }

    #[test]
    fn test_all_zero_positions() {
        // Buckets that never emitted any bits.
        check_round_trip(&[0, 1, 2, 3], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_random_round_trips() {
        let mut rng = fastrand::Rng::with_seed(0xef_0001);
        for _ in 0..20 {
            let n = rng.usize(1..800);
            let mut cum_keys = vec![0u64];
            let mut position = vec![0u64];
            for _ in 0..n {
                cum_keys.push(cum_keys.last().unwrap() + rng.u64(0..200));
                position.push(position.last().unwrap() + rng.u64(0..2000));
            }
            check_round_trip(&cum_keys, &position);
        }
    }

    #[test]
    fn test_large_sequence_crosses_jump_windows() {
        // More than one super-q window (> 16384 buckets).
        let mut rng = fastrand::Rng::with_seed(0xef_0002);
        let n = 40_000usize;
        let mut cum_keys = vec![0u64];
        let mut position = vec![0u64];
        for _ in 0..n {
            cum_keys.push(cum_keys.last().unwrap() + rng.u64(1..120));
            position.push(position.last().unwrap() + rng.u64(0..900));
        }
        let ef = DoubleEliasFano::build(&cum_keys, &position).unwrap();
        let mut i = 0u64;
        while i < n as u64 {
            let (c, c_next, p) = ef.get3(i).unwrap();
            assert_eq!(c, cum_keys[i as usize]);
            assert_eq!(c_next, cum_keys[i as usize + 1]);
            assert_eq!(p, position[i as usize]);
            i += 97;
        }
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        assert!(DoubleEliasFano::build(&[0, 1, 2], &[0, 1]).is_err());
    }

    #[test]
    fn test_non_monotone_rejected() {
        assert!(DoubleEliasFano::build(&[0, 5, 3], &[0, 1, 2]).is_err());
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        let ef = DoubleEliasFano::build(&[0, 2, 4], &[0, 10, 20]).unwrap();
        assert!(ef.get2(3).is_err());
        assert!(ef.get3(2).is_err());
    }
}
