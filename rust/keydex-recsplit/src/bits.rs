//! Bit-level helpers shared by the succinct encodings.

/// Position of the `k`-th (0-based) set bit of `x`. Caller must guarantee
/// that `x` has more than `k` set bits.
#[inline]
pub(crate) fn select64(x: u64, k: usize) -> usize {
    let mut x = x;
    for _ in 0..k {
        x &= x - 1;
    }
    x.trailing_zeros() as usize
}

/// Sets the bit at absolute position `pos`.
#[inline]
pub(crate) fn set(words: &mut [u64], pos: u64) {
    words[(pos >> 6) as usize] |= 1u64 << (pos & 63);
}

/// Writes the low `width` bits of `value` at absolute bit position `start`,
/// spilling into the next word when the write crosses a word boundary.
/// Assumes writes arrive in monotonically increasing positions, so the
/// spilled word needs no masking.
#[inline]
pub(crate) fn set_bits(words: &mut [u64], start: u64, width: u32, value: u64) {
    let shift = (start & 63) as u32;
    let idx = (start >> 6) as usize;
    let mask = ((1u64 << width) - 1) << shift;
    words[idx] = (words[idx] & !mask) | (value << shift);
    if shift + width > 64 {
        words[idx + 1] = value >> (64 - shift);
    }
}

/// Remaps `x`, assumed uniform over `[0, 2^64)`, onto `[0, n)` without
/// modulo bias (multiply-high).
#[inline]
pub(crate) fn remap(x: u64, n: u64) -> u64 {
    (((x as u128) * (n as u128)) >> 64) as u64
}

const MASK48: u64 = (1u64 << 48) - 1;

/// 16-bit variant of [`remap`], using the low 48 bits of `x`.
#[inline]
pub(crate) fn remap16(x: u64, n: u16) -> u16 {
    (((x & MASK48) * (n as u64)) >> 48) as u16
}

/// Final mixing step (the splitmix64 finalizer) applied to salted
/// fingerprints before remapping.
#[inline]
pub(crate) fn remix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
    z ^ (z >> 31)
}
