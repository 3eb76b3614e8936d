//! Wrapping 16-bit sequence arithmetic.
//!
//! `a <= b` holds in the plain numeric case, or when `a` is more than
//! [`SEQ_MAX_DIFF`] above `b`, which is read as `b` having wrapped past zero.
//! The rule is asymmetric: two values half the space apart compare `<=` in
//! both directions. Results are only trustworthy while every in-flight packet
//! lies within a quarter of the sequence space of the newest one.

/// Half the sequence space, minus one. A numeric lead larger than this is
/// taken as wraparound.
pub const SEQ_MAX_DIFF: u16 = 32767;

/// Quarter of the sequence space. Windows wider than this risk ambiguous
/// comparisons and are worth flagging.
pub const SEQ_QUARTER: u16 = 16384;

/// Forward distance from `from` to `to`, modulo 2^16.
#[inline]
pub fn seq_distance(from: u16, to: u16) -> u16 {
    to.wrapping_sub(from)
}

/// `a <= b` under wraparound.
#[inline]
pub fn seq_le(a: u16, b: u16) -> bool {
    a <= b || i32::from(a) - i32::from(SEQ_MAX_DIFF) > i32::from(b)
}

/// `a < b` under wraparound.
#[inline]
pub fn seq_lt(a: u16, b: u16) -> bool {
    a != b && seq_le(a, b)
}
