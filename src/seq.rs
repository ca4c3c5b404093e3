//! Wrap-around arithmetic over the 32-bit sequence space.
//!
//! Sequence numbers live on a circle of size 2^32.  Two numbers can only be
//! ordered meaningfully when they are less than 2^31 apart (RFC 1982 serial
//! number arithmetic); every comparison in the engines goes through these
//! helpers instead of raw `<` / `+` so that a transfer crossing `u32::MAX`
//! behaves exactly like one starting at zero.

use std::cmp::Ordering;

/// Half of the sequence space: the largest forward distance that still
/// counts as "after".
const HALF: u32 = 1 << 31;

/// `(a + delta) mod 2^32`.
#[inline]
pub fn seq_add(a: u32, delta: u32) -> u32 {
    a.wrapping_add(delta)
}

/// Forward distance from `a` to `b` on the sequence circle.
#[inline]
pub fn seq_distance(a: u32, b: u32) -> u32 {
    b.wrapping_sub(a)
}

/// `true` when `a` comes strictly before `b`.
///
/// Holds iff the forward distance from `a` to `b` is nonzero and below 2^31.
#[inline]
pub fn seq_before(a: u32, b: u32) -> bool {
    let d = seq_distance(a, b);
    d != 0 && d < HALF
}

/// `true` when `a` equals `b` or comes before it.
#[inline]
pub fn seq_before_eq(a: u32, b: u32) -> bool {
    a == b || seq_before(a, b)
}

/// Total order for a set of sequence numbers that all fit in one half of
/// the circle.
pub fn seq_cmp(a: u32, b: u32) -> Ordering {
    if a == b {
        Ordering::Equal
    } else if seq_before(a, b) {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_wraps_past_max() {
        assert_eq!(seq_add(0xFFFF_FFFE, 4), 2);
        assert_eq!(seq_add(u32::MAX, 1), 0);
        assert_eq!(seq_add(10, 0), 10);
    }

    #[test]
    fn before_across_wrap() {
        assert!(seq_before(0xFFFF_FFF0, 5));
        assert!(!seq_before(5, 0xFFFF_FFF0));
    }

    #[test]
    fn before_is_irreflexive() {
        assert!(!seq_before(7, 7));
        assert!(seq_before_eq(7, 7));
    }

    #[test]
    fn half_distance_is_not_before() {
        // Exactly 2^31 apart: ambiguous, so neither side is "before".
        assert!(!seq_before(0, HALF));
        assert!(seq_before(0, HALF - 1));
        assert!(seq_before(HALF + 1, 0));
    }

    #[test]
    fn cmp_sorts_around_wrap() {
        let mut v = vec![3u32, 0xFFFF_FFFA, 0, 0xFFFF_FFFF, 100];
        v.sort_by(|a, b| seq_cmp(*a, *b));
        assert_eq!(v, vec![0xFFFF_FFFA, 0xFFFF_FFFF, 0, 3, 100]);
    }

    #[test]
    fn distance_wraps() {
        assert_eq!(seq_distance(0xFFFF_FFFE, 2), 4);
        assert_eq!(seq_distance(5, 5), 0);
    }
}
