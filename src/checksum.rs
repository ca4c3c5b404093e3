//! Internet checksum (RFC 1071) over a segment's header and payload.
//!
//! The checksum carried in the header is computed with its own field set to
//! zero.  Verification recomputes it the same way and compares; a mismatch
//! is reported as `false`, never as an error, so the caller can drop the
//! datagram exactly as if the network had lost it.

use crate::segment::{HEADER_LEN, OFF_CHECKSUM};

/// Running one's-complement sum of big-endian 16-bit words.
///
/// Words are added into a `u32` accumulator and folded at the end; a
/// 512-byte payload cannot overflow it.
fn ones_complement_sum(data: &[u8], mut sum: u32) -> u32 {
    let mut words = data.chunks_exact(2);
    for w in &mut words {
        sum += u32::from(u16::from_be_bytes([w[0], w[1]]));
    }
    // Odd trailing byte: pad with a zero byte on the right.
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    sum
}

/// Fold carries out of bit 16 back into the low word until it fits.
fn fold(mut sum: u32) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum as u16
}

/// Compute the Internet checksum of `data`.
///
/// The caller must zero any checksum field inside `data` first.
pub fn internet_checksum(data: &[u8]) -> u16 {
    !fold(ones_complement_sum(data, 0))
}

/// Check the checksum carried by an encoded segment.
///
/// Returns `false` for datagrams too short to hold a header.
pub fn verify(datagram: &[u8]) -> bool {
    if datagram.len() < HEADER_LEN {
        return false;
    }
    let carried = u16::from_be_bytes([datagram[OFF_CHECKSUM], datagram[OFF_CHECKSUM + 1]]);

    // Sum around the checksum field instead of copying the datagram.  The
    // field is word-aligned, so splitting there keeps word boundaries.
    let sum = ones_complement_sum(&datagram[..OFF_CHECKSUM], 0);
    let sum = ones_complement_sum(&datagram[OFF_CHECKSUM + 2..], sum);
    !fold(sum) == carried
}
