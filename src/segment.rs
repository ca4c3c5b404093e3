//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is one [`Segment`].  This module
//! only converts between bytes and structured values; it never touches the
//! network and never judges whether a segment is corrupt.  Checksum
//! verification lives in [`crate::checksum`] so that good and damaged input
//! travel through the same decode path.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Source Port          |        Destination Port       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |             Flags             |            Reserved           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |            Checksum           |           Reserved 2          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 20 bytes.

use thiserror::Error;

use crate::checksum::internet_checksum;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Finish: the sender has no more data.
    pub const FIN: u16 = 0x0001;
    /// Acknowledgement field is valid.
    pub const ACK: u16 = 0x0010;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 20;

/// Largest payload a single segment may carry.
pub const MAX_PAYLOAD: usize = 512;

// Byte offsets of each field within the serialised header.
const OFF_SRC_PORT: usize = 0;
const OFF_DST_PORT: usize = 2;
const OFF_SEQ: usize = 4;
const OFF_ACK: usize = 8;
const OFF_FLAGS: usize = 12;
pub(crate) const OFF_CHECKSUM: usize = 16;

/// Fixed-size segment header in host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Logical port of the sending engine.
    pub src_port: u16,
    /// Logical port of the receiving engine.
    pub dst_port: u16,
    /// First payload byte (data) or next sequence number (FIN).
    pub seq: u32,
    /// Cumulative acknowledgement; meaningful only with [`flags::ACK`].
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u16,
    /// Checksum as carried on the wire.
    ///
    /// Ignored by [`Segment::encode`], which always computes a fresh one.
    pub checksum: u16,
}

impl Header {
    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }

    /// Both FIN and ACK set: the answer to a FIN.
    pub fn is_fin_ack(&self) -> bool {
        self.is_fin() && self.is_ack()
    }
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    /// Fewer bytes than a header.
    #[error("malformed segment: {len} bytes is shorter than the {HEADER_LEN}-byte header")]
    Malformed { len: usize },
}

impl Segment {
    /// A data segment carrying `payload` at sequence number `seq`.
    pub fn data(src_port: u16, dst_port: u16, seq: u32, payload: Vec<u8>) -> Self {
        Self::control(src_port, dst_port, seq, 0, 0).with_payload(payload)
    }

    /// A pure cumulative acknowledgement.
    pub fn ack(src_port: u16, dst_port: u16, ack: u32) -> Self {
        Self::control(src_port, dst_port, 0, ack, flags::ACK)
    }

    /// A connection-termination request at sequence number `seq`.
    pub fn fin(src_port: u16, dst_port: u16, seq: u32) -> Self {
        Self::control(src_port, dst_port, seq, 0, flags::FIN)
    }

    /// The acknowledgement of a FIN.
    pub fn fin_ack(src_port: u16, dst_port: u16, ack: u32) -> Self {
        Self::control(src_port, dst_port, 0, ack, flags::FIN | flags::ACK)
    }

    fn control(src_port: u16, dst_port: u16, seq: u32, ack: u32, flags: u16) -> Self {
        Self {
            header: Header {
                src_port,
                dst_port,
                seq,
                ack,
                flags,
                checksum: 0,
            },
            payload: Vec::new(),
        }
    }

    fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Sequence number one past the last payload byte.
    pub fn end_seq(&self) -> u32 {
        crate::seq::seq_add(self.header.seq, self.payload.len() as u32)
    }

    /// Serialise this segment into a newly allocated byte vector.
    ///
    /// Reserved fields are written as zero and the checksum is computed over
    /// the assembled bytes with its own field zeroed.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];
        let h = &self.header;

        buf[OFF_SRC_PORT..OFF_SRC_PORT + 2].copy_from_slice(&h.src_port.to_be_bytes());
        buf[OFF_DST_PORT..OFF_DST_PORT + 2].copy_from_slice(&h.dst_port.to_be_bytes());
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&h.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&h.ack.to_be_bytes());
        buf[OFF_FLAGS..OFF_FLAGS + 2].copy_from_slice(&h.flags.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        let csum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
        buf
    }

    /// Parse a [`Segment`] from a raw byte slice.
    ///
    /// Only the length is checked; the checksum is left to
    /// [`crate::checksum::verify`].
    pub fn decode(buf: &[u8]) -> Result<Self, SegmentError> {
        if buf.len() < HEADER_LEN {
            return Err(SegmentError::Malformed { len: buf.len() });
        }

        let u16_at = |off: usize| u16::from_be_bytes([buf[off], buf[off + 1]]);
        let u32_at =
            |off: usize| u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);

        Ok(Segment {
            header: Header {
                src_port: u16_at(OFF_SRC_PORT),
                dst_port: u16_at(OFF_DST_PORT),
                seq: u32_at(OFF_SEQ),
                ack: u32_at(OFF_ACK),
                flags: u16_at(OFF_FLAGS),
                checksum: u16_at(OFF_CHECKSUM),
            },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}
