//! Receiver engine: in-order delivery with out-of-order reassembly.
//!
//! [`Receiver`] accepts segments in any order and releases their payload
//! strictly in sequence:
//!
//! - A segment starting at `expected_seq` is delivered at once, followed by
//!   every buffered segment it makes contiguous.
//! - A segment ahead of `expected_seq` waits in the [`ReorderBuffer`].
//! - A segment wholly behind `expected_seq` was already delivered; it is
//!   re-acknowledged so a lost ACK cannot stall the sender.
//! - Every accepted data segment is answered with a cumulative ACK carrying
//!   `expected_seq`.
//!
//! Like [`crate::sender::Sender`], this is pure state: outgoing datagrams
//! queue up for [`Receiver::poll_transmit`] and delivered payload for
//! [`Receiver::take_delivered`].

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use crate::checksum;
use crate::config::Config;
use crate::event_log::{endpoint, EventLog, LogRecord, Tag};
use crate::reorder::{Insert, ReorderBuffer};
use crate::segment::Segment;
use crate::seq::{seq_add, seq_before, seq_distance};
use crate::state::ReceiverState;

/// What happened to one inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Too short or failed its checksum; dropped without reply.
    Corrupt,
    /// Started at the next expected byte (or straddled it) and was delivered.
    Delivered,
    /// Ahead of the next expected byte; its bytes not yet buffered were
    /// stored and the segment acknowledged.
    Buffered,
    /// Every byte is already buffered; dropped without reply.
    Duplicate,
    /// Carries no new bytes (already delivered, or empty); re-acknowledged.
    AlreadyDelivered,
    /// FIN answered with FIN-ACK.
    Fin,
    /// Not applicable in the current state (data after close, FIN with a
    /// payload or at the wrong sequence number).
    Ignored,
}

/// Counters for one receiving connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub segments_received: u64,
    pub bytes_delivered: u64,
    pub corrupt: u64,
    pub duplicates: u64,
    pub acks_sent: u64,
}

/// Receive side of one connection.
#[derive(Debug)]
pub struct Receiver {
    state: ReceiverState,
    /// Next in-order byte expected from the peer.
    expected_seq: u32,
    pending: ReorderBuffer,
    delivered: VecDeque<Vec<u8>>,
    outbox: VecDeque<Vec<u8>>,
    stats: ReceiverStats,
    peer: SocketAddr,
    fin_linger: Duration,
    local_port: u16,
    peer_port: u16,
    local_host: String,
    peer_host: String,
    log: EventLog,
}

impl Receiver {
    pub fn new(config: &Config, log: EventLog) -> Self {
        Self {
            state: ReceiverState::Receiving,
            expected_seq: config.initial_seq,
            pending: ReorderBuffer::new(),
            delivered: VecDeque::new(),
            outbox: VecDeque::new(),
            stats: ReceiverStats::default(),
            peer: config.peer,
            fin_linger: config.fin_linger,
            local_port: config.local.port(),
            peer_port: config.peer.port(),
            local_host: config.local_host(),
            peer_host: config.peer_host(),
            log,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ReceiverState::Closed
    }

    /// Where ACKs and FIN-ACKs are sent.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Quiet period, after the FIN, before the connection is released.
    pub fn fin_linger(&self) -> Duration {
        self.fin_linger
    }

    /// Cumulative ACK value (`ExpectedSeq`).
    pub fn expected_seq(&self) -> u32 {
        self.expected_seq
    }

    pub fn pending(&self) -> &ReorderBuffer {
        &self.pending
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// Next datagram (ACK or FIN-ACK) to send to the peer.
    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.outbox.pop_front()
    }

    /// Next in-order chunk for the application.
    pub fn take_delivered(&mut self) -> Option<Vec<u8>> {
        self.delivered.pop_front()
    }

    /// Process one inbound datagram.
    pub fn on_datagram(&mut self, bytes: &[u8]) -> Disposition {
        if !checksum::verify(bytes) {
            self.stats.corrupt += 1;
            log::debug!("[receiver] dropping corrupt datagram ({} bytes)", bytes.len());
            return Disposition::Corrupt;
        }
        let seg = match Segment::decode(bytes) {
            Ok(seg) => seg,
            Err(e) => {
                self.stats.corrupt += 1;
                log::debug!("[receiver] dropping datagram: {e}");
                return Disposition::Corrupt;
            }
        };
        self.stats.segments_received += 1;

        if seg.header.is_fin() {
            return self.on_fin(&seg);
        }
        if self.state == ReceiverState::Closed {
            log::debug!("[receiver] data after close ignored (seq={})", seg.header.seq);
            return Disposition::Ignored;
        }
        self.on_data(seg)
    }

    fn on_fin(&mut self, seg: &Segment) -> Disposition {
        let h = &seg.header;
        self.log.record(
            &LogRecord::new(
                endpoint(&self.peer_host, h.src_port),
                endpoint(&self.local_host, h.dst_port),
                h.seq,
                h.ack,
            )
            .tag(Tag::Fin),
        );

        if !seg.payload.is_empty() || h.seq != self.expected_seq {
            log::debug!(
                "[receiver] FIN seq={} len={} not acceptable at expected={}",
                h.seq,
                seg.payload.len(),
                self.expected_seq
            );
            return Disposition::Ignored;
        }

        let reply = Segment::fin_ack(self.local_port, self.peer_port, self.expected_seq);
        self.log.record(
            &self
                .outbound_record()
                .tag(Tag::Ack)
                .tag(Tag::Fin),
        );
        self.outbox.push_back(reply.encode());

        if self.state != ReceiverState::Closed {
            log::info!("[receiver] FIN at {}; connection closed", self.expected_seq);
            self.state = ReceiverState::Closed;
        }
        self.log.flush();
        Disposition::Fin
    }

    fn on_data(&mut self, seg: Segment) -> Disposition {
        let h = seg.header;
        self.log.record(&LogRecord::new(
            endpoint(&self.peer_host, h.src_port),
            endpoint(&self.local_host, h.dst_port),
            h.seq,
            h.ack,
        ));

        let end = seg.end_seq();
        let disposition = if seg.payload.is_empty() {
            Disposition::AlreadyDelivered
        } else if h.seq == self.expected_seq {
            self.deliver(seg.payload);
            Disposition::Delivered
        } else if seq_before(self.expected_seq, h.seq) {
            match self.pending.insert(h.seq, seg.payload) {
                Insert::Buffered => Disposition::Buffered,
                Insert::Trimmed => {
                    log::debug!("[receiver] segment [{}, {end}) partly buffered already", h.seq);
                    Disposition::Buffered
                }
                Insert::Duplicate => {
                    self.stats.duplicates += 1;
                    return Disposition::Duplicate;
                }
            }
        } else if seq_before(self.expected_seq, end) {
            // Straddles expected_seq: keep only the undelivered suffix.
            let skip = seq_distance(h.seq, self.expected_seq) as usize;
            let mut payload = seg.payload;
            payload.drain(..skip);
            self.deliver(payload);
            Disposition::Delivered
        } else {
            self.stats.duplicates += 1;
            Disposition::AlreadyDelivered
        };

        self.send_ack();
        disposition
    }

    /// Hand `payload` (starting at `expected_seq`) to the application, then
    /// drain every buffered segment that has become contiguous.
    fn deliver(&mut self, payload: Vec<u8>) {
        self.push_delivered(payload);
        while let Some(next) = self.pending.pop_ready(self.expected_seq) {
            self.push_delivered(next.payload);
        }
    }

    fn push_delivered(&mut self, payload: Vec<u8>) {
        self.expected_seq = seq_add(self.expected_seq, payload.len() as u32);
        self.stats.bytes_delivered += payload.len() as u64;
        self.delivered.push_back(payload);
    }

    fn send_ack(&mut self) {
        let ack = Segment::ack(self.local_port, self.peer_port, self.expected_seq);
        self.log.record(&self.outbound_record().tag(Tag::Ack));
        self.outbox.push_back(ack.encode());
        self.stats.acks_sent += 1;
    }

    /// Record for a segment this receiver sends: seq is always 0.
    fn outbound_record(&self) -> LogRecord {
        LogRecord::new(
            endpoint(&self.local_host, self.local_port),
            endpoint(&self.peer_host, self.peer_port),
            0,
            self.expected_seq,
        )
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    const SENDER_PORT: u16 = 41191;
    const LOCAL_PORT: u16 = 41194;

    fn receiver_at(initial_seq: u32) -> Receiver {
        let config = Config {
            initial_seq,
            local: ([127, 0, 0, 1], LOCAL_PORT).into(),
            peer: ([127, 0, 0, 1], SENDER_PORT).into(),
            ..Config::default()
        };
        Receiver::new(&config, EventLog::disabled())
    }

    fn data(seq: u32, payload: &[u8]) -> Vec<u8> {
        Segment::data(SENDER_PORT, LOCAL_PORT, seq, payload.to_vec()).encode()
    }

    fn replies(r: &mut Receiver) -> Vec<Segment> {
        std::iter::from_fn(|| r.poll_transmit())
            .map(|b| Segment::decode(&b).unwrap())
            .collect()
    }

    fn output(r: &mut Receiver) -> Vec<u8> {
        std::iter::from_fn(|| r.take_delivered()).flatten().collect()
    }

    #[test]
    fn in_order_segment_delivered_and_acked() {
        let mut r = receiver_at(0);
        assert_eq!(r.on_datagram(&data(0, b"hello")), Disposition::Delivered);
        assert_eq!(r.expected_seq(), 5);
        assert_eq!(output(&mut r), b"hello");

        let acks = replies(&mut r);
        assert_eq!(acks.len(), 1);
        assert!(acks[0].header.is_ack());
        assert_eq!(acks[0].header.ack, 5);
        assert_eq!(acks[0].header.seq, 0);
        assert_eq!(acks[0].header.src_port, LOCAL_PORT);
        assert_eq!(acks[0].header.dst_port, SENDER_PORT);
    }

    #[test]
    fn gap_is_buffered_then_drained() {
        let mut r = receiver_at(0);
        assert_eq!(r.on_datagram(&data(5, b"world")), Disposition::Buffered);
        assert_eq!(r.on_datagram(&data(10, b"!")), Disposition::Buffered);
        assert_eq!(r.expected_seq(), 0);
        assert_eq!(r.pending().len(), 2);
        assert!(output(&mut r).is_empty());

        assert_eq!(r.on_datagram(&data(0, b"hello")), Disposition::Delivered);
        assert_eq!(r.expected_seq(), 11);
        assert!(r.pending().is_empty());
        assert_eq!(output(&mut r), b"helloworld!");

        let acks: Vec<u32> = replies(&mut r).iter().map(|s| s.header.ack).collect();
        assert_eq!(acks, vec![0, 0, 11]);
    }

    #[test]
    fn buffered_duplicate_dropped_without_ack() {
        let mut r = receiver_at(0);
        r.on_datagram(&data(5, b"world"));
        replies(&mut r);
        assert_eq!(r.on_datagram(&data(5, b"world")), Disposition::Duplicate);
        assert!(replies(&mut r).is_empty());
        assert_eq!(r.stats().duplicates, 1);
    }

    #[test]
    fn overlapping_segment_keeps_new_bytes_and_acks() {
        let mut r = receiver_at(0);
        r.on_datagram(&data(10, b"0123456789"));
        replies(&mut r);
        assert_eq!(r.on_datagram(&data(15, b"abcdefghijklmno")), Disposition::Buffered);
        let acks = replies(&mut r);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].header.ack, 0);
        assert_eq!(r.pending().ranges().collect::<Vec<_>>(), vec![(10, 20), (20, 30)]);

        r.on_datagram(&data(0, b"ABCDEFGHIJ"));
        assert_eq!(r.expected_seq(), 30);
        assert_eq!(output(&mut r), b"ABCDEFGHIJ0123456789fghijklmno");
    }

    #[test]
    fn empty_segment_ahead_is_acked_not_buffered() {
        let mut r = receiver_at(0);
        assert_eq!(r.on_datagram(&data(10, b"")), Disposition::AlreadyDelivered);
        assert!(r.pending().is_empty());
        let acks = replies(&mut r);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].header.ack, 0);

        assert_eq!(r.on_datagram(&data(10, b"later")), Disposition::Buffered);
        assert_eq!(r.pending().len(), 1);
    }

    #[test]
    fn already_delivered_segment_is_reacked() {
        let mut r = receiver_at(0);
        r.on_datagram(&data(0, b"abc"));
        replies(&mut r);
        output(&mut r);

        assert_eq!(r.on_datagram(&data(0, b"abc")), Disposition::AlreadyDelivered);
        let acks = replies(&mut r);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].header.ack, 3);
        assert!(output(&mut r).is_empty());
    }

    #[test]
    fn straddling_segment_delivers_only_new_bytes() {
        let mut r = receiver_at(0);
        r.on_datagram(&data(0, b"abc"));
        assert_eq!(r.on_datagram(&data(1, b"bcdef")), Disposition::Delivered);
        assert_eq!(r.expected_seq(), 6);
        assert_eq!(output(&mut r), b"abcdef");
    }

    #[test]
    fn corrupt_segment_dropped_silently() {
        let mut r = receiver_at(0);
        let mut bytes = data(0, b"hello");
        bytes[21] ^= 0x01;
        assert_eq!(r.on_datagram(&bytes), Disposition::Corrupt);
        assert_eq!(r.on_datagram(&bytes[..12]), Disposition::Corrupt);
        assert!(replies(&mut r).is_empty());
        assert_eq!(r.expected_seq(), 0);
        assert_eq!(r.stats().corrupt, 2);
    }

    #[test]
    fn fin_answered_with_fin_ack() {
        let mut r = receiver_at(0);
        r.on_datagram(&data(0, b"abc"));
        replies(&mut r);

        let fin = Segment::fin(SENDER_PORT, LOCAL_PORT, 3).encode();
        assert_eq!(r.on_datagram(&fin), Disposition::Fin);
        assert_eq!(r.state(), ReceiverState::Closed);
        let out = replies(&mut r);
        assert_eq!(out.len(), 1);
        assert!(out[0].header.is_fin_ack());
        assert_eq!(out[0].header.ack, 3);

        // A retransmitted FIN gets answered again; data does not.
        assert_eq!(r.on_datagram(&fin), Disposition::Fin);
        assert_eq!(replies(&mut r).len(), 1);
        assert_eq!(r.on_datagram(&data(3, b"late")), Disposition::Ignored);
        assert!(replies(&mut r).is_empty());
    }

    #[test]
    fn fin_ahead_of_data_is_ignored() {
        let mut r = receiver_at(0);
        let fin = Segment::fin(SENDER_PORT, LOCAL_PORT, 10).encode();
        assert_eq!(r.on_datagram(&fin), Disposition::Ignored);
        assert_eq!(r.state(), ReceiverState::Receiving);
        assert!(replies(&mut r).is_empty());
    }

    #[test]
    fn reassembly_across_wraparound() {
        let start = u32::MAX - 6;
        let mut r = receiver_at(start);
        assert_eq!(r.on_datagram(&data(start.wrapping_add(8), b"ijkl")), Disposition::Buffered);
        assert_eq!(r.on_datagram(&data(start.wrapping_add(4), b"efgh")), Disposition::Buffered);
        assert_eq!(r.on_datagram(&data(start, b"abcd")), Disposition::Delivered);
        assert_eq!(r.expected_seq(), start.wrapping_add(12));
        assert_eq!(output(&mut r), b"abcdefghijkl");
    }

    #[test]
    fn any_permutation_with_duplicates_reassembles() {
        let mut rng = StdRng::seed_from_u64(42);
        for round in 0..50 {
            let start: u32 = if round % 2 == 0 { 0 } else { u32::MAX - 300 };
            let original: Vec<u8> = (0..rng.random_range(1..4000)).map(|_| rng.random()).collect();

            let mut segments = Vec::new();
            let mut offset = 0usize;
            while offset < original.len() {
                let len = rng.random_range(1..=512).min(original.len() - offset);
                let seq = start.wrapping_add(offset as u32);
                segments.push(data(seq, &original[offset..offset + len]));
                offset += len;
            }
            let dups: Vec<_> = segments
                .iter()
                .filter(|_| rng.random_bool(0.4))
                .cloned()
                .collect();
            segments.extend(dups);
            segments.shuffle(&mut rng);

            let mut r = receiver_at(start);
            for seg in &segments {
                r.on_datagram(seg);
                assert!(r.pending().is_well_formed());
            }
            assert!(r.pending().is_empty());
            assert_eq!(output(&mut r), original, "round {round}");
        }
    }

    #[test]
    fn overlapping_resegmentation_reassembles() {
        let mut rng = StdRng::seed_from_u64(7);
        for round in 0..50 {
            let start: u32 = if round % 2 == 0 { 0 } else { u32::MAX - 300 };
            let original: Vec<u8> = (0..rng.random_range(1..4000)).map(|_| rng.random()).collect();

            // Random windows of the stream that overlap each other freely,
            // plus one in-order pass so every byte is covered.
            let mut segments = Vec::new();
            let mut offset = 0usize;
            while offset < original.len() {
                let len = rng.random_range(1..=512).min(original.len() - offset);
                segments.push((offset, len));
                offset += len;
            }
            for _ in 0..segments.len() {
                let at = rng.random_range(0..original.len());
                let len = rng.random_range(1..=512).min(original.len() - at);
                segments.push((at, len));
            }
            segments.shuffle(&mut rng);

            let mut r = receiver_at(start);
            for &(at, len) in &segments {
                let seq = start.wrapping_add(at as u32);
                r.on_datagram(&data(seq, &original[at..at + len]));
                assert!(r.pending().is_well_formed());
            }
            assert!(r.pending().is_empty());
            assert_eq!(output(&mut r), original, "round {round}");
        }
    }
}
