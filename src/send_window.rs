//! Go-Back-N outstanding-segment window.
//!
//! [`SendWindow`] holds every segment that has been transmitted but not yet
//! covered by a cumulative ACK, oldest first.
//!
//! # Invariants
//!
//! - Every entry satisfies `send_base ≤ seq < next_seq` in wrap-around order.
//! - Entries are sorted by `seq` and do not overlap (each one starts where
//!   the previous one ends).
//! - At most `window_size` entries exist at any time.
//!
//! This module only manages state; transmission is the caller's job.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::seq::{seq_add, seq_before, seq_before_eq};

// ---------------------------------------------------------------------------
// Outstanding
// ---------------------------------------------------------------------------

/// A single in-flight segment occupying one slot in the window.
#[derive(Debug, Clone)]
pub struct Outstanding {
    /// Sequence number of the first payload byte.
    pub seq: u32,
    /// Payload length in bytes.
    pub len: u32,
    /// The encoded datagram, ready to hand to the channel again.
    pub bytes: Vec<u8>,
    /// Logical send time used for RTT sampling.
    pub sent_at: Instant,
    /// Set once the segment has been retransmitted; such segments never
    /// produce RTT samples.
    pub retransmitted: bool,
}

impl Outstanding {
    /// First sequence number after this segment's payload.
    pub fn end(&self) -> u32 {
        seq_add(self.seq, self.len)
    }
}

/// Result of a cumulative ACK that moved the left window edge.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Advance {
    /// Number of segments removed from the window.
    pub retired: usize,
    /// Round-trip samples from retired segments that were never retransmitted.
    pub samples: Vec<Duration>,
}

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

/// Sliding-window state for one sender.
///
/// ```text
///  send_base          next_seq
///      │                  │
///  ────┼──────────────────┼──────────────────▶ seq space
///      │ <── in flight ──▶│ <── sendable ───▶
/// ```
#[derive(Debug)]
pub struct SendWindow {
    send_base: u32,
    next_seq: u32,
    window_size: usize,
    entries: VecDeque<Outstanding>,
}

impl SendWindow {
    /// Create an empty window starting at `seq_start`.
    ///
    /// `window_size` must be at least 1; [`crate::config::Config::validate`]
    /// rejects zero before an engine is built.
    pub fn new(seq_start: u32, window_size: usize) -> Self {
        debug_assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            send_base: seq_start,
            next_seq: seq_start,
            window_size,
            entries: VecDeque::new(),
        }
    }

    /// Oldest unacknowledged sequence number (`SendBase`).
    pub fn send_base(&self) -> u32 {
        self.send_base
    }

    /// Sequence number for the next new segment (`NextSeqNum`).
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// `true` when there is room for at least one more in-flight segment.
    pub fn can_send(&self) -> bool {
        self.entries.len() < self.window_size
    }

    /// Number of segments awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Place a just-transmitted segment at `next_seq` and advance `next_seq`.
    ///
    /// Returns the sequence number the segment occupies.  The caller must
    /// check [`can_send`](Self::can_send) first.
    pub fn record_sent(&mut self, bytes: Vec<u8>, payload_len: usize, now: Instant) -> u32 {
        debug_assert!(
            self.can_send(),
            "record_sent called on a full window ({} / {})",
            self.entries.len(),
            self.window_size
        );
        let seq = self.next_seq;
        let len = payload_len as u32;
        self.entries.push_back(Outstanding {
            seq,
            len,
            bytes,
            sent_at: now,
            retransmitted: false,
        });
        self.next_seq = seq_add(seq, len);
        seq
    }

    /// Process a cumulative ACK arriving at `now`.
    ///
    /// Returns `None` unless `ack` strictly advances `send_base` without
    /// running past `next_seq`.  Otherwise moves `send_base` to `ack` and
    /// retires every entry ending at or before it.
    pub fn on_ack(&mut self, ack: u32, now: Instant) -> Option<Advance> {
        if !seq_before(self.send_base, ack) || seq_before(self.next_seq, ack) {
            return None;
        }
        self.send_base = ack;

        let mut advance = Advance::default();
        while let Some(front) = self.entries.front() {
            if !seq_before_eq(front.end(), ack) {
                break;
            }
            if !front.retransmitted {
                advance.samples.push(now.saturating_duration_since(front.sent_at));
            }
            self.entries.pop_front();
            advance.retired += 1;
        }
        Some(advance)
    }

    /// Mark the oldest entry retransmitted and restart every entry's logical
    /// send time at `now`.
    ///
    /// A single timeout refreshes the whole window rather than one segment.
    /// Returns the bytes to put back on the wire, or `None` if idle.
    pub fn retransmit_oldest(&mut self, now: Instant) -> Option<Vec<u8>> {
        let bytes = {
            let oldest = self.entries.front_mut()?;
            oldest.retransmitted = true;
            oldest.bytes.clone()
        };
        for entry in self.entries.iter_mut() {
            entry.sent_at = now;
        }
        Some(bytes)
    }

    /// Iterate over in-flight segments from oldest to newest.
    pub fn entries(&self) -> impl Iterator<Item = &Outstanding> {
        self.entries.iter()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(w: &mut SendWindow, count: usize, len: usize, now: Instant) {
        for _ in 0..count {
            w.record_sent(vec![0u8; len], len, now);
        }
    }

    #[test]
    fn initial_state() {
        let w = SendWindow::new(100, 4);
        assert_eq!(w.send_base(), 100);
        assert_eq!(w.next_seq(), 100);
        assert!(w.can_send());
        assert!(w.is_empty());
    }

    #[test]
    fn record_sent_advances_next_seq() {
        let mut w = SendWindow::new(0, 4);
        let seq = w.record_sent(vec![1, 2, 3], 3, Instant::now());
        assert_eq!(seq, 0);
        assert_eq!(w.next_seq(), 3);
        assert_eq!(w.send_base(), 0);
        assert_eq!(w.in_flight(), 1);
    }

    #[test]
    fn window_full_blocks_send() {
        let mut w = SendWindow::new(0, 2);
        fill(&mut w, 2, 5, Instant::now());
        assert!(!w.can_send());
    }

    #[test]
    fn cumulative_ack_retires_and_samples() {
        let t0 = Instant::now();
        let mut w = SendWindow::new(0, 4);
        fill(&mut w, 3, 5, t0);

        let adv = w.on_ack(10, t0 + Duration::from_millis(30)).unwrap();
        assert_eq!(adv.retired, 2);
        assert_eq!(adv.samples, vec![Duration::from_millis(30); 2]);
        assert_eq!(w.send_base(), 10);
        assert_eq!(w.in_flight(), 1);
    }

    #[test]
    fn duplicate_ack_does_not_advance() {
        let now = Instant::now();
        let mut w = SendWindow::new(0, 4);
        fill(&mut w, 1, 5, now);
        assert!(w.on_ack(5, now).is_some());
        assert!(w.on_ack(5, now).is_none());
        assert!(w.on_ack(0, now).is_none());
    }

    #[test]
    fn ack_beyond_next_seq_ignored() {
        let now = Instant::now();
        let mut w = SendWindow::new(0, 4);
        fill(&mut w, 1, 5, now);
        assert!(w.on_ack(1000, now).is_none());
        assert_eq!(w.send_base(), 0);
    }

    #[test]
    fn retransmitted_segment_is_not_sampled() {
        let t0 = Instant::now();
        let mut w = SendWindow::new(0, 4);
        fill(&mut w, 2, 5, t0);

        let t1 = t0 + Duration::from_millis(100);
        assert!(w.retransmit_oldest(t1).is_some());
        assert!(w.entries().all(|e| e.sent_at == t1));

        let adv = w.on_ack(10, t1 + Duration::from_millis(20)).unwrap();
        assert_eq!(adv.retired, 2);
        // Only the second segment was never retransmitted.
        assert_eq!(adv.samples, vec![Duration::from_millis(20)]);
    }

    #[test]
    fn retransmit_on_empty_window_is_none() {
        let mut w = SendWindow::new(0, 1);
        assert!(w.retransmit_oldest(Instant::now()).is_none());
    }

    #[test]
    fn seq_wrap_around() {
        let start = u32::MAX - 5;
        let now = Instant::now();
        let mut w = SendWindow::new(start, 4);
        fill(&mut w, 2, 10, now);
        assert_eq!(w.next_seq(), 14);

        let adv = w.on_ack(start.wrapping_add(10), now).unwrap();
        assert_eq!(adv.retired, 1);
        let adv = w.on_ack(14, now).unwrap();
        assert_eq!(adv.retired, 1);
        assert!(w.is_empty());
    }
}
