//! Sender engine: Go-Back-N transmission with an adaptive timeout.
//!
//! [`Sender`] is pure protocol state.  It never touches a socket or a
//! clock; the driver in [`crate::connection`] feeds it inbound datagrams and
//! the current time, then drains the datagrams it queued for transmission.
//!
//! # Scheduling pass
//!
//! The driver calls, in this order:
//! 1. [`Sender::on_datagram`] for every queued inbound datagram;
//! 2. [`Sender::on_tick`], which checks the timer and then fills the window;
//! 3. [`Sender::poll_transmit`] until it returns `None`.
//!
//! # Timer
//!
//! There is one deadline per sender, not one per segment.  A timeout
//! retransmits only the oldest outstanding segment but restarts the logical
//! send time of the whole window, and RTT samples are only taken from
//! segments that were never retransmitted.

use std::collections::VecDeque;
use std::time::Instant;

use crate::checksum;
use crate::config::{Config, MAX_TIMEOUT};
use crate::connection::ConnError;
use crate::event_log::{endpoint, EventLog, LogRecord, Tag};
use crate::rtt::RttEstimator;
use crate::segment::{Segment, HEADER_LEN};
use crate::send_window::SendWindow;
use crate::state::SenderState;

/// Transfer counters reported when the connection closes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// Header + payload bytes of every datagram put on the wire.
    pub bytes_sent: u64,
    /// Datagrams put on the wire, retransmissions and FINs included.
    pub segments_sent: u64,
    /// Timer-driven resends of data or FIN.
    pub retransmissions: u64,
    /// The subset of `retransmissions` that were FIN resends.
    pub fin_retransmissions: u64,
    /// RTT samples folded into the estimator.
    pub rtt_samples: u64,
    /// FIN-ACK segments accepted (at most one).
    pub fin_acks: u64,
}

/// Send side of one connection.
#[derive(Debug)]
pub struct Sender {
    state: SenderState,
    config: Config,
    window: SendWindow,
    rtt: RttEstimator,
    /// Application chunks not yet given a sequence number.
    queue: VecDeque<Vec<u8>>,
    /// The single retransmission deadline.
    deadline: Option<Instant>,
    /// Encoded FIN, kept for resends while closing.
    fin: Option<Vec<u8>>,
    outbox: VecDeque<Vec<u8>>,
    stats: SenderStats,
    log: EventLog,
    local_host: String,
    peer_host: String,
}

impl Sender {
    /// Build a sender from a validated `config`.
    pub fn new(config: Config, log: EventLog) -> Result<Self, ConnError> {
        config.validate()?;
        Ok(Self {
            state: SenderState::Transmitting,
            window: SendWindow::new(config.initial_seq, config.window_size),
            rtt: RttEstimator::new(config.initial_timeout),
            queue: VecDeque::new(),
            deadline: None,
            fin: None,
            outbox: VecDeque::new(),
            stats: SenderStats::default(),
            log,
            local_host: config.local_host(),
            peer_host: config.peer_host(),
            config,
        })
    }

    /// Queue one application chunk behind those already queued.
    ///
    /// Empty chunks occupy no sequence space and are skipped.
    pub fn push(&mut self, chunk: Vec<u8>) -> Result<(), ConnError> {
        if self.state != SenderState::Transmitting {
            return Err(ConnError::NotAccepting(self.state));
        }
        if chunk.len() > self.config.max_payload {
            return Err(ConnError::ChunkTooLarge {
                len: chunk.len(),
                max: self.config.max_payload,
            });
        }
        if !chunk.is_empty() {
            self.queue.push_back(chunk);
        }
        Ok(())
    }

    /// Queue every chunk of `chunks` in order.
    pub fn extend<I>(&mut self, chunks: I) -> Result<(), ConnError>
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        chunks.into_iter().try_for_each(|c| self.push(c))
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SenderState::Closed
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    /// Absolute time of the next timeout check, if the timer is running.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn in_flight(&self) -> usize {
        self.window.in_flight()
    }

    pub fn send_base(&self) -> u32 {
        self.window.send_base()
    }

    pub fn next_seq(&self) -> u32 {
        self.window.next_seq()
    }

    /// Number of chunks still waiting for window space.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Next datagram to put on the wire.
    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.outbox.pop_front()
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Process one datagram from the peer that arrived at `now`.
    ///
    /// Corrupt or truncated datagrams are dropped without a trace in the
    /// event log.
    pub fn on_datagram(&mut self, bytes: &[u8], now: Instant) {
        if !checksum::verify(bytes) {
            log::debug!("[sender] dropping corrupt datagram ({} bytes)", bytes.len());
            return;
        }
        let seg = match Segment::decode(bytes) {
            Ok(seg) => seg,
            Err(e) => {
                log::debug!("[sender] dropping datagram: {e}");
                return;
            }
        };

        match self.state {
            SenderState::Transmitting => self.on_ack(&seg, now),
            SenderState::Closing => self.on_closing_segment(&seg),
            SenderState::Closed => {
                log::debug!("[sender] segment after close ignored (ack={})", seg.header.ack);
            }
        }
    }

    fn on_ack(&mut self, seg: &Segment, now: Instant) {
        let h = &seg.header;
        self.record(
            LogRecord::new(
                endpoint(&self.peer_host, h.src_port),
                endpoint(&self.local_host, h.dst_port),
                h.seq,
                h.ack,
            )
            .tag(Tag::Ack),
        );
        if !h.is_ack() || h.is_fin() {
            return;
        }

        let Some(advance) = self.window.on_ack(h.ack, now) else {
            log::trace!("[sender] ACK {} does not advance send_base {}", h.ack, self.window.send_base());
            return;
        };
        for sample in advance.samples {
            self.rtt.update(sample);
            self.stats.rtt_samples += 1;
        }
        log::debug!(
            "[sender] ACK {} retired {} segment(s); in_flight={} timeout={:?}",
            h.ack,
            advance.retired,
            self.window.in_flight(),
            self.rtt.timeout()
        );

        self.deadline = if self.window.is_empty() {
            None
        } else {
            Some(self.deadline_after(now))
        };
    }

    fn on_closing_segment(&mut self, seg: &Segment) {
        let h = &seg.header;
        let mut rec = LogRecord::new(
            endpoint(&self.peer_host, h.src_port),
            endpoint(&self.local_host, h.dst_port),
            h.seq,
            h.ack,
        )
        .tag(Tag::Ack);

        if h.is_fin_ack() {
            rec = rec.tag(Tag::Fin);
            self.record(rec);
            self.stats.fin_acks += 1;
            self.state = SenderState::Closed;
            self.deadline = None;
            self.fin = None;
            self.log.flush();
            log::info!("[sender] FIN-ACK received; connection closed");
        } else {
            self.record(rec);
            log::debug!("[sender] non-FIN-ACK segment while closing ignored");
        }
    }

    // -----------------------------------------------------------------------
    // Timer + transmission
    // -----------------------------------------------------------------------

    /// Check the timer, then send whatever the window allows.
    pub fn on_tick(&mut self, now: Instant) {
        self.on_timeout(now);
        self.fill_window(now);
    }

    /// Retransmit if the deadline has passed.
    pub fn on_timeout(&mut self, now: Instant) {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return,
        }

        match self.state {
            SenderState::Transmitting => {
                let Some(seq) = self.window.entries().next().map(|e| e.seq) else {
                    self.deadline = None;
                    return;
                };
                let Some(bytes) = self.window.retransmit_oldest(now) else {
                    return;
                };
                self.record(self.outbound_record(seq, None));
                log::debug!("[sender] timeout; retransmitting seq={seq}");
                self.transmit(bytes);
                self.stats.retransmissions += 1;
            }
            SenderState::Closing => {
                let Some(fin) = self.fin.clone() else {
                    return;
                };
                self.record(self.outbound_record(self.window.next_seq(), Some(Tag::Fin)));
                log::debug!("[sender] timeout; resending FIN");
                self.transmit(fin);
                self.stats.retransmissions += 1;
                self.stats.fin_retransmissions += 1;
            }
            SenderState::Closed => {
                self.deadline = None;
                return;
            }
        }
        self.deadline = Some(self.deadline_after(now));
    }

    /// Send queued chunks while the window has room; start closing once
    /// everything has been acknowledged.
    pub fn fill_window(&mut self, now: Instant) {
        if self.state != SenderState::Transmitting {
            return;
        }

        while self.window.can_send() {
            let Some(chunk) = self.queue.pop_front() else {
                break;
            };
            let seq = self.window.next_seq();
            let len = chunk.len();
            let bytes =
                Segment::data(self.config.local.port(), self.config.peer.port(), seq, chunk).encode();

            self.record(self.outbound_record(seq, None));
            self.transmit(bytes.clone());
            self.window.record_sent(bytes, len, now);
            log::trace!("[sender] DATA seq={seq} len={len} in_flight={}", self.window.in_flight());

            if self.deadline.is_none() {
                self.deadline = Some(self.deadline_after(now));
            }
        }

        if self.queue.is_empty() && self.window.is_empty() {
            self.begin_close(now);
        }
    }

    fn begin_close(&mut self, now: Instant) {
        let seq = self.window.next_seq();
        let fin = Segment::fin(self.config.local.port(), self.config.peer.port(), seq).encode();

        self.record(self.outbound_record(seq, Some(Tag::Fin)));
        log::info!("[sender] all data acknowledged; FIN seq={seq}");
        self.transmit(fin.clone());
        self.fin = Some(fin);
        self.state = SenderState::Closing;
        self.deadline = Some(self.deadline_after(now));
    }

    fn deadline_after(&self, now: Instant) -> Instant {
        now + self.rtt.timeout().min(MAX_TIMEOUT)
    }

    fn transmit(&mut self, bytes: Vec<u8>) {
        debug_assert!(bytes.len() >= HEADER_LEN);
        self.stats.bytes_sent += bytes.len() as u64;
        self.stats.segments_sent += 1;
        self.outbox.push_back(bytes);
    }

    /// Record for a segment this sender puts on the wire.
    fn outbound_record(&self, seq: u32, tag: Option<Tag>) -> LogRecord {
        let mut rec = LogRecord::new(
            endpoint(&self.local_host, self.config.local.port()),
            endpoint(&self.peer_host, self.config.peer.port()),
            seq,
            0,
        );
        if let Some(tag) = tag {
            rec = rec.tag(tag);
        }
        rec
    }

    /// Append `rec` with the current `EstimatedRTT`.
    fn record(&mut self, rec: LogRecord) {
        let rec = rec.rtt(self.rtt.estimated());
        self.log.record(&rec);
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const LOCAL_PORT: u16 = 41191;
    const PEER_PORT: u16 = 41194;

    fn config(window: usize) -> Config {
        Config {
            window_size: window,
            initial_timeout: Duration::from_millis(100),
            local: ([127, 0, 0, 1], LOCAL_PORT).into(),
            peer: ([127, 0, 0, 1], PEER_PORT).into(),
            ..Config::default()
        }
    }

    fn sender(window: usize, chunks: usize, len: usize) -> Sender {
        let mut s = Sender::new(config(window), EventLog::disabled()).unwrap();
        s.extend((0..chunks).map(|i| vec![i as u8; len])).unwrap();
        s
    }

    fn ack(a: u32) -> Vec<u8> {
        Segment::ack(PEER_PORT, LOCAL_PORT, a).encode()
    }

    fn fin_ack(a: u32) -> Vec<u8> {
        Segment::fin_ack(PEER_PORT, LOCAL_PORT, a).encode()
    }

    fn drain(s: &mut Sender) -> Vec<Segment> {
        std::iter::from_fn(|| s.poll_transmit())
            .map(|b| Segment::decode(&b).unwrap())
            .collect()
    }

    #[test]
    fn deadline_is_capped_for_slow_samples() {
        let t0 = Instant::now();
        let mut s = Sender::new(
            Config {
                initial_timeout: MAX_TIMEOUT,
                ..config(2)
            },
            EventLog::disabled(),
        )
        .unwrap();
        s.extend([vec![1; 10], vec![2; 10]]).unwrap();
        s.on_tick(t0);
        drain(&mut s);
        assert_eq!(s.deadline(), Some(t0 + MAX_TIMEOUT));

        // A two-day sample pushes the estimate past the cap.
        let later = t0 + 2 * MAX_TIMEOUT;
        s.on_datagram(&ack(10), later);
        assert!(s.rtt().timeout() > MAX_TIMEOUT);
        assert_eq!(s.deadline(), Some(later + MAX_TIMEOUT));
    }

    #[test]
    fn fills_window_then_stops() {
        let t0 = Instant::now();
        let mut s = sender(3, 5, 10);
        s.on_tick(t0);
        let out = drain(&mut s);
        let seqs: Vec<u32> = out.iter().map(|x| x.header.seq).collect();
        assert_eq!(seqs, vec![0, 10, 20]);
        assert_eq!(s.in_flight(), 3);
        assert_eq!(s.queued(), 2);
        assert_eq!(s.deadline(), Some(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn ack_slides_window_and_samples_rtt() {
        let t0 = Instant::now();
        let mut s = sender(2, 3, 10);
        s.on_tick(t0);
        drain(&mut s);

        let t1 = t0 + Duration::from_millis(40);
        s.on_datagram(&ack(10), t1);
        assert_eq!(s.send_base(), 10);
        assert_eq!(s.stats().rtt_samples, 1);
        assert_eq!(s.rtt().estimated(), Duration::from_millis(40));
        // Timer restarted from the new estimate.
        assert_eq!(s.deadline(), Some(t1 + Duration::from_millis(40)));

        s.on_tick(t1);
        let out = drain(&mut s);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].header.seq, 20);
    }

    #[test]
    fn stale_and_future_acks_are_ignored() {
        let t0 = Instant::now();
        let mut s = sender(4, 2, 10);
        s.on_tick(t0);
        drain(&mut s);

        s.on_datagram(&ack(0), t0);
        s.on_datagram(&ack(500), t0);
        assert_eq!(s.send_base(), 0);
        assert_eq!(s.in_flight(), 2);
    }

    #[test]
    fn corrupt_ack_is_dropped() {
        let t0 = Instant::now();
        let mut s = sender(4, 1, 10);
        s.on_tick(t0);
        drain(&mut s);

        let mut bytes = ack(10);
        bytes[9] ^= 0x40;
        s.on_datagram(&bytes, t0);
        s.on_datagram(&bytes[..10], t0);
        assert_eq!(s.in_flight(), 1);
    }

    #[test]
    fn timeout_retransmits_oldest_only() {
        let t0 = Instant::now();
        let mut s = sender(3, 3, 10);
        s.on_tick(t0);
        drain(&mut s);

        // Not yet due.
        s.on_tick(t0 + Duration::from_millis(99));
        assert!(drain(&mut s).is_empty());

        let t1 = t0 + Duration::from_millis(100);
        s.on_tick(t1);
        let out = drain(&mut s);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].header.seq, 0);
        assert_eq!(s.stats().retransmissions, 1);
        assert_eq!(s.deadline(), Some(t1 + Duration::from_millis(100)));

        // Segment 0 was retransmitted: no sample.  Segments 1 and 2 were
        // restarted at t1 and sample from there.
        s.on_datagram(&ack(30), t1 + Duration::from_millis(10));
        assert_eq!(s.stats().rtt_samples, 2);
        assert!(s.rtt().estimated() < Duration::from_millis(11));
    }

    #[test]
    fn sends_fin_when_everything_is_acked() {
        let t0 = Instant::now();
        let mut s = sender(2, 2, 10);
        s.on_tick(t0);
        drain(&mut s);

        s.on_datagram(&ack(20), t0 + Duration::from_millis(5));
        assert_eq!(s.deadline(), None);
        s.on_tick(t0 + Duration::from_millis(5));

        let out = drain(&mut s);
        assert_eq!(out.len(), 1);
        assert!(out[0].header.is_fin());
        assert_eq!(out[0].header.seq, 20);
        assert_eq!(s.state(), SenderState::Closing);
        assert!(matches!(s.push(vec![1]), Err(ConnError::NotAccepting(SenderState::Closing))));
    }

    #[test]
    fn empty_input_goes_straight_to_closing() {
        let t0 = Instant::now();
        let mut s = sender(2, 0, 0);
        s.on_tick(t0);
        let out = drain(&mut s);
        assert_eq!(out.len(), 1);
        assert!(out[0].header.is_fin());
        assert_eq!(out[0].header.seq, 0);
    }

    #[test]
    fn oversized_chunk_rejected() {
        let mut s = Sender::new(config(1), EventLog::disabled()).unwrap();
        assert!(matches!(
            s.push(vec![0; 513]),
            Err(ConnError::ChunkTooLarge { len: 513, max: 512 })
        ));
        s.push(Vec::new()).unwrap();
        assert_eq!(s.queued(), 0);
    }

    #[test]
    fn fin_liveness_after_k_lost_fin_acks() {
        const K: u64 = 4;
        let mut now = Instant::now();
        let mut s = sender(2, 1, 10);
        s.on_tick(now);
        drain(&mut s);
        now += Duration::from_millis(20);
        s.on_datagram(&ack(10), now);
        s.on_tick(now);
        assert_eq!(drain(&mut s).len(), 1); // original FIN, its FIN-ACK is lost

        let mut observed = 0;
        while !s.is_closed() {
            now = s.deadline().unwrap();
            s.on_tick(now);
            for seg in drain(&mut s) {
                assert!(seg.header.is_fin());
                // The peer answers every FIN; only the answer to the k-th
                // retransmission survives.
                if s.stats().fin_retransmissions == K {
                    s.on_datagram(&fin_ack(seg.header.seq), now);
                    observed += 1;
                }
            }
        }
        assert_eq!(observed, 1);
        assert_eq!(s.stats().fin_acks, 1);
        assert_eq!(s.stats().fin_retransmissions, K);
        assert_eq!(s.deadline(), None);

        // A late duplicate FIN-ACK changes nothing.
        s.on_datagram(&fin_ack(10), now);
        assert_eq!(s.stats().fin_acks, 1);
    }

    #[test]
    fn window_bound_holds_under_random_loss() {
        let mut rng = StdRng::seed_from_u64(7);
        for window in 1..=6 {
            let mut now = Instant::now();
            let mut s = sender(window, 40, 8);
            // Receiver model: in-order only, cumulative ACK.
            let mut expected = 0u32;

            for _ in 0..10_000 {
                if s.is_closed() {
                    break;
                }
                now += Duration::from_millis(rng.random_range(0..60));
                s.on_tick(now);
                assert!(s.in_flight() <= window);

                for seg in drain(&mut s) {
                    if rng.random_bool(0.3) {
                        continue; // lost
                    }
                    let reply = if seg.header.is_fin() {
                        fin_ack(expected)
                    } else {
                        if seg.header.seq == expected {
                            expected += seg.payload.len() as u32;
                        }
                        ack(expected)
                    };
                    if rng.random_bool(0.3) {
                        continue; // ACK lost
                    }
                    s.on_datagram(&reply, now);
                    assert!(s.in_flight() <= window);
                }
            }
            assert!(s.is_closed(), "window {window} never closed");
            assert_eq!(expected, 40 * 8);
        }
    }
}
