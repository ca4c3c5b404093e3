//! In-memory network with fault injection, for tests.
//!
//! Real networks drop, reorder, and duplicate packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! this module provides:
//!
//! - [`MemoryChannel`]: a connected pair of [`DatagramChannel`]s backed by
//!   unbounded queues.  On its own it is a perfect network.
//! - [`FaultyChannel`]: a wrapper that decides, per outgoing datagram, whether
//!   to deliver, drop, duplicate, corrupt or delay it.
//!
//! | Fault         | Effect                                              |
//! |---------------|-----------------------------------------------------|
//! | Drop          | The datagram is silently discarded.                 |
//! | Duplicate     | Delivered twice.                                    |
//! | Corrupt       | One bit is flipped before delivery.                 |
//! | Delay         | Delivered later, letting newer datagrams overtake.  |
//!
//! Faults come either from a script (a closure inspecting each datagram) or
//! from a seeded RNG driven by [`SimulatorConfig`], so failures reproduce.

use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::socket::{DatagramChannel, IoFuture};

type Datagram = (Vec<u8>, SocketAddr);

// ---------------------------------------------------------------------------
// MemoryChannel
// ---------------------------------------------------------------------------

/// One end of an in-memory datagram link.
///
/// Datagrams addressed to anything other than the peer's address vanish, as
/// do datagrams sent after the peer end was dropped.
#[derive(Debug)]
pub struct MemoryChannel {
    local: SocketAddr,
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Datagram>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

impl MemoryChannel {
    /// Create two connected ends addressed as `a` and `b`.
    pub fn pair(a: SocketAddr, b: SocketAddr) -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                local: a,
                peer: b,
                tx: b_tx,
                rx: tokio::sync::Mutex::new(a_rx),
            },
            Self {
                local: b,
                peer: a,
                tx: a_tx,
                rx: tokio::sync::Mutex::new(b_rx),
            },
        )
    }

    async fn recv_into(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some((bytes, from)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok((n, from))
            }
            // Nobody can send to us any more; like an idle UDP socket.
            None => std::future::pending().await,
        }
    }
}

impl DatagramChannel for MemoryChannel {
    fn send_to<'a>(&'a self, buf: &'a [u8], dest: SocketAddr) -> IoFuture<'a, ()> {
        if dest != self.peer {
            log::trace!("[sim] {} -> {dest}: no such host, dropped", self.local);
        } else if self.tx.send((buf.to_vec(), self.local)).is_err() {
            log::trace!("[sim] {} -> {dest}: peer gone, dropped", self.local);
        }
        let sent: io::Result<()> = Ok(());
        Box::pin(std::future::ready(sent))
    }

    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> IoFuture<'a, (usize, SocketAddr)> {
        Box::pin(self.recv_into(buf))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

/// What to do with one outgoing datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Deliver,
    Drop,
    Duplicate,
    /// Flip the bit at this index (taken modulo the datagram's bit length).
    Corrupt(usize),
    Delay(Duration),
}

/// Configuration for the random fault model.
///
/// All probabilities are in the range `[0.0, 1.0]`; out-of-range values are
/// clamped.  At most one fault is applied per datagram, checked in the order
/// loss, duplication, corruption, reordering.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given packet is silently dropped.
    pub loss_rate: f64,
    /// Probability that a packet is reordered.
    pub reorder_rate: f64,
    /// Fixed delay applied to reordered packets.
    pub reorder_delay: Duration,
    /// Probability that a packet is duplicated.
    pub duplicate_rate: f64,
    /// Probability that a packet has one bit flipped.
    pub corrupt_rate: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default; the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::ZERO,
            duplicate_rate: 0.0,
            corrupt_rate: 0.0,
        }
    }
}

/// How many datagrams each fault was applied to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub delivered: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub corrupted: u64,
    pub delayed: u64,
}

type Policy = Box<dyn FnMut(&[u8]) -> Fault + Send>;

/// A [`DatagramChannel`] that applies a fault policy to everything it sends.
/// Receiving is passed straight through to the inner channel.
pub struct FaultyChannel<C: ?Sized> {
    policy: Mutex<Policy>,
    stats: Mutex<FaultStats>,
    inner: Arc<C>,
}

impl<C> FaultyChannel<C>
where
    C: DatagramChannel + ?Sized + 'static,
{
    /// Apply `policy` to each outgoing datagram, in send order.
    pub fn scripted<F>(inner: Arc<C>, policy: F) -> Self
    where
        F: FnMut(&[u8]) -> Fault + Send + 'static,
    {
        Self {
            policy: Mutex::new(Box::new(policy)),
            stats: Mutex::new(FaultStats::default()),
            inner,
        }
    }

    /// Draw faults from `config` using an RNG seeded with `seed`.
    pub fn random(inner: Arc<C>, config: SimulatorConfig, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let p = |rate: f64| rate.clamp(0.0, 1.0);
        let (loss, dup, corrupt, reorder) = (
            p(config.loss_rate),
            p(config.duplicate_rate),
            p(config.corrupt_rate),
            p(config.reorder_rate),
        );
        Self::scripted(inner, move |bytes: &[u8]| {
            if rng.random_bool(loss) {
                Fault::Drop
            } else if rng.random_bool(dup) {
                Fault::Duplicate
            } else if !bytes.is_empty() && rng.random_bool(corrupt) {
                Fault::Corrupt(rng.random_range(0..bytes.len() * 8))
            } else if rng.random_bool(reorder) {
                Fault::Delay(config.reorder_delay)
            } else {
                Fault::Deliver
            }
        })
    }

    pub fn stats(&self) -> FaultStats {
        lock(&self.stats).clone()
    }

    fn decide(&self, bytes: &[u8]) -> Fault {
        let fault = {
            let mut policy = lock(&self.policy);
            (*policy)(bytes)
        };
        let mut stats = lock(&self.stats);
        match fault {
            Fault::Deliver => stats.delivered += 1,
            Fault::Drop => stats.dropped += 1,
            Fault::Duplicate => stats.duplicated += 1,
            Fault::Corrupt(_) => stats.corrupted += 1,
            Fault::Delay(_) => stats.delayed += 1,
        }
        fault
    }

    async fn apply(&self, fault: Fault, buf: &[u8], dest: SocketAddr) -> io::Result<()> {
        match fault {
            Fault::Deliver => self.inner.send_to(buf, dest).await,
            Fault::Drop => {
                log::trace!("[sim] dropped {} bytes to {dest}", buf.len());
                Ok(())
            }
            Fault::Duplicate => {
                self.inner.send_to(buf, dest).await?;
                self.inner.send_to(buf, dest).await
            }
            Fault::Corrupt(bit) => {
                let mut bytes = buf.to_vec();
                if !bytes.is_empty() {
                    let bit = bit % (bytes.len() * 8);
                    bytes[bit / 8] ^= 1 << (bit % 8);
                }
                self.inner.send_to(&bytes, dest).await
            }
            Fault::Delay(delay) => {
                let inner = Arc::clone(&self.inner);
                let bytes = buf.to_vec();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = inner.send_to(&bytes, dest).await {
                        log::debug!("[sim] delayed send failed: {e}");
                    }
                });
                Ok(())
            }
        }
    }
}

/// The policy and counters stay usable even if a test panicked mid-send.
fn lock<T: ?Sized>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl<C> DatagramChannel for FaultyChannel<C>
where
    C: DatagramChannel + ?Sized + 'static,
{
    fn send_to<'a>(&'a self, buf: &'a [u8], dest: SocketAddr) -> IoFuture<'a, ()> {
        let fault = self.decide(buf);
        Box::pin(self.apply(fault, buf, dest))
    }

    fn recv_from<'a>(&'a self, buf: &'a mut [u8]) -> IoFuture<'a, (usize, SocketAddr)> {
        self.inner.recv_from(buf)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
