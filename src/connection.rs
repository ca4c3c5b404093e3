//! Async drivers for the sender and receiver engines.
//!
//! # Architecture
//!
//! ```text
//!   DatagramChannel ──recv_from──▶ receive task
//!          ▲                          │ (bytes, from, arrival time)
//!          │                          ▼
//!          │                    bounded mpsc queue
//!          │                          │
//!          │                          ▼
//!          └──────send_to────── engine loop ── select!(queue, deadline)
//!                                 owns Sender / Receiver
//! ```
//!
//! The receive task only moves datagrams from the channel into the queue,
//! stamping each with its arrival time so RTT samples are not skewed by
//! queueing delay.  The engine loop is the only owner of protocol state: it
//! sleeps until either a datagram is queued or the retransmission deadline
//! passes, then runs one scheduling pass and flushes the engine's outbox.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;

use crate::config::{ConfigError, MAX_TIMEOUT};
use crate::receiver::{Disposition, Receiver, ReceiverStats};
use crate::sender::{Sender, SenderStats};
use crate::socket::DatagramChannel;
use crate::state::SenderState;

/// Capacity of the queue between the receive task and the engine loop.
const INBOUND_QUEUE: usize = 256;

/// Receive buffer size; anything larger than a maximal segment is truncated
/// and then fails its checksum.
const MAX_DATAGRAM: usize = 2048;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by the engines and their drivers.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The datagram channel failed; transfers are not retried.
    #[error("channel I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("chunk of {len} bytes exceeds the {max}-byte payload limit")]
    ChunkTooLarge { len: usize, max: usize },
    #[error("sender is {0} and no longer accepts data")]
    NotAccepting(SenderState),
    /// The receive task stopped before the connection closed.
    #[error("inbound datagram queue closed")]
    ChannelClosed,
}

// ---------------------------------------------------------------------------
// Receive task
// ---------------------------------------------------------------------------

/// One datagram handed from the receive task to the engine loop.
#[derive(Debug)]
pub struct Inbound {
    pub bytes: Vec<u8>,
    pub from: SocketAddr,
    /// When the receive task read the datagram off the channel.
    pub at: Instant,
}

/// Spawn a task that reads `channel` until it fails or the queue's consumer
/// goes away.  A channel error is forwarded once and ends the task.
pub fn spawn_receive_task<C>(channel: Arc<C>) -> (mpsc::Receiver<io::Result<Inbound>>, JoinHandle<()>)
where
    C: DatagramChannel + ?Sized + 'static,
{
    let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let item = match channel.recv_from(&mut buf).await {
                Ok((n, from)) => Ok(Inbound {
                    bytes: buf[..n].to_vec(),
                    from,
                    at: Instant::now(),
                }),
                // ICMP feedback from a peer that already went away.
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    log::debug!("[recv-task] ignoring {e}");
                    continue;
                }
                Err(e) => Err(e),
            };
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
        log::trace!("[recv-task] exiting");
    });
    (rx, handle)
}

// ---------------------------------------------------------------------------
// Sender driver
// ---------------------------------------------------------------------------

/// Run `sender` over `channel` until its FIN is acknowledged.
///
/// Chunks must already be queued with [`Sender::push`]; the driver sends
/// them, retransmits on timeout, and tears the connection down.
pub async fn run_sender<C>(channel: Arc<C>, mut sender: Sender) -> Result<SenderStats, ConnError>
where
    C: DatagramChannel + ?Sized + 'static,
{
    let peer = sender.config().peer;
    let (mut inbound, reader) = spawn_receive_task(Arc::clone(&channel));
    let result = sender_loop(&*channel, peer, &mut sender, &mut inbound).await;
    reader.abort();
    result?;

    let stats = sender.stats().clone();
    log::info!(
        "[sender] closed: {} segments, {} retransmissions, est. RTT {:?}",
        stats.segments_sent,
        stats.retransmissions,
        sender.rtt().estimated()
    );
    Ok(stats)
}

async fn sender_loop<C>(
    channel: &C,
    peer: SocketAddr,
    sender: &mut Sender,
    inbound: &mut mpsc::Receiver<io::Result<Inbound>>,
) -> Result<(), ConnError>
where
    C: DatagramChannel + ?Sized,
{
    loop {
        loop {
            match inbound.try_recv() {
                Ok(item) => {
                    let d = item?;
                    sender.on_datagram(&d.bytes, d.at);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(ConnError::ChannelClosed),
            }
        }

        sender.on_tick(Instant::now());
        while let Some(bytes) = sender.poll_transmit() {
            channel.send_to(&bytes, peer).await?;
        }
        if sender.is_closed() {
            return Ok(());
        }

        tokio::select! {
            item = inbound.recv() => match item {
                Some(item) => {
                    let d = item?;
                    sender.on_datagram(&d.bytes, d.at);
                }
                None => return Err(ConnError::ChannelClosed),
            },
            _ = sleep_until(sender.deadline()) => {}
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Receiver driver
// ---------------------------------------------------------------------------

/// Run `receiver` over `channel`, writing the byte stream to `output`.
///
/// Returns once the FIN has been acknowledged and `fin_linger` has passed
/// without another FIN arriving.  `output` is flushed when the FIN arrives.
pub async fn run_receiver<C, W>(
    channel: Arc<C>,
    mut receiver: Receiver,
    mut output: W,
) -> Result<ReceiverStats, ConnError>
where
    C: DatagramChannel + ?Sized + 'static,
    W: Write,
{
    let (mut inbound, reader) = spawn_receive_task(Arc::clone(&channel));
    let result = receiver_loop(&*channel, &mut receiver, &mut inbound, &mut output).await;
    reader.abort();
    result?;
    log::info!(
        "[receiver] done: {} bytes delivered",
        receiver.stats().bytes_delivered
    );
    Ok(receiver.stats().clone())
}

async fn receiver_loop<C, W>(
    channel: &C,
    receiver: &mut Receiver,
    inbound: &mut mpsc::Receiver<io::Result<Inbound>>,
    output: &mut W,
) -> Result<(), ConnError>
where
    C: DatagramChannel + ?Sized,
    W: Write,
{
    let peer = receiver.peer();

    while !receiver.is_closed() {
        let d = inbound.recv().await.ok_or(ConnError::ChannelClosed)??;
        receiver.on_datagram(&d.bytes);
        // Synchronous write on the engine task: `output` must not block for
        // long, or ACKs stall behind it. Wrap slow sinks in a `BufWriter`.
        while let Some(chunk) = receiver.take_delivered() {
            output.write_all(&chunk)?;
        }
        while let Some(bytes) = receiver.poll_transmit() {
            channel.send_to(&bytes, peer).await?;
        }
    }
    output.flush()?;

    // Keep answering retransmitted FINs in case our FIN-ACK was lost.
    let linger = receiver.fin_linger().min(MAX_TIMEOUT);
    let mut quiet_until = tokio::time::Instant::now() + linger;
    loop {
        let d = match tokio::time::timeout_at(quiet_until, inbound.recv()).await {
            Ok(Some(item)) => item?,
            Ok(None) | Err(_) => break,
        };
        if receiver.on_datagram(&d.bytes) == Disposition::Fin {
            log::debug!("[receiver] repeated FIN from {}", d.from);
            quiet_until = tokio::time::Instant::now() + linger;
        }
        while let Some(bytes) = receiver.poll_transmit() {
            channel.send_to(&bytes, peer).await?;
        }
    }
    Ok(())
}
