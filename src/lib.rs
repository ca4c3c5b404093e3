//! `minitcp`: a TCP-like reliable, in-order byte stream over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   data / FIN    ┌──────────┐
//!  │  Sender  │────────────────▶│ Receiver │
//!  └────┬─────┘                 └─────┬────┘
//!       │◀────── ACK / FIN-ACK ───────┘
//!       │                             │
//!  ┌────▼─────────────────────────────▼────┐
//!  │      connection (async drivers)       │
//!  │  receive task ─▶ queue ─▶ engine loop │
//!  └────┬──────────────────────────────────┘
//!       │ raw datagrams
//!  ┌────▼────────────┐
//!  │ DatagramChannel │  UDP socket, or the in-memory simulator
//!  └─────────────────┘
//! ```
//!
//! The sender is Go-Back-N with a single retransmission timer and an
//! adaptive timeout; the receiver acknowledges cumulatively and buffers
//! out-of-order segments until the gap in front of them is filled.  Both
//! engines are synchronous state machines; only [`connection`] is async.
//!
//! Modules:
//! - [`seq`]: wrap-around sequence-number arithmetic
//! - [`checksum`]: 16-bit one's-complement Internet checksum
//! - [`segment`]: wire format (encode / decode)
//! - [`rtt`]: smoothed RTT and timeout estimation
//! - [`send_window`]: sender's outstanding-segment window
//! - [`reorder`]: receiver's out-of-order interval buffer
//! - [`sender`]: sender engine
//! - [`receiver`]: receiver engine
//! - [`state`]: connection state types
//! - [`connection`]: async drivers and [`ConnError`](connection::ConnError)
//! - [`socket`]: datagram channel trait and UDP socket
//! - [`simulator`]: in-memory lossy network for testing
//! - [`event_log`]: per-segment protocol event log
//! - [`config`]: engine configuration

pub mod checksum;
pub mod config;
pub mod connection;
pub mod event_log;
pub mod receiver;
pub mod reorder;
pub mod rtt;
pub mod segment;
pub mod send_window;
pub mod sender;
pub mod seq;
pub mod simulator;
pub mod socket;
pub mod state;

pub use config::Config;
pub use connection::{run_receiver, run_sender, ConnError};
pub use event_log::EventLog;
pub use receiver::{Receiver, ReceiverStats};
pub use sender::{Sender, SenderStats};
pub use socket::{DatagramChannel, Socket};
