//! Engine configuration.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::rtt::DEFAULT_INITIAL_TIMEOUT;
use crate::segment::MAX_PAYLOAD;

/// Default number of segments a sender may have in flight.
pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// How long a closed receiver keeps answering repeated FINs.
pub const DEFAULT_FIN_LINGER: Duration = Duration::from_secs(3);

/// Upper bound for any configured or computed timer interval.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// In-flight bytes must stay below half the sequence space for wrap-around
/// comparisons to order the window.
const MAX_IN_FLIGHT: usize = 1 << 31;

/// Settings shared by the sender and receiver engines.
#[derive(Debug, Clone)]
pub struct Config {
    /// Largest payload per segment (at most [`MAX_PAYLOAD`]).
    pub max_payload: usize,
    /// Sender window size `W`, in segments.
    pub window_size: usize,
    /// `TimeoutInterval` before the first RTT sample.
    pub initial_timeout: Duration,
    /// Receiver only: quiet period after FIN before the socket is released.
    pub fin_linger: Duration,
    /// First sequence number of the stream, agreed out of band by both ends.
    pub initial_seq: u32,
    /// This engine's address; its port goes into outgoing headers.
    pub local: SocketAddr,
    /// The peer's address.
    pub peer: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_payload: MAX_PAYLOAD,
            window_size: DEFAULT_WINDOW_SIZE,
            initial_timeout: DEFAULT_INITIAL_TIMEOUT,
            fin_linger: DEFAULT_FIN_LINGER,
            initial_seq: 0,
            local: SocketAddr::from(([127, 0, 0, 1], 41191)),
            peer: SocketAddr::from(([127, 0, 0, 1], 41192)),
        }
    }
}

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("window size must be at least 1")]
    ZeroWindow,
    #[error("max payload {0} is outside 1..={MAX_PAYLOAD}")]
    PayloadSize(usize),
    #[error("initial timeout must be nonzero")]
    ZeroTimeout,
    #[error("window of {window} x {max_payload}-byte segments reaches 2^31 bytes in flight")]
    WindowTooLarge { window: usize, max_payload: usize },
    #[error("initial timeout {0:?} exceeds {MAX_TIMEOUT:?}")]
    TimeoutTooLarge(Duration),
    #[error("FIN linger {0:?} exceeds {MAX_TIMEOUT:?}")]
    LingerTooLarge(Duration),
}

impl Config {
    /// A config for the given endpoints with every other field defaulted.
    pub fn new(local: SocketAddr, peer: SocketAddr) -> Self {
        Self {
            local,
            peer,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.max_payload == 0 || self.max_payload > MAX_PAYLOAD {
            return Err(ConfigError::PayloadSize(self.max_payload));
        }
        match self.window_size.checked_mul(self.max_payload) {
            Some(bytes) if bytes < MAX_IN_FLIGHT => {}
            _ => {
                return Err(ConfigError::WindowTooLarge {
                    window: self.window_size,
                    max_payload: self.max_payload,
                })
            }
        }
        if self.initial_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.initial_timeout > MAX_TIMEOUT {
            return Err(ConfigError::TimeoutTooLarge(self.initial_timeout));
        }
        if self.fin_linger > MAX_TIMEOUT {
            return Err(ConfigError::LingerTooLarge(self.fin_linger));
        }
        Ok(())
    }

    /// Host part of `local`, as written to the event log.
    pub(crate) fn local_host(&self) -> String {
        self.local.ip().to_string()
    }

    /// Host part of `peer`, as written to the event log.
    pub(crate) fn peer_host(&self) -> String {
        self.peer.ip().to_string()
    }
}
