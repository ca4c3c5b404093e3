//! Engine lifecycle states.
//!
//! ```text
//!  sender:    TRANSMITTING ──queue + window empty, FIN sent──▶ CLOSING ──FIN-ACK──▶ CLOSED
//!  receiver:  RECEIVING ──FIN received, FIN-ACK sent──▶ CLOSED
//! ```
//!
//! Transitions are driven by [`crate::sender::Sender`] and
//! [`crate::receiver::Receiver`]; these types only name the states.

/// State of a [`crate::sender::Sender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// Payload is still queued or awaiting acknowledgement.
    #[default]
    Transmitting,
    /// All data acknowledged; FIN sent and awaiting FIN-ACK.
    Closing,
    /// FIN-ACK received.
    Closed,
}

/// State of a [`crate::receiver::Receiver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverState {
    #[default]
    Receiving,
    /// FIN received and answered.
    Closed,
}

impl std::fmt::Display for SenderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Transmitting => "TRANSMITTING",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

impl std::fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Receiving => "RECEIVING",
            Self::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}
