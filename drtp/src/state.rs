//! Finite-state-machine types for both ends of a transfer.
//!
//! Transitions live in [`crate::sender`] and [`crate::receiver`]; this module
//! only defines the states.  Anything a state needs (the outstanding segment,
//! the expected sequence number) is carried inside its variant, so a sender
//! that is "sending" without an outstanding segment cannot be expressed.
//!
//! ```text
//!  sender:   Idle ──SYN──▶ HandshakeSent ──SYN+ACK──▶ Established ◀─┐
//!                                                  │       │        │ ACK(seq)
//!                                            no data       └──DATA──▶ Sending(seq)
//!                                                  ▼
//!                                   Closing ──ACK(fin) / retries out──▶ Closed
//!
//!  receiver: Listening ──SYN──▶ Established ──DATA──▶ Receiving(expected)
//!                                    │                     │
//!                                    └────────FIN──────────┴──▶ Closed
//! ```

use std::fmt;

use crate::packet::Packet;

/// Sender-side states.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SenderState {
    /// Nothing sent yet.
    #[default]
    Idle,
    /// SYN is out; waiting for a SYN+ACK acknowledging its sequence number.
    HandshakeSent { syn: Packet },
    /// Handshake done, no segment outstanding; `next_seq` goes on the next chunk.
    Established { next_seq: u16 },
    /// One data segment is in flight and must be acknowledged before the next.
    Sending { seq: u16, segment: Packet },
    /// FIN is out; waiting for its ACK.
    Closing { fin: Packet },
    Closed,
}

impl SenderState {
    /// The segment awaiting acknowledgment, if any.
    pub fn outstanding(&self) -> Option<&Packet> {
        match self {
            Self::HandshakeSent { syn } => Some(syn),
            Self::Sending { segment, .. } => Some(segment),
            Self::Closing { fin } => Some(fin),
            _ => None,
        }
    }
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::HandshakeSent { .. } => write!(f, "HandshakeSent"),
            Self::Established { next_seq } => write!(f, "Established(next={next_seq})"),
            Self::Sending { seq, .. } => write!(f, "Sending({seq})"),
            Self::Closing { .. } => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Receiver-side states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverState {
    /// Waiting for a SYN.
    #[default]
    Listening,
    /// SYN answered; the first data segment must carry `isn`.
    Established { isn: u16 },
    /// At least one segment delivered; `expected_seq` is the next in order.
    Receiving { isn: u16, expected_seq: u16 },
    Closed,
}

impl fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listening => write!(f, "Listening"),
            Self::Established { isn } => write!(f, "Established(isn={isn})"),
            Self::Receiving { expected_seq, .. } => write!(f, "Receiving({expected_seq})"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}
