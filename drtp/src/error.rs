//! Errors surfaced by the transfer engines.
//!
//! Malformed, duplicate and out-of-order segments are expected on an
//! unreliable channel and never show up here; they are dropped or answered
//! where they arrive.  Everything in [`DrtpError`] ends the connection.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::packet::MAX_PAYLOAD;

#[derive(Debug, Error)]
pub enum DrtpError {
    /// No SYN+ACK arrived within the retry budget.
    #[error("handshake failed: no SYN+ACK after {retries} retransmission(s)")]
    HandshakeFailed { retries: u32 },

    /// A data segment was never acknowledged.
    ///
    /// Whatever the receiver flushed before this point stays in its sink;
    /// there is no rollback of a partially written file.
    #[error("transfer timed out: segment seq={seq} unacknowledged after {retries} retransmission(s)")]
    TransferTimedOut { seq: u16, retries: u32 },

    /// The datagram transport itself failed.  Never retried.
    #[error("channel error: {0}")]
    Channel(#[source] io::Error),

    /// The byte source or sink failed.
    #[error("stream error: {0}")]
    Stream(#[source] io::Error),

    #[error("payload of {len} bytes exceeds the {MAX_PAYLOAD}-byte segment limit")]
    PayloadTooLarge { len: usize },

    /// An engine operation was called in a state that does not allow it.
    #[error("cannot {op} while {state}")]
    BadState { op: &'static str, state: String },

    /// The peer stopped sending mid-connection.
    #[error("peer {peer} idle for {idle:?}")]
    PeerIdle { peer: SocketAddr, idle: Duration },

    /// Shutdown was requested while the connection was still active.
    #[error("connection cancelled by shutdown")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, DrtpError>;
