//! `drtp`: a stop-and-wait reliable data-transfer protocol over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐   DATA(seq) / SYN / FIN   ┌──────────────┐
//!  │ Connection │──────────────────────────▶│    Server    │
//!  │  (Sender)  │◀──────────────────────────│ (Receiver ×N)│
//!  └─────┬──────┘     ACK(seq) / SYN+ACK    └──────┬───────┘
//!        │                                         │
//!  ┌─────▼─────────────────────────────────────────▼───────┐
//!  │     Channel: Socket (UDP) or Simulator (faults)       │
//!  └───────────────────────────────────────────────────────┘
//! ```
//!
//! Exactly one segment is outstanding at a time.  The sender retransmits it
//! unchanged on every timeout; the receiver appends each sequence number
//! once and re-acknowledges duplicates, so the bytes written on the
//! receiving side equal the bytes read on the sending side.
//!
//! Each module has a single responsibility:
//! - [`packet`]    : 6-byte header codec and segment wire format
//! - [`state`]     : finite-state-machine types for both ends
//! - [`sender`]    : sender-side stop-and-wait transitions
//! - [`receiver`]  : receiver-side transitions and duplicate suppression
//! - [`timer`]     : retransmission deadline and retry budget
//! - [`socket`]    : datagram channel trait and its UDP implementation
//! - [`simulator`] : lossy / duplicating / reordering channel for testing
//! - [`connection`]: sending engine (handshake, data loop, teardown)
//! - [`server`]    : receiving engine, one task per connection
//! - [`config`]    : timeouts and retry limits
//! - [`error`]     : fatal error taxonomy

pub mod config;
pub mod connection;
pub mod error;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::Config;
pub use connection::{transfer, Connection, TransferReport};
pub use error::{DrtpError, Result};
pub use packet::{decode_header, encode_header, Header, Packet, PacketError, MAX_PAYLOAD};
pub use receiver::ReceiveReport;
pub use server::Server;
pub use socket::{Channel, Socket};
