//! Receiver-side state machine.
//!
//! The [`Receiver`] sits between a decoded [`Packet`] and the output sink.
//! For every inbound segment it decides:
//! - whether the payload is new, in-order data to append,
//! - which reply (SYN+ACK or ACK) goes back to the peer,
//! - whether the connection is now finished.
//!
//! Duplicates are the normal case on a lossy channel: a retransmitted data
//! segment whose ACK was lost is acknowledged again but never re-appended,
//! and a retransmitted SYN gets the same SYN+ACK without touching any state.
//!
//! The [`Receiver`] does **not** send or write anything itself; the caller in
//! [`crate::server`] performs the I/O named by the returned [`Verdict`].

use log::debug;

use crate::packet::{flags, Header, Packet};
use crate::state::ReceiverState;

/// What the caller must do with one inbound segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// First SYN from this peer: open the sink, then send the reply.
    Open(Header),
    /// New in-order data: append the payload to the sink, then send the reply.
    Deliver(Header),
    /// Send the reply; nothing else changes.
    Reply(Header),
    /// FIN: flush and close the sink, then send the reply.
    Finish(Header),
    /// Drop the segment silently.
    Ignore,
}

/// Counters reported when a connection ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    /// Payload bytes appended to the sink.
    pub bytes: u64,
    /// Data segments delivered in order.
    pub segments: u64,
    /// Data segments received again and re-acknowledged.
    pub duplicates: u64,
}

/// Receive-side state for one connection.
#[derive(Debug, Default)]
pub struct Receiver {
    state: ReceiverState,
    report: ReceiveReport,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn report(&self) -> ReceiveReport {
        self.report
    }

    /// Feed one inbound segment into the state machine.
    pub fn on_packet(&mut self, packet: &Packet) -> Verdict {
        let h = &packet.header;
        match self.state {
            ReceiverState::Listening if h.is_syn() => {
                self.state = ReceiverState::Established { isn: h.seq };
                Verdict::Open(syn_ack_header(h.seq))
            }
            ReceiverState::Established { isn } if h.is_syn() => {
                if h.seq != isn {
                    // Nothing delivered yet, so the peer may start over.
                    debug!("SYN with new isn={} replaces isn={isn}", h.seq);
                    self.state = ReceiverState::Established { isn: h.seq };
                } else {
                    debug!("duplicate SYN seq={}; answering again", h.seq);
                }
                Verdict::Reply(syn_ack_header(h.seq))
            }
            ReceiverState::Receiving { isn, .. } if h.is_syn() => {
                if h.seq != isn {
                    debug!("dropping SYN seq={} mid-transfer (isn={isn})", h.seq);
                    return Verdict::Ignore;
                }
                debug!("duplicate SYN seq={}; answering again", h.seq);
                Verdict::Reply(syn_ack_header(h.seq))
            }
            ReceiverState::Established { isn } if h.is_data() => {
                self.on_data(isn, isn, h.seq, packet.payload.len())
            }
            ReceiverState::Receiving { isn, expected_seq } if h.is_data() => {
                self.on_data(isn, expected_seq, h.seq, packet.payload.len())
            }
            ReceiverState::Established { .. } | ReceiverState::Receiving { .. }
                if h.is_fin() =>
            {
                self.state = ReceiverState::Closed;
                Verdict::Finish(ack_header(h.seq))
            }
            // Our ACK of the FIN was lost and the peer is retrying.
            ReceiverState::Closed if h.is_fin() => Verdict::Reply(ack_header(h.seq)),
            state => {
                debug!(
                    "dropping seq={} ack={} flags={:#06x} in {state}",
                    h.seq, h.ack, h.flags
                );
                Verdict::Ignore
            }
        }
    }

    fn on_data(&mut self, isn: u16, expected: u16, seq: u16, len: usize) -> Verdict {
        if seq == expected {
            self.state = ReceiverState::Receiving {
                isn,
                expected_seq: expected.wrapping_add(1),
            };
            self.report.segments += 1;
            self.report.bytes += len as u64;
            Verdict::Deliver(ack_header(seq))
        } else {
            self.report.duplicates += 1;
            let last = expected.wrapping_sub(1);
            debug!("out-of-order seq={seq}, expected {expected}; re-ACK {last}");
            Verdict::Reply(ack_header(last))
        }
    }
}

// Replies echo the acknowledged number as their own sequence number, so a
// repeated reply is bit-identical to the first.
pub(crate) fn syn_ack_header(seq: u16) -> Header {
    Header::new(seq, seq, flags::SYN | flags::ACK)
}

pub(crate) fn ack_header(seq: u16) -> Header {
    Header::new(seq, seq, flags::ACK)
}
