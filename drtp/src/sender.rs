//! Sender-side stop-and-wait state machine.
//!
//! [`Sender`] decides what goes on the wire and how replies move it through
//! [`SenderState`].  It does **not** touch the socket or the clock;
//! [`crate::connection::Connection`] calls these methods and owns the actual
//! send / wait / retransmit loop.
//!
//! # Stop-and-wait contract
//! - At most **one** segment is outstanding at any moment.
//! - A new chunk may only be sent from `Established`.
//! - On the matching ACK: advance the sequence number (mod 2^16).
//! - On any other reply: ignore it, no resend, no state change.
//! - On timeout: resend the same packet unchanged until the budget runs out.

use log::{debug, warn};

use crate::error::{DrtpError, Result};
use crate::packet::{flags, Header, Packet, MAX_PAYLOAD};
use crate::state::SenderState;
use crate::timer::RetryBudget;

/// What an inbound header did to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Stale, duplicate or unrelated; nothing changed.
    Ignored,
    /// SYN+ACK accepted; the sender is `Established`.
    Handshaken,
    /// The outstanding data segment `seq` was acknowledged.
    Acked { seq: u16 },
    /// The FIN was acknowledged; the sender is `Closed`.
    FinAcked,
}

/// Stop-and-wait send-side state for one connection.
#[derive(Debug)]
pub struct Sender {
    state: SenderState,
    isn: u16,
    budget: RetryBudget,
    retransmissions: u64,
}

impl Sender {
    /// `isn` numbers both the SYN and the first data segment.
    pub fn new(isn: u16, max_retries: u32) -> Self {
        Self {
            state: SenderState::Idle,
            isn,
            budget: RetryBudget::new(max_retries),
            retransmissions: 0,
        }
    }

    pub fn state(&self) -> &SenderState {
        &self.state
    }

    /// Retransmissions spent on the segment currently outstanding.
    pub fn retries(&self) -> u32 {
        self.budget.used()
    }

    /// Retransmissions over the whole connection.
    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    /// `Idle → HandshakeSent`.  Returns the SYN to transmit.
    pub fn open(&mut self) -> Result<Packet> {
        if self.state != SenderState::Idle {
            return Err(self.bad_state("open"));
        }
        let syn = Packet::control(self.isn, 0, flags::SYN);
        self.state = SenderState::HandshakeSent { syn: syn.clone() };
        self.budget.reset();
        Ok(syn)
    }

    /// `Established → Sending(seq)`.  Returns the data segment to transmit.
    pub fn send_chunk(&mut self, chunk: Vec<u8>) -> Result<Packet> {
        if chunk.len() > MAX_PAYLOAD {
            return Err(DrtpError::PayloadTooLarge { len: chunk.len() });
        }
        let SenderState::Established { next_seq } = self.state else {
            return Err(self.bad_state("send a chunk"));
        };
        let segment = Packet::data(next_seq, chunk);
        self.state = SenderState::Sending {
            seq: next_seq,
            segment: segment.clone(),
        };
        self.budget.reset();
        Ok(segment)
    }

    /// `Established → Closing`.  Returns the FIN to transmit.
    pub fn finish(&mut self) -> Result<Packet> {
        let SenderState::Established { next_seq } = self.state else {
            return Err(self.bad_state("close"));
        };
        let fin = Packet::control(next_seq, 0, flags::FIN);
        self.state = SenderState::Closing { fin: fin.clone() };
        self.budget.reset();
        Ok(fin)
    }

    /// Feed one decoded reply header into the state machine.
    pub fn on_segment(&mut self, header: &Header) -> AckOutcome {
        match &self.state {
            SenderState::HandshakeSent { syn }
                if header.is_syn_ack() && header.ack == syn.header.seq =>
            {
                let next_seq = syn.header.seq;
                self.state = SenderState::Established { next_seq };
                AckOutcome::Handshaken
            }
            SenderState::Sending { seq, .. } if header.is_ack() && header.ack == *seq => {
                let seq = *seq;
                self.state = SenderState::Established {
                    next_seq: seq.wrapping_add(1),
                };
                AckOutcome::Acked { seq }
            }
            SenderState::Closing { fin } if header.is_ack() && header.ack == fin.header.seq => {
                self.state = SenderState::Closed;
                AckOutcome::FinAcked
            }
            state => {
                debug!(
                    "ignoring seq={} ack={} flags={:#06x} in {state}",
                    header.seq, header.ack, header.flags
                );
                AckOutcome::Ignored
            }
        }
    }

    /// The retransmission timer fired.
    ///
    /// Returns the outstanding packet, bit-identical to its first
    /// transmission, while the retry budget lasts.  Once it is exhausted:
    /// the handshake fails with [`DrtpError::HandshakeFailed`], a data
    /// segment with [`DrtpError::TransferTimedOut`], and a FIN closes the
    /// sender anyway, returning `Ok(None)`, since every byte was already
    /// acknowledged.
    pub fn on_timeout(&mut self) -> Result<Option<Packet>> {
        let Some(packet) = self.state.outstanding().cloned() else {
            return Err(self.bad_state("retransmit"));
        };

        if self.budget.try_spend() {
            self.retransmissions += 1;
            return Ok(Some(packet));
        }

        let retries = self.budget.used();
        let state = std::mem::replace(&mut self.state, SenderState::Closed);
        match state {
            SenderState::HandshakeSent { .. } => Err(DrtpError::HandshakeFailed { retries }),
            SenderState::Sending { seq, .. } => Err(DrtpError::TransferTimedOut { seq, retries }),
            _ => {
                warn!("FIN unacknowledged after {retries} retransmission(s); closing anyway");
                Ok(None)
            }
        }
    }

    fn bad_state(&self, op: &'static str) -> DrtpError {
        DrtpError::BadState {
            op,
            state: self.state.to_string(),
        }
    }
}
