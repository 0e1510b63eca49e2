//! Wire-format definitions for DRTP segments.
//!
//! Every datagram exchanged between peers is a [`Packet`]: a fixed 6-byte
//! [`Header`] followed by an opaque payload.  This module is responsible for:
//! - Defining the on-wire binary layout (sequence, acknowledgment, flags).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], rejecting input
//!   too short to carry a header.
//!
//! No I/O happens here; this is pure data transformation.  Flag combinations
//! are never validated; interpreting them is the engines' job.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Sequence Number        |     Acknowledgment Number     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |             Flags             |          Payload ...          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 6 bytes.  A datagram never exceeds
//! [`MAX_DATAGRAM`] bytes, so a payload carries at most [`MAX_PAYLOAD`].

use thiserror::Error;

/// Bit-flag constants for the `flags` header field.
///
/// Bits 3–15 are reserved: never set on send, carried through unchanged on
/// decode.
pub mod flags {
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u16 = 0b0000_0001;
    /// Acknowledgment field is valid.
    pub const ACK: u16 = 0b0000_0010;
    /// Finish: the sender has no more data to send.
    pub const FIN: u16 = 0b0000_0100;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 6;

/// Largest datagram either side sends or expects to receive.
pub const MAX_DATAGRAM: usize = 1024;

/// Largest payload a single segment may carry.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_LEN;

const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 2;
const OFF_FLAGS: usize = 4;

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("malformed header: {len} byte(s) received, {HEADER_LEN} required")]
    MalformedHeader { len: usize },
}

/// Fixed-size protocol header, fields in host byte order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Header {
    /// Sequence number of this segment (wraps modulo 2^16).
    pub seq: u16,
    /// Sequence number being acknowledged.
    pub ack: u16,
    /// Bitmask of [`flags`] constants plus any reserved bits seen on the wire.
    pub flags: u16,
}

impl Header {
    pub fn new(seq: u16, ack: u16, flags: u16) -> Self {
        Self { seq, ack, flags }
    }

    /// Serialise into the 6-byte wire representation.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[OFF_SEQ..OFF_SEQ + 2].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 2].copy_from_slice(&self.ack.to_be_bytes());
        buf[OFF_FLAGS..OFF_FLAGS + 2].copy_from_slice(&self.flags.to_be_bytes());
        buf
    }

    /// Parse the leading 6 bytes of `buf`; anything after them is ignored.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::MalformedHeader { len: buf.len() });
        }
        let field = |off: usize| u16::from_be_bytes([buf[off], buf[off + 1]]);
        Ok(Self {
            seq: field(OFF_SEQ),
            ack: field(OFF_ACK),
            flags: field(OFF_FLAGS),
        })
    }

    /// `true` if every bit of `mask` is set.
    pub fn has(&self, mask: u16) -> bool {
        self.flags & mask == mask
    }

    /// A handshake initiation: SYN without ACK.
    pub fn is_syn(&self) -> bool {
        self.has(flags::SYN) && !self.has(flags::ACK)
    }

    /// A handshake reply: SYN and ACK together.
    pub fn is_syn_ack(&self) -> bool {
        self.has(flags::SYN | flags::ACK)
    }

    /// A plain acknowledgment: ACK without SYN or FIN.
    pub fn is_ack(&self) -> bool {
        self.has(flags::ACK) && self.flags & (flags::SYN | flags::FIN) == 0
    }

    pub fn is_fin(&self) -> bool {
        self.has(flags::FIN)
    }

    /// A data segment carries none of the defined control flags.
    pub fn is_data(&self) -> bool {
        self.flags & (flags::SYN | flags::ACK | flags::FIN) == 0
    }
}

/// Pack three header fields into network byte order.
pub fn encode_header(seq: u16, ack: u16, flags: u16) -> [u8; HEADER_LEN] {
    Header::new(seq, ack, flags).encode()
}

/// Unpack `(seq, ack, flags)` from the first 6 bytes of `buf`.
pub fn decode_header(buf: &[u8]) -> Result<(u16, u16, u16), PacketError> {
    let h = Header::decode(buf)?;
    Ok((h.seq, h.ack, h.flags))
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// A payload-less control segment (SYN, ACK, FIN and combinations).
    pub fn control(seq: u16, ack: u16, flags: u16) -> Self {
        Self {
            header: Header::new(seq, ack, flags),
            payload: Vec::new(),
        }
    }

    /// A data segment; no flag bits are set.
    pub fn data(seq: u16, payload: Vec<u8>) -> Self {
        Self {
            header: Header::new(seq, 0, 0),
            payload,
        }
    }

    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Packet`]; every byte after the header is payload.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        let header = Header::decode(buf)?;
        Ok(Self {
            header,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}
