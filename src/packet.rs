//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers starts with a fixed 12-byte
//! [`Header`].  This module is responsible for:
//! - Defining the on-wire binary layout (header fields, flags, the
//!   connection-parameter payload carried by SYN packets).
//! - Serialising packets into byte buffers ready for transmission.
//! - The 16-bit one's-complement checksum covering the whole packet.
//!
//! No I/O happens here — this is pure data transformation.  Deciding whether
//! a received datagram is admissible lives in [`crate::validator`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Size of the fixed header in bytes (including the 3 reserved bytes).
pub const HEADER_SIZE: usize = 12;

/// Size of the connection-parameter payload carried by SYN packets.
pub const SYN_PAYLOAD_SIZE: usize = 8;

/// Byte offset of the checksum field within the header.
const CHECKSUM_OFFSET: usize = 6;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Synchronise — a connection is being established.
    pub const SYN: u8 = 0x01;
    /// Acknowledgement of a data or control packet.
    pub const ACK: u8 = 0x02;
    /// The packet carries application data.
    pub const PSH: u8 = 0x04;
    /// Final segment of the current message.
    pub const LAST: u8 = 0x08;
    /// The connection is closing.
    pub const FIN: u8 = 0x10;
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("datagram shorter than the fixed header")]
    BufferTooShort,
    /// The `length` field does not match the actual payload size.
    #[error("length field does not match the payload size")]
    LengthMismatch,
    /// Checksum did not match the recomputed value.
    #[error("checksum mismatch")]
    ChecksumFailed,
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Fixed-size protocol header.
///
/// All multi-byte fields are big-endian on the wire.  The three reserved
/// bytes after `flags` are transmitted as zero and ignored on receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Segment index within the current message, starting at 0.
    pub seq: u32,
    /// Payload bytes following the header (the header itself is excluded).
    pub len: u16,
    /// One's-complement checksum over the entire packet, computed with this
    /// field zeroed.
    pub checksum: u16,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
}

impl Header {
    /// Parse a [`Header`] from the front of a raw datagram.
    pub fn decode(datagram: &[u8]) -> Result<Self, PacketError> {
        if datagram.len() < HEADER_SIZE {
            return Err(PacketError::BufferTooShort);
        }
        let mut buf = &datagram[..HEADER_SIZE];
        let seq = buf.get_u32();
        let len = buf.get_u16();
        let checksum = buf.get_u16();
        let flags = buf.get_u8();
        Ok(Self {
            seq,
            len,
            checksum,
            flags,
        })
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32(self.seq);
        buf.put_u16(self.len);
        buf.put_u16(self.checksum);
        buf.put_u8(self.flags);
        buf.put_bytes(0, 3); // reserved, must be zero on the wire
    }
}

// ---------------------------------------------------------------------------
// SYN payload
// ---------------------------------------------------------------------------

/// Connection parameters advertised during the handshake.
///
/// Carried as the payload of every packet with the SYN flag set; each field
/// is a big-endian `u16`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynPayload {
    pub mtu: u16,
    pub timeout_ms: u16,
    pub max_retries: u16,
    /// 0 or 1; whether the sender runs with verbose accounting enabled.
    pub debug: u16,
}

impl SynPayload {
    /// Parse the connection parameters from a SYN packet's payload.
    pub fn decode(payload: &[u8]) -> Result<Self, PacketError> {
        if payload.len() < SYN_PAYLOAD_SIZE {
            return Err(PacketError::BufferTooShort);
        }
        let mut buf = &payload[..SYN_PAYLOAD_SIZE];
        Ok(Self {
            mtu: buf.get_u16(),
            timeout_ms: buf.get_u16(),
            max_retries: buf.get_u16(),
            debug: buf.get_u16(),
        })
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u16(self.mtu);
        buf.put_u16(self.timeout_ms);
        buf.put_u16(self.max_retries);
        buf.put_u16(self.debug);
    }
}

// ---------------------------------------------------------------------------
// Packet builders
// ---------------------------------------------------------------------------

/// Build a control packet (SYN, SYN|ACK, ACK, FIN, FIN|ACK).
///
/// When the SYN flag is set the connection parameters are appended and the
/// `length` field covers them; all other control packets are header-only.
pub fn encode_control(packet_flags: u8, seq: u32, syn: Option<&SynPayload>) -> Bytes {
    let payload_len = if syn.is_some() { SYN_PAYLOAD_SIZE } else { 0 };
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload_len);
    Header {
        seq,
        len: payload_len as u16,
        checksum: 0,
        flags: packet_flags,
    }
    .encode_into(&mut buf);
    if let Some(params) = syn {
        params.encode_into(&mut buf);
    }
    finalize(buf)
}

/// Build a data segment: PSH, or PSH|LAST for the final segment of a message.
pub fn encode_data(seq: u32, payload: &[u8], last: bool) -> Bytes {
    let packet_flags = if last {
        flags::PSH | flags::LAST
    } else {
        flags::PSH
    };
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    Header {
        seq,
        len: payload.len() as u16,
        checksum: 0,
        flags: packet_flags,
    }
    .encode_into(&mut buf);
    buf.put_slice(payload);
    finalize(buf)
}

/// Compute the checksum over the assembled packet and patch it in.
fn finalize(mut buf: BytesMut) -> Bytes {
    let sum = checksum(&buf);
    buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&sum.to_be_bytes());
    buf.freeze()
}

// ---------------------------------------------------------------------------
// Checksum
// ---------------------------------------------------------------------------

/// 16-bit one's-complement checksum over `data`.
///
/// Successive 16-bit words are summed; an odd trailing byte contributes as
/// the low byte of a final word.  Carries are folded back until none remain
/// and the complement of the sum is returned.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u16::from_le_bytes([word[0], word[1]]) as u32;
    }
    if let [tail] = words.remainder() {
        sum += *tail as u32;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// Recompute the checksum of a received datagram (with the checksum field
/// zeroed) and compare it against the stored value.
pub fn verify_checksum(datagram: &[u8]) -> bool {
    if datagram.len() < HEADER_SIZE {
        return false;
    }
    let stored = u16::from_be_bytes([datagram[CHECKSUM_OFFSET], datagram[CHECKSUM_OFFSET + 1]]);
    let mut scratch = datagram.to_vec();
    scratch[CHECKSUM_OFFSET] = 0;
    scratch[CHECKSUM_OFFSET + 1] = 0;
    stored == checksum(&scratch)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
