//! Datagram admission control.
//!
//! Every received datagram passes through [`verdict`] before any of its
//! fields are trusted.  The checks run in a fixed order: size, checksum,
//! length field, then flag semantics.  Anything malformed is dropped
//! silently — the sender will retransmit — while a lone FIN outside of a
//! teardown we initiated surfaces as [`Verdict::PeerClosed`] so the caller
//! can acknowledge it and tear the session down.
//!
//! Source-address matching is not done here: it needs the socket to send a
//! rejection FIN, so it lives with the I/O in [`crate::connection`].

use crate::packet::{self, flags, Header, PacketError, HEADER_SIZE};

/// What to do with a received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The packet is well formed and matches the expectation; use it.
    Accept,
    /// Malformed or unexpected; discard it without a reply.
    Drop,
    /// The peer is closing (or refusing) the connection.
    PeerClosed,
}

/// Judge a raw datagram against the flags the caller is waiting for.
///
/// `expected` is the exact flag combination the current operation awaits
/// (e.g. `SYN|ACK` during a connect).  Data packets — anything with PSH or
/// LAST set — are admitted regardless of the expectation, because a
/// retransmitted segment may cross an ACK on the wire.
pub fn verdict(datagram: &[u8], expected: u8, connected: bool) -> Verdict {
    let header = match screen(datagram) {
        Ok(header) => header,
        Err(reason) => {
            log::debug!("dropping {}-byte datagram: {reason}", datagram.len());
            return Verdict::Drop;
        }
    };

    // A lone FIN while we are not waiting for one means the peer is tearing
    // down — or, before the handshake completed, refusing us outright.
    if header.flags == flags::FIN
        && expected != flags::FIN
        && expected != (flags::FIN | flags::ACK)
    {
        if !connected {
            if expected == (flags::SYN | flags::ACK) {
                return Verdict::PeerClosed;
            }
            log::debug!("dropping FIN: no active connection");
            return Verdict::Drop;
        }
        return Verdict::PeerClosed;
    }

    if expected != 0
        && header.flags != expected
        && header.flags & (flags::LAST | flags::PSH) == 0
    {
        log::debug!(
            "dropping datagram: flags {:#04x}, expected {:#04x}",
            header.flags,
            expected
        );
        return Verdict::Drop;
    }

    Verdict::Accept
}

/// Checks that do not depend on connection state: size, checksum, length.
fn screen(datagram: &[u8]) -> Result<Header, PacketError> {
    let header = Header::decode(datagram)?;
    if !packet::verify_checksum(datagram) {
        return Err(PacketError::ChecksumFailed);
    }
    if header.len as usize != datagram.len() - HEADER_SIZE {
        return Err(PacketError::LengthMismatch);
    }
    Ok(header)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{encode_control, encode_data, SynPayload};

    fn syn_params() -> SynPayload {
        SynPayload {
            mtu: 1458,
            timeout_ms: 100,
            max_retries: 50,
            debug: 0,
        }
    }

    #[test]
    fn matching_flags_are_accepted() {
        let ack = encode_control(flags::ACK, 7, None);
        assert_eq!(verdict(&ack, flags::ACK, true), Verdict::Accept);

        let syn = encode_control(flags::SYN, 0, Some(&syn_params()));
        assert_eq!(verdict(&syn, flags::SYN, false), Verdict::Accept);
    }

    #[test]
    fn short_datagram_is_dropped() {
        assert_eq!(verdict(&[0u8; 11], flags::ACK, true), Verdict::Drop);
    }

    #[test]
    fn corrupted_checksum_is_dropped() {
        let mut pkt = encode_data(0, b"abc", true).to_vec();
        pkt[HEADER_SIZE] ^= 0x01;
        assert_eq!(verdict(&pkt, flags::PSH, true), Verdict::Drop);
    }

    #[test]
    fn length_field_mismatch_is_dropped() {
        // Hand-craft a packet whose checksum is valid but whose length field
        // claims more payload than the datagram carries.
        let mut pkt = vec![0u8; HEADER_SIZE + 4];
        pkt[5] = 10; // length = 10, actual payload = 4
        pkt[8] = flags::PSH;
        pkt[HEADER_SIZE..].copy_from_slice(b"abcd");
        let sum = packet::checksum(&pkt);
        pkt[6..8].copy_from_slice(&sum.to_be_bytes());
        assert!(packet::verify_checksum(&pkt));
        assert_eq!(verdict(&pkt, flags::PSH, true), Verdict::Drop);
    }

    #[test]
    fn wrong_control_flags_are_dropped() {
        let ack = encode_control(flags::ACK, 0, None);
        assert_eq!(
            verdict(&ack, flags::SYN | flags::ACK, false),
            Verdict::Drop
        );
    }

    #[test]
    fn data_packets_pass_any_expectation() {
        // A retransmitted segment may arrive while an ACK is awaited; PSH and
        // LAST bypass the exact-match rule.
        let seg = encode_data(3, b"late segment", false);
        assert_eq!(verdict(&seg, flags::ACK, true), Verdict::Accept);

        let last = encode_data(4, b"tail", true);
        assert_eq!(verdict(&last, flags::PSH, true), Verdict::Accept);
    }

    #[test]
    fn lone_fin_during_session_reports_peer_closed() {
        let fin = encode_control(flags::FIN, 0, None);
        assert_eq!(verdict(&fin, flags::PSH, true), Verdict::PeerClosed);
        assert_eq!(verdict(&fin, flags::ACK, true), Verdict::PeerClosed);
    }

    #[test]
    fn fin_answering_a_syn_is_a_rejection() {
        let fin = encode_control(flags::FIN, 0, None);
        assert_eq!(
            verdict(&fin, flags::SYN | flags::ACK, false),
            Verdict::PeerClosed
        );
    }

    #[test]
    fn fin_without_a_connection_is_dropped() {
        let fin = encode_control(flags::FIN, 0, None);
        assert_eq!(verdict(&fin, flags::SYN, false), Verdict::Drop);
    }

    #[test]
    fn expected_fin_ack_is_accepted_during_teardown() {
        let fin_ack = encode_control(flags::FIN | flags::ACK, 0, None);
        assert_eq!(
            verdict(&fin_ack, flags::FIN | flags::ACK, true),
            Verdict::Accept
        );
    }
}
