//! Per-connection lifecycle and data plane.
//!
//! A [`Connection`] owns the complete state for one endpoint: its role, the
//! UDP socket, the configured parameters, and — while a session is active —
//! the peer's address and advertised MTU.  Its responsibilities are:
//! - The handshake (`SYN` / `SYN|ACK`, carrying connection parameters) and
//!   the teardown (`FIN` / `FIN|ACK`), both with bounded retries.
//! - The stop-and-wait data plane: one segment in flight, retransmitted
//!   until its ACK arrives, via [`crate::sender::Segmenter`] on the way out
//!   and [`crate::receiver::Reassembler`] on the way in.
//! - Source validation: during a session, datagrams from anyone but the
//!   connected peer are answered with a lone FIN and otherwise ignored.
//!
//! A connection is not shareable: every operation takes `&mut self` and
//! runs to completion on the calling task.  Peers must alternate send and
//! receive — both sides transmitting simultaneously will starve each other
//! of ACKs until their retry budgets run out.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

use crate::config::{Config, ConfigError, MIN_MTU, MIN_TIMEOUT_MS};
use crate::packet::{self, flags, Header, PacketError, SynPayload, HEADER_SIZE};
use crate::receiver::{Reassembler, Step};
use crate::sender::Segmenter;
use crate::socket::Socket;
use crate::validator::{self, Verdict};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by connection operations.
///
/// A peer closing the connection mid-operation is *not* an error: `send`
/// and `recv` return `Ok(0)` for it, mirroring stream-socket EOF.
#[derive(Debug, Error)]
pub enum ConnError {
    /// The operation is not valid for this endpoint's role or state.
    #[error("{0}")]
    BadState(&'static str),
    /// A configured value was out of bounds.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The handshake got no usable reply within the retry budget.
    #[error("handshake failed: no valid reply from the peer")]
    HandshakeFailed,
    /// The peer answered our connection request with a FIN.
    #[error("connection rejected by the peer")]
    Rejected,
    /// A data-plane wait ran out of retries.
    #[error("no acknowledgement after {0} attempts")]
    MaxRetriesExceeded(u16),
    /// The message would need more segments than sequence numbers exist.
    #[error("message requires more segments than the sequence space allows")]
    MessageTooLarge,
    /// A validated packet failed to parse; indicates a bug, not a bad peer.
    #[error(transparent)]
    Packet(#[from] PacketError),
    /// The underlying socket failed.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Which side of the association this endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Binds a known port and waits for a peer.
    Server,
    /// Dials a server from an ephemeral port.
    Client,
}

/// Outcome of one wait for a datagram from the (prospective) peer.
enum Inbound {
    /// A validated packet and the address it came from.
    Packet(Vec<u8>, SocketAddr),
    /// The deadline passed without a usable datagram.
    TimedOut,
    /// A malformed or unexpected datagram was consumed; carries its wire
    /// size for overhead accounting.
    Dropped(usize),
    /// The peer tore the connection down (already acknowledged and the
    /// session state already cleared).
    PeerClosed,
}

/// A reliable, in-order, bidirectional message endpoint over UDP.
#[derive(Debug)]
pub struct Connection {
    role: Role,
    socket: Socket,
    config: Config,
    connected: bool,
    /// Peer address; only meaningful while a session is active (during a
    /// client's handshake it holds the dialed address).
    peer: Option<SocketAddr>,
    /// MTU advertised by the peer in the handshake; 0 while disconnected.
    peer_mtu: u16,
}

impl Connection {
    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    /// Create a server endpoint bound to `0.0.0.0:port` (with
    /// `SO_REUSEADDR`).  Pass port 0 to let the OS pick one.
    pub fn server(port: u16, config: Config) -> Result<Self, ConnError> {
        config.validate()?;
        Ok(Self {
            role: Role::Server,
            socket: Socket::bind_listener(port)?,
            config,
            connected: false,
            peer: None,
            peer_mtu: 0,
        })
    }

    /// Create a client endpoint on an OS-assigned ephemeral port.
    pub fn client(config: Config) -> Result<Self, ConnError> {
        config.validate()?;
        Ok(Self {
            role: Role::Client,
            socket: Socket::bind_ephemeral()?,
            config,
            connected: false,
            peer: None,
            peer_mtu: 0,
        })
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Dial `ip:port`: send SYN until a SYN|ACK arrives, adopting the
    /// peer's advertised MTU on success.
    ///
    /// Fails with [`ConnError::Rejected`] when the server answers with a
    /// FIN, and with [`ConnError::HandshakeFailed`] when the retry budget
    /// runs out.
    pub async fn connect(&mut self, ip: Ipv4Addr, port: u16) -> Result<(), ConnError> {
        if self.role != Role::Client {
            return Err(ConnError::BadState(
                "server endpoints accept connections; use accept()",
            ));
        }
        if self.connected {
            return Err(ConnError::BadState(
                "already connected; disconnect() first",
            ));
        }

        self.peer = Some(SocketAddr::from((ip, port)));
        let max = self.config.max_retries;

        for attempt in 1..=max {
            self.send_control(flags::SYN, 0).await?;

            match self
                .await_packet(flags::SYN | flags::ACK, Some(self.timeout()))
                .await?
            {
                Inbound::TimedOut => {
                    log::debug!("connect: no reply from {ip}:{port} ({attempt}/{max})");
                }
                Inbound::Dropped(_) => {
                    log::debug!("connect: retrying ({attempt}/{max})");
                }
                Inbound::PeerClosed => {
                    self.peer = None;
                    return Err(ConnError::Rejected);
                }
                Inbound::Packet(pkt, _) => {
                    match SynPayload::decode(&pkt[HEADER_SIZE..]) {
                        Ok(params) if params.mtu >= MIN_MTU => {
                            self.peer_mtu = params.mtu;
                            self.connected = true;
                            log::info!("connection established with {ip}:{port}");
                            return Ok(());
                        }
                        _ => log::debug!("connect: malformed handshake reply ({attempt}/{max})"),
                    }
                }
            }
        }

        self.peer = None;
        log::warn!("failed to connect to {ip}:{port} after {max} attempts");
        Err(ConnError::HandshakeFailed)
    }

    /// Wait (indefinitely) for a peer's SYN, reply with SYN|ACK, and adopt
    /// the peer as the single remote of this endpoint.
    pub async fn accept(&mut self) -> Result<(), ConnError> {
        if self.role != Role::Server {
            return Err(ConnError::BadState(
                "client endpoints dial out; use connect()",
            ));
        }
        if self.connected {
            return Err(ConnError::BadState(
                "already connected; disconnect() first",
            ));
        }

        loop {
            match self.await_packet(flags::SYN, None).await? {
                Inbound::TimedOut | Inbound::Dropped(_) => continue,
                Inbound::PeerClosed => return Err(ConnError::HandshakeFailed),
                Inbound::Packet(pkt, from) => match SynPayload::decode(&pkt[HEADER_SIZE..]) {
                    Ok(params) if params.mtu >= MIN_MTU => {
                        self.peer = Some(from);
                        self.peer_mtu = params.mtu;
                        self.send_control(flags::SYN | flags::ACK, 0).await?;
                        self.connected = true;
                        log::info!("connection established with {from}");
                        return Ok(());
                    }
                    _ => {
                        log::debug!("accept: malformed connection request from {from}");
                        continue;
                    }
                },
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Close the session: send FIN until a FIN|ACK arrives.
    ///
    /// Running out of retries is *not* an error here — the peer is assumed
    /// gone and the endpoint still transitions to disconnected, so the
    /// call only fails on socket errors or when already disconnected.
    pub async fn disconnect(&mut self) -> Result<(), ConnError> {
        if !self.connected {
            return Err(ConnError::BadState("no active connection to close"));
        }

        let peer = self.peer;
        let max = self.config.max_retries;
        let mut acknowledged = false;

        for attempt in 1..=max {
            self.send_control(flags::FIN, 0).await?;

            match self
                .await_packet(flags::FIN | flags::ACK, Some(self.timeout()))
                .await?
            {
                Inbound::TimedOut | Inbound::Dropped(_) => {
                    log::debug!("disconnect: retrying ({attempt}/{max})");
                }
                // Either a FIN|ACK, or the peer is tearing down on its own.
                Inbound::Packet(..) | Inbound::PeerClosed => {
                    acknowledged = true;
                    break;
                }
            }
        }

        if acknowledged {
            if let Some(peer) = peer {
                log::info!("connection closed with {peer}");
            }
        } else {
            log::warn!("teardown not acknowledged after {max} attempts; assuming the peer is gone");
        }

        self.reset_session();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Data plane
    // -----------------------------------------------------------------------

    /// Deliver `data` to the peer as one message.
    ///
    /// The message is sliced into segments of the negotiated capacity and
    /// transmitted stop-and-wait: each segment is retransmitted until its
    /// ACK arrives or the retry budget is spent.  Returns the number of
    /// payload bytes delivered, or `Ok(0)` when the peer closed the
    /// connection mid-transfer.
    pub async fn send(&mut self, data: &[u8]) -> Result<usize, ConnError> {
        if !self.connected {
            return Err(ConnError::BadState("no active connection to send on"));
        }

        let max = self.config.max_retries;
        let segments =
            Segmenter::new(data, self.segment_capacity()).ok_or(ConnError::MessageTooLarge)?;
        let segment_count = segments.clone().count();

        let mut sent = 0usize;
        let mut prev_ack: Option<u32> = None;
        let mut wire_bytes = 0usize;
        let mut wire_packets = 0u32;
        let mut retransmissions = 0u32;

        for segment in segments {
            let pkt = packet::encode_data(segment.seq, segment.payload, segment.last);
            let peer = self.peer.ok_or(ConnError::BadState("peer address missing"))?;
            let mut attempts = 0u16;

            loop {
                if attempts == max {
                    return Err(ConnError::MaxRetriesExceeded(max));
                }
                if attempts > 0 {
                    retransmissions += 1;
                }

                self.socket.send_to(&pkt, peer).await?;
                wire_bytes += pkt.len();
                wire_packets += 1;

                match self.await_packet(flags::ACK, Some(self.timeout())).await? {
                    Inbound::TimedOut => {
                        attempts += 1;
                        log::debug!(
                            "send: no ACK for segment {} ({attempts}/{max})",
                            segment.seq
                        );
                    }
                    Inbound::Dropped(_) => attempts += 1,
                    Inbound::PeerClosed => return Ok(0),
                    Inbound::Packet(ack, _) => {
                        let acked = Header::decode(&ack)?.seq;
                        if prev_ack == Some(acked) && !segment.last {
                            // Duplicate ACK: a spurious retransmission already
                            // covered this segment; move on.
                            log::debug!("send: duplicate ACK {acked}, advancing");
                            break;
                        }
                        if acked < segment.seq {
                            attempts += 1;
                            log::debug!(
                                "send: stale ACK {acked} for segment {} ({attempts}/{max})",
                                segment.seq
                            );
                            continue;
                        }
                        prev_ack = Some(acked);
                        break;
                    }
                }
            }

            sent += segment.payload.len();
        }

        if self.config.debug {
            log::debug!(
                "sent {sent} bytes over {segment_count} segments; \
                 wire: {wire_bytes} bytes over {wire_packets} packets, \
                 {retransmissions} retransmissions"
            );
        }
        Ok(sent)
    }

    /// Receive one message from the peer into `buf`.
    ///
    /// Blocks until the first segment arrives, then collects segments until
    /// the one flagged LAST.  Returns the number of bytes the peer sent —
    /// which can exceed `buf.len()`, in which case the excess was discarded
    /// and the caller can detect the truncation — or `Ok(0)` when the peer
    /// closed the connection.
    pub async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, ConnError> {
        if !self.connected {
            return Err(ConnError::BadState("no active connection to receive on"));
        }

        let max = self.config.max_retries;
        let mut reassembler = Reassembler::new(self.segment_capacity());
        let mut first = true;
        let mut wire_bytes = 0usize;
        let mut wire_packets = 0u32;
        let mut segment_count = 0u32;
        let mut duplicates = 0u32;

        loop {
            // The first segment may take arbitrarily long (the peer decides
            // when to talk); afterwards the usual per-round-trip deadline
            // applies between segments.
            let wait = if first { None } else { Some(self.timeout()) };
            let mut attempts = 0u16;

            let pkt = loop {
                if attempts == max {
                    return Err(ConnError::MaxRetriesExceeded(max));
                }
                match self.await_packet(flags::PSH, wait).await? {
                    Inbound::TimedOut => {
                        attempts += 1;
                        log::debug!("recv: no segment within the deadline ({attempts}/{max})");
                    }
                    Inbound::Dropped(n) => {
                        wire_bytes += n;
                        wire_packets += 1;
                        attempts += 1;
                    }
                    Inbound::PeerClosed => return Ok(0),
                    Inbound::Packet(pkt, _) => break pkt,
                }
            };
            first = false;
            wire_bytes += pkt.len();
            wire_packets += 1;

            let header = Header::decode(&pkt)?;
            let payload = &pkt[HEADER_SIZE..];

            match reassembler.apply(&header, payload, buf) {
                Step::Duplicate => {
                    duplicates += 1;
                    log::debug!("recv: duplicate segment {}, re-acknowledging", header.seq);
                    self.send_control(flags::ACK, header.seq).await?;
                }
                Step::OutOfOrder => {
                    log::debug!(
                        "recv: out-of-order segment {} (expected {})",
                        header.seq,
                        reassembler.prev_seq().map_or(0, |p| p.wrapping_add(1))
                    );
                    if let Some(prev) = reassembler.prev_seq() {
                        self.send_control(flags::ACK, prev).await?;
                    }
                }
                Step::Stored { finished } => {
                    segment_count += 1;
                    self.send_control(flags::ACK, header.seq).await?;
                    if finished {
                        break;
                    }
                }
            }
        }

        if self.config.debug {
            log::debug!(
                "received {} bytes over {segment_count} segments; \
                 wire: {wire_bytes} bytes over {wire_packets} packets, \
                 {duplicates} duplicates",
                reassembler.total()
            );
        }
        Ok(reassembler.total())
    }

    // -----------------------------------------------------------------------
    // Configuration and introspection
    // -----------------------------------------------------------------------

    /// Local address of the underlying socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    /// Configured MTU in bytes (header included).
    pub fn mtu(&self) -> u16 {
        self.config.mtu
    }

    /// Change the MTU.  Refused while connected — the value is negotiated
    /// with the peer during the handshake.
    pub fn set_mtu(&mut self, mtu: u16) -> Result<(), ConnError> {
        if self.connected {
            return Err(ConnError::BadState(
                "the MTU is negotiated with the peer and cannot change while connected",
            ));
        }
        if mtu < MIN_MTU {
            return Err(ConfigError::MtuTooSmall(mtu).into());
        }
        self.config.mtu = mtu;
        Ok(())
    }

    /// Per-round-trip wait in milliseconds.
    pub fn timeout_ms(&self) -> u16 {
        self.config.timeout_ms
    }

    /// Change the round-trip wait.  Refused while connected.
    pub fn set_timeout_ms(&mut self, timeout_ms: u16) -> Result<(), ConnError> {
        if self.connected {
            return Err(ConnError::BadState(
                "the timeout cannot change while connected",
            ));
        }
        if timeout_ms < MIN_TIMEOUT_MS {
            return Err(ConfigError::TimeoutTooSmall(timeout_ms).into());
        }
        self.config.timeout_ms = timeout_ms;
        Ok(())
    }

    /// Retransmission budget per logical operation.
    pub fn max_retries(&self) -> u16 {
        self.config.max_retries
    }

    pub fn set_max_retries(&mut self, max_retries: u16) -> Result<(), ConnError> {
        if max_retries == 0 {
            return Err(ConfigError::ZeroRetries.into());
        }
        self.config.max_retries = max_retries;
        Ok(())
    }

    pub fn debug(&self) -> bool {
        self.config.debug
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.config.debug = debug;
    }

    /// MTU the peer advertised during the handshake.
    pub fn peer_mtu(&self) -> Result<u16, ConnError> {
        if !self.connected {
            return Err(ConnError::BadState(
                "the peer's MTU is only known while connected",
            ));
        }
        Ok(self.peer_mtu)
    }

    /// Segment outgoing data by our own MTU even if the peer advertised a
    /// smaller one.  Only useful when the path is known to carry it.
    pub fn force_use_own_mtu(&mut self) -> Result<(), ConnError> {
        if !self.connected {
            return Err(ConnError::BadState(
                "MTU selection only applies while connected",
            ));
        }
        self.peer_mtu = self.config.mtu;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    /// Application bytes per data packet: the smaller of the two advertised
    /// MTUs, minus the header.
    fn segment_capacity(&self) -> usize {
        self.config.mtu.min(self.peer_mtu) as usize - HEADER_SIZE
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.config.timeout_ms))
    }

    fn syn_payload(&self) -> SynPayload {
        SynPayload {
            mtu: self.config.mtu,
            timeout_ms: self.config.timeout_ms,
            max_retries: self.config.max_retries,
            debug: u16::from(self.config.debug),
        }
    }

    fn reset_session(&mut self) {
        self.connected = false;
        self.peer = None;
        self.peer_mtu = 0;
    }

    /// Send a control packet to the connected (or dialed) peer.  SYN-flagged
    /// packets automatically carry our connection parameters.
    async fn send_control(&self, packet_flags: u8, seq: u32) -> Result<(), ConnError> {
        let dest = self.peer.ok_or(ConnError::BadState("peer address missing"))?;
        self.send_control_to(packet_flags, seq, dest).await
    }

    async fn send_control_to(
        &self,
        packet_flags: u8,
        seq: u32,
        dest: SocketAddr,
    ) -> Result<(), ConnError> {
        let syn = (packet_flags & flags::SYN != 0).then(|| self.syn_payload());
        let pkt = packet::encode_control(packet_flags, seq, syn.as_ref());
        self.socket.send_to(&pkt, dest).await?;
        Ok(())
    }

    /// Wait for one datagram from the peer and run it through the validator.
    ///
    /// Datagrams from other senders are answered with a lone FIN and
    /// consumed without surfacing — they never count against any retry
    /// budget.  A lone FIN from the peer is acknowledged with FIN|ACK here
    /// and the session state cleared before [`Inbound::PeerClosed`] is
    /// returned.
    async fn await_packet(
        &mut self,
        expected: u8,
        wait: Option<Duration>,
    ) -> Result<Inbound, ConnError> {
        let mut buf = vec![0u8; self.config.mtu as usize];

        loop {
            let (n, from) = match wait {
                Some(deadline) => match self.socket.recv_from_timeout(&mut buf, deadline).await? {
                    Some(received) => received,
                    None => return Ok(Inbound::TimedOut),
                },
                None => self.socket.recv_from(&mut buf).await?,
            };

            if let Some(peer) = self.peer {
                if from != peer {
                    log::debug!("rejecting datagram from unknown sender {from}");
                    self.send_control_to(flags::FIN, 0, from).await?;
                    continue;
                }
            }

            match validator::verdict(&buf[..n], expected, self.connected) {
                Verdict::Accept => return Ok(Inbound::Packet(buf[..n].to_vec(), from)),
                Verdict::Drop => return Ok(Inbound::Dropped(n)),
                Verdict::PeerClosed => {
                    if self.connected {
                        self.send_control(flags::FIN | flags::ACK, 0).await?;
                        log::info!("peer closed the connection");
                        self.reset_session();
                    }
                    return Ok(Inbound::PeerClosed);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (state and configuration rules; wire behavior is exercised by
// the integration tests under tests/)
// ---------------------------------------------------------------------------
