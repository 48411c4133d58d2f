//! `rudp` — reliable, in-order message delivery over UDP.
//!
//! A [`Connection`] behaves like a stream socket for whole messages: a
//! server binds a port and accepts a single peer, a client dials in, and
//! either side can then exchange arbitrarily large byte buffers with
//! guaranteed delivery, integrity, and ordering, before tearing the
//! association down.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  send(buf) / recv(buf)
//!      ▼
//!  ┌───────────────────────────────────────┐
//!  │             Connection                │
//!  │  handshake · teardown · stop-and-wait │
//!  │   ├── Segmenter  (outbound slicing)   │
//!  │   ├── Reassembler (inbound ordering)  │
//!  │   └── validator  (datagram admission) │
//!  └────┬──────────────────────────────────┘
//!       │ packets (12-byte header + payload, one's-complement checksum)
//!  ┌────▼──────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     — wire format (header, flags, checksum, SYN payload)
//! - [`validator`]  — admission verdicts for received datagrams
//! - [`config`]     — tunables (MTU, timeout, retry budget) and their bounds
//! - [`connection`] — per-endpoint lifecycle and the stop-and-wait data plane
//! - [`sender`]     — outbound segmentation state
//! - [`receiver`]   — inbound reassembly state
//! - [`socket`]     — async UDP socket abstraction
//! - [`simulator`]  — lossy-link relay for testing under packet loss
//!
//! The protocol is deliberately minimal: one peer per endpoint, one segment
//! in flight at a time, IPv4 only, and a 16-bit Internet checksum as the
//! only integrity check.

pub mod config;
pub mod connection;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod validator;

pub use config::Config;
pub use connection::{ConnError, Connection, Role};
