//! Lossy-link simulator for deterministic testing.
//!
//! Real networks drop datagrams; exercising the retransmission machinery
//! without depending on actual network conditions needs a link that drops
//! them on purpose.  A [`Simulator`] is a UDP relay that sits between a
//! client and a server: the client dials the relay's address, the relay
//! forwards datagrams to the upstream server and learns the client's
//! address from the first datagram it sees.  Each datagram, in either
//! direction, is dropped with probability `loss_rate`.
//!
//! The RNG is seeded so a failing test replays the exact same loss
//! pattern.

use std::net::SocketAddr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Configuration for the fault model.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability in `[0.0, 1.0]` that any given datagram is dropped.
    pub loss_rate: f64,
    /// Seed for the drop decisions.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // Transparent pass-through unless faults are asked for.
        Self {
            loss_rate: 0.0,
            seed: 0,
        }
    }
}

/// A running lossy relay in front of one upstream endpoint.
#[derive(Debug)]
pub struct Simulator {
    /// The address clients should dial instead of the upstream's.
    pub local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl Simulator {
    /// Bind a relay on loopback in front of `upstream` and start forwarding.
    pub async fn start(upstream: SocketAddr, config: SimulatorConfig) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let local_addr = socket.local_addr()?;
        let handle = tokio::spawn(relay(socket, upstream, config));
        Ok(Self { local_addr, handle })
    }

    /// Stop forwarding and release the relay's socket.
    pub fn stop(self) {
        self.handle.abort();
    }
}

async fn relay(socket: UdpSocket, upstream: SocketAddr, config: SimulatorConfig) {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut downstream: Option<SocketAddr> = None;
    let mut buf = vec![0u8; 65535];

    loop {
        let Ok((n, from)) = socket.recv_from(&mut buf).await else {
            return;
        };

        if from != upstream {
            downstream = Some(from);
        }

        if rng.gen::<f64>() < config.loss_rate {
            log::debug!("simulator: dropping {n}-byte datagram from {from}");
            continue;
        }

        let dest = if from == upstream {
            match downstream {
                Some(addr) => addr,
                // Nothing to deliver to until a client has spoken.
                None => continue,
            }
        } else {
            upstream
        };

        if let Err(e) = socket.send_to(&buf[..n], dest).await {
            log::warn!("simulator: forward to {dest} failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lossless_relay_forwards_both_directions() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let relay = Simulator::start(server_addr, SimulatorConfig::default())
            .await
            .unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"question", relay.local_addr).await.unwrap();

        let mut buf = [0u8; 32];
        let (n, from) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"question");

        // The server answers through the relay, not directly.
        server.send_to(b"answer", from).await.unwrap();
        let (n, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"answer");

        relay.stop();
    }

    #[tokio::test]
    async fn total_loss_forwards_nothing() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let relay = Simulator::start(
            server_addr,
            SimulatorConfig {
                loss_rate: 1.0,
                seed: 7,
            },
        )
        .await
        .unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"lost", relay.local_addr).await.unwrap();

        let mut buf = [0u8; 32];
        let got = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            server.recv_from(&mut buf),
        )
        .await;
        assert!(got.is_err(), "datagram should have been dropped");

        relay.stop();
    }
}
