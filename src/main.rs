//! Entry point for the `rudp` demo programs.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode.  All protocol work is delegated to the library; this file owns only
//! process setup, payload generation, and throughput reporting.

use std::net::Ipv4Addr;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::RngCore;

use rudp::config::{DEFAULT_MAX_RETRIES, DEFAULT_MTU, DEFAULT_TIMEOUT_MS};
use rudp::{Config, Connection};

/// Reliable message transport over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// MTU in bytes, header included.
    #[arg(long, default_value_t = DEFAULT_MTU)]
    mtu: u16,

    /// Per-round-trip wait in milliseconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout: u16,

    /// Retransmission budget per segment.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    retries: u16,

    /// Log per-transfer accounting (needs RUST_LOG=debug).
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Accept one peer and receive messages until it disconnects.
    Server {
        /// Port to listen on.
        #[arg(short, long, default_value_t = 9000)]
        port: u16,

        /// Receive buffer capacity in bytes.
        #[arg(long, default_value_t = 64 * 1024 * 1024)]
        capacity: usize,
    },
    /// Connect to a server and send random payloads.
    Client {
        /// Server IPv4 address.
        #[arg(short, long, default_value_t = Ipv4Addr::LOCALHOST)]
        server: Ipv4Addr,

        /// Server port.
        #[arg(short, long, default_value_t = 9000)]
        port: u16,

        /// Payload size in bytes.
        #[arg(long, default_value_t = 1024 * 1024)]
        size: usize,

        /// Number of messages to send.
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = Config {
        mtu: cli.mtu,
        timeout_ms: cli.timeout,
        max_retries: cli.retries,
        debug: cli.debug,
    };

    match cli.mode {
        Mode::Server { port, capacity } => run_server(port, capacity, config).await,
        Mode::Client {
            server,
            port,
            size,
            count,
        } => run_client(server, port, size, count, config).await,
    }
}

async fn run_server(port: u16, capacity: usize, config: Config) -> anyhow::Result<()> {
    let mut conn = Connection::server(port, config).context("failed to bind")?;
    println!("listening on {}", conn.local_addr());

    conn.accept().await.context("accept failed")?;
    println!("peer MTU: {} bytes", conn.peer_mtu()?);

    let mut buf = vec![0u8; capacity];
    let mut message = 0usize;
    loop {
        let started = Instant::now();
        let n = conn.recv(&mut buf).await.context("receive failed")?;
        if n == 0 {
            println!("peer disconnected");
            break;
        }
        message += 1;
        report(&format!("message {message}"), n, started, capacity);
    }
    Ok(())
}

async fn run_client(
    server: Ipv4Addr,
    port: u16,
    size: usize,
    count: usize,
    config: Config,
) -> anyhow::Result<()> {
    let mut conn = Connection::client(config)?;
    conn.connect(server, port)
        .await
        .with_context(|| format!("failed to connect to {server}:{port}"))?;
    println!("connected; peer MTU: {} bytes", conn.peer_mtu()?);

    let mut payload = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut payload);

    for message in 1..=count {
        let started = Instant::now();
        let n = conn.send(&payload).await.context("send failed")?;
        anyhow::ensure!(n == size, "peer closed the connection mid-transfer");
        report(&format!("message {message}"), n, started, usize::MAX);
    }

    conn.disconnect().await.context("disconnect failed")?;
    println!("disconnected");
    Ok(())
}

fn report(label: &str, bytes: usize, started: Instant, capacity: usize) {
    let secs = started.elapsed().as_secs_f64();
    let mib_per_s = bytes as f64 / (1024.0 * 1024.0) / secs.max(f64::EPSILON);
    let truncated = if bytes > capacity { " (truncated)" } else { "" };
    println!("{label}: {bytes} bytes in {secs:.3} s ({mib_per_s:.2} MiB/s){truncated}");
}
