//! Entry point for `minitcp`.
//!
//! Parses CLI arguments and dispatches into either **send** or **recv** mode.
//! All protocol work is delegated to the library; `main.rs` owns only process
//! setup (logging, argument parsing, file I/O).

use std::fs::File;
use std::io::{BufWriter, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use minitcp::config::{DEFAULT_FIN_LINGER, DEFAULT_WINDOW_SIZE};
use minitcp::socket::local_ip_toward;
use minitcp::{run_receiver, run_sender, Config, EventLog, Receiver, Sender, Socket};

/// Reliable file transfer over UDP with Go-Back-N.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Local address to bind.
    #[arg(long, global = true, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file to a listening receiver.
    Send {
        /// File to send.
        file: PathBuf,
        /// Receiver host name or address.
        peer_host: String,
        /// Receiver UDP port.
        peer_port: u16,
        /// Local UDP port to send from.
        local_port: u16,
        /// Event log path.
        log: PathBuf,
        /// Window size in segments.
        #[arg(default_value_t = DEFAULT_WINDOW_SIZE)]
        window: usize,
        /// Timeout before the first RTT sample, in milliseconds.
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
    /// Receive a file and write it to disk.
    Recv {
        /// Where to write the received bytes.
        file: PathBuf,
        /// Local UDP port to listen on.
        local_port: u16,
        /// Sender host name or address.
        peer_host: String,
        /// Sender UDP port.
        peer_port: u16,
        /// Event log path.
        log: PathBuf,
        /// How long to keep answering FINs after the transfer, in milliseconds.
        #[arg(long, default_value_t = DEFAULT_FIN_LINGER.as_millis() as u64)]
        linger_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Send {
            file,
            peer_host,
            peer_port,
            local_port,
            log: log_path,
            window,
            timeout_ms,
        } => {
            let peer = resolve(&peer_host, peer_port).await?;
            let socket = Socket::bind(SocketAddr::new(cli.bind, local_port))
                .await
                .with_context(|| format!("binding UDP port {local_port}"))?;
            let local = local_endpoint(cli.bind, &socket, peer).await?;
            let config = Config {
                window_size: window,
                initial_timeout: Duration::from_millis(timeout_ms),
                ..Config::new(local, peer)
            };

            let mut data = Vec::new();
            File::open(&file)
                .and_then(|mut f| f.read_to_end(&mut data))
                .with_context(|| format!("reading {}", file.display()))?;
            let event_log = EventLog::create(&log_path)
                .with_context(|| format!("creating {}", log_path.display()))?;

            let mut sender = Sender::new(config.clone(), event_log)?;
            sender.extend(data.chunks(config.max_payload).map(<[u8]>::to_vec))?;
            log::info!(
                "sending {} ({} bytes) to {peer}, window {window}",
                file.display(),
                data.len()
            );

            let stats = run_sender(Arc::new(socket), sender).await?;
            println!("Total bytes sent: {}", stats.bytes_sent);
            println!("Segments sent: {}", stats.segments_sent);
            println!("Segments retransmitted: {}", stats.retransmissions);
        }
        Mode::Recv {
            file,
            local_port,
            peer_host,
            peer_port,
            log: log_path,
            linger_ms,
        } => {
            let peer = resolve(&peer_host, peer_port).await?;
            let socket = Socket::bind(SocketAddr::new(cli.bind, local_port))
                .await
                .with_context(|| format!("binding UDP port {local_port}"))?;
            let local = local_endpoint(cli.bind, &socket, peer).await?;
            let config = Config {
                fin_linger: Duration::from_millis(linger_ms),
                ..Config::new(local, peer)
            };
            config.validate()?;

            let output = File::create(&file)
                .with_context(|| format!("creating {}", file.display()))?;
            let event_log = EventLog::create(&log_path)
                .with_context(|| format!("creating {}", log_path.display()))?;

            log::info!("receiving into {} from {peer}", file.display());
            let receiver = Receiver::new(&config, event_log);
            let stats = run_receiver(Arc::new(socket), receiver, BufWriter::new(output)).await?;
            log::info!(
                "received {} bytes in {} segments",
                stats.bytes_delivered,
                stats.segments_received
            );
        }
    }
    Ok(())
}

/// Bound port plus the interface address used to reach `peer`, for the
/// event log.
async fn local_endpoint(bind: IpAddr, socket: &Socket, peer: SocketAddr) -> Result<SocketAddr> {
    let ip = local_ip_toward(bind, peer)
        .await
        .with_context(|| format!("finding a local route to {peer}"))?;
    Ok(SocketAddr::new(ip, socket.local_addr.port()))
}

/// Resolve `host:port`, preferring IPv4 to match the default bind address.
async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("resolving {host}"))?
        .collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .with_context(|| format!("{host} has no addresses"))
}
