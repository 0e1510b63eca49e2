//! Entry point for `drtp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! All actual protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, signal handling, argument parsing, file opening).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::fs::File;

use drtp::config::{DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT};
use drtp::{transfer, Config, Server, Socket};

/// Reliable file transfer over UDP (stop-and-wait).
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Retransmission timeout per attempt, in milliseconds.
    #[arg(long, global = true, default_value_t = DEFAULT_TIMEOUT.as_millis() as u64)]
    timeout_ms: u64,

    /// Retransmissions allowed per segment before giving up.
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Receive a file.
    Server {
        /// Address to bind.
        #[arg(short, long)]
        ip: IpAddr,
        #[arg(short, long)]
        port: u16,
        /// Where to write the received bytes.
        #[arg(short, long, default_value = "received_file")]
        file: PathBuf,
        /// Keep accepting transfers; each goes to `<file>-<ip>-<port>`.
        #[arg(long)]
        serve_forever: bool,
    },
    /// Send a file.
    Client {
        /// Server address.
        #[arg(short, long)]
        ip: IpAddr,
        #[arg(short, long)]
        port: u16,
        /// File to send.
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = Config::new()
        .with_timeout(Duration::from_millis(cli.timeout_ms))
        .with_max_retries(cli.max_retries);

    match cli.mode {
        Mode::Server {
            ip,
            port,
            file,
            serve_forever,
        } => run_server(SocketAddr::new(ip, port), file, serve_forever, config).await,
        Mode::Client { ip, port, file } => {
            run_client(SocketAddr::new(ip, port), &file, config).await
        }
    }
}

async fn run_server(
    addr: SocketAddr,
    file: PathBuf,
    serve_forever: bool,
    config: Config,
) -> anyhow::Result<()> {
    let socket = Socket::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    log::info!("server listening on {}", socket.local_addr);

    let make_sink = move |peer: SocketAddr| {
        let path = if serve_forever {
            per_peer_path(&file, peer)
        } else {
            file.clone()
        };
        async move { File::create(path).await }
    };

    let mut server = Server::new(socket, config, make_sink);
    if !serve_forever {
        server = server.with_connection_limit(1);
    }

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let outcomes = server.run(shutdown).await?;

    let mut failed = 0;
    for (peer, outcome) in &outcomes {
        match outcome {
            Ok(report) => println!("received {} bytes from {peer}", report.bytes),
            Err(e) => {
                eprintln!("transfer from {peer} failed: {e}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} transfer(s) failed");
    }
    Ok(())
}

async fn run_client(peer: SocketAddr, file: &Path, config: Config) -> anyhow::Result<()> {
    let mut source = File::open(file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;

    let local: SocketAddr = match peer.ip() {
        IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = Socket::bind(local).await.context("binding client socket")?;

    // Losing the race drops the transfer future, which releases the socket.
    let report = tokio::select! {
        result = transfer(socket, peer, &mut source, &config) => result?,
        _ = tokio::signal::ctrl_c() => bail!("interrupted"),
    };

    println!(
        "sent {} bytes in {} chunks to {peer} ({} retransmissions)",
        report.bytes, report.chunks, report.retransmissions
    );
    if !report.fin_acked {
        log::warn!("server never acknowledged FIN; all data was acknowledged");
    }
    Ok(())
}

fn per_peer_path(base: &Path, peer: SocketAddr) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!("-{}-{}", peer.ip(), peer.port()));
    PathBuf::from(name)
}
