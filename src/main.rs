//! Entry point for `udp-fetch`.
//!
//! Parses CLI arguments and dispatches into either **serve** or **get**
//! mode.  All protocol work is delegated to library modules; this file owns
//! only process setup (logging, argument parsing, exit codes) and the two
//! filesystem concerns the core treats as external: the serving directory
//! and the uniquely-prefixed output file.
//!
//! Exit codes — serve: 0 clean shutdown, 2 bind failure, 1 internal error;
//! get: 0 success, 3 transfer failure, 4 server-side error, 1 bad arguments.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::exit;

use anyhow::Context;
use clap::{Parser, Subcommand};

use udp_fetch::client;
use udp_fetch::receiver::{ReceiverConfig, TransferError};
use udp_fetch::sender::SenderConfig;
use udp_fetch::server::FileServer;

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Serve files from a directory over UDP.
    Serve {
        /// UDP port to listen on.
        port: u16,
        /// Directory the served files live in (created if absent).
        #[arg(long, default_value = "files")]
        root: PathBuf,
    },
    /// Download `host:port/name` into the current directory.
    Get {
        /// Server endpoint and file, e.g. `127.0.0.1:5000/test_1mb.dat`.
        target: String,
        /// Artificial inbound loss, percent.
        #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=100))]
        loss: u8,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Bad arguments must exit with 1; clap's own error path would use 2.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            exit(1);
        }
    };

    let code = match cli.mode {
        Mode::Serve { port, root } => run_server(port, root).await,
        Mode::Get { target, loss } => run_client(&target, loss).await,
    };
    exit(code);
}

async fn run_server(port: u16, root: PathBuf) -> i32 {
    if let Err(e) = tokio::fs::create_dir_all(&root)
        .await
        .with_context(|| format!("creating serving root '{}'", root.display()))
    {
        log::error!("{e:#}");
        return 1;
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let server = match FileServer::bind(addr, root, SenderConfig::default()).await {
        Ok(server) => server,
        Err(e) => {
            log::error!("cannot bind {addr}: {e}");
            return 2;
        }
    };

    tokio::select! {
        result = server.run() => match result {
            Ok(()) => 0,
            Err(e) => {
                log::error!("server failed: {e}");
                1
            }
        },
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutting down");
            0
        }
    }
}

async fn run_client(target: &str, loss: u8) -> i32 {
    let Some((endpoint, name)) = client::parse_target(target) else {
        log::error!("invalid target '{target}': expected host:port/name");
        return 1;
    };
    let server = match tokio::net::lookup_host(endpoint).await {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None => {
                log::error!("'{endpoint}' resolved to no address");
                return 1;
            }
        },
        Err(e) => {
            log::error!("cannot resolve '{endpoint}': {e}");
            return 1;
        }
    };

    let config = ReceiverConfig {
        loss_pct: loss,
        ..ReceiverConfig::default()
    };
    let out = output_path(name);

    match client::fetch(server, name, config, || std::fs::File::create(&out)).await {
        Ok(_report) => {
            log::info!("saved as '{}'", out.display());
            0
        }
        Err(TransferError::ServerRejected(msg)) => {
            log::error!("server rejected the request: {msg}");
            4
        }
        Err(e) => {
            log::error!("transfer failed: {e}");
            3
        }
    }
}

/// Saved files get a random unique prefix so repeated downloads of the same
/// name never clobber each other.
fn output_path(name: &str) -> PathBuf {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_owned());
    PathBuf::from(format!("recv-{:06x}-{base}", rand::random::<u32>() & 0xFF_FFFF))
}
