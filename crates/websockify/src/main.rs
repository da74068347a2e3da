//! websockify: WebSocket-to-TCP relay, entry point.
//!
//! Browsers cannot open raw TCP sockets.  This binary accepts WebSocket
//! connections and relays each one, byte for byte, to a fixed TCP backend
//! such as a Tox bootstrap node's TCP relay port.
//!
//! # Usage
//!
//! ```text
//! websockify [OPTIONS]
//!
//! Options:
//!   -l, --listen <ADDR>       HTTP service address [default: 127.0.0.1:8080]
//!   -t, --target <HOST:PORT>  TCP service address  [default: 127.0.0.1:5900]
//! ```
//!
//! Log output goes to stderr in the standard Tox format.  `RUST_LOG` narrows
//! or widens it (e.g. `RUST_LOG=websockify=trace` adds payload hex dumps).

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use websockify::domain::config::{validate_target_addr, DEFAULT_LISTEN_ADDR, DEFAULT_TARGET_ADDR};
use websockify::domain::ProxyConfig;
use websockify::infrastructure::logging;
use websockify::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebSocket to TCP relay.
#[derive(Debug, Parser)]
#[command(
    name = "websockify",
    about = "Relays browser WebSocket connections to a TCP-only service",
    version
)]
struct Cli {
    /// HTTP service address to listen on.
    #[arg(short = 'l', long = "listen", default_value = DEFAULT_LISTEN_ADDR)]
    listen: String,

    /// TCP service address to relay to, as host:port.
    #[arg(short = 't', long = "target", default_value = DEFAULT_TARGET_ADDR)]
    target: String,
}

impl Cli {
    /// Converts the parsed arguments into a [`ProxyConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--listen` is not an `ip:port` socket address or
    /// `--target` has no valid port.
    fn into_proxy_config(self) -> anyhow::Result<ProxyConfig> {
        let listen_addr: SocketAddr = self
            .listen
            .parse()
            .with_context(|| format!("invalid listen address: '{}'", self.listen))?;

        validate_target_addr(&self.target)
            .map_err(|reason| anyhow::anyhow!("invalid target address: {reason}"))?;

        Ok(ProxyConfig::new(listen_addr, self.target))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::default_filter())?;

    let config = Cli::parse().into_proxy_config()?;

    info!("Starting up websockify endpoint");

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                trigger.cancel();
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    if let Err(e) = run_server(config, shutdown).await {
        error!("{e:#}");
        return Err(e);
    }

    info!("websockify endpoint stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
