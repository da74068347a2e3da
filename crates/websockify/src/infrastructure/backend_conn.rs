//! TCP connection to the backend service.
//!
//! Every upgraded browser session dials its own fresh connection to the
//! configured target; connections are never pooled or reused.  The relay is
//! protocol-agnostic, so nothing here knows what the backend speaks.

use std::io;
use std::net::SocketAddr;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// A freshly dialled backend connection, already split for the two pumps.
pub struct BackendConnection {
    /// Read half, owned by the stream→message pump.
    pub read_half: OwnedReadHalf,
    /// Write half, owned by the message→stream pump.
    pub write_half: OwnedWriteHalf,
    /// The address the target resolved to.
    pub peer_addr: SocketAddr,
}

impl BackendConnection {
    /// Opens a new TCP connection to `target` (`host:port`).
    ///
    /// Host names are resolved on every call.  Nagle's algorithm is turned
    /// off because the relay forwards small interactive packets one read at a
    /// time.
    ///
    /// # Errors
    ///
    /// Returns the I/O error from resolution or connect (backend down, wrong
    /// address, firewall).
    pub async fn connect(target: &str) -> io::Result<Self> {
        let stream = TcpStream::connect(target).await?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        debug!("connected to backend {target} ({peer_addr})");

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            read_half,
            write_half,
            peer_addr,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
