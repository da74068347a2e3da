//! Relay configuration types.
//!
//! [`ProxyConfig`] holds every runtime setting of the relay.  It is built once
//! at startup from the command line (see `main.rs`), wrapped in an `Arc`, and
//! never mutated afterwards: there is no reload and no runtime
//! reconfiguration.

use std::net::SocketAddr;

/// Default address the WebSocket endpoint listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";

/// Default `host:port` of the TCP backend.
pub const DEFAULT_TARGET_ADDR: &str = "127.0.0.1:5900";

/// Size of the per-direction receive buffer.
///
/// Large enough to hold any Tox TCP packet in a single read.  A backend that
/// writes larger application units in one go will see them split across
/// several WebSocket messages; the bytes still arrive in order, but the
/// browser side must not rely on one message carrying one whole unit.
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// The only sub-protocol the endpoint ever selects during the upgrade.
pub const SUBPROTOCOL: &str = "binary";

/// All runtime configuration for the relay.
///
/// # Example
///
/// ```rust
/// use websockify::domain::ProxyConfig;
///
/// let cfg = ProxyConfig::default();
/// assert_eq!(cfg.listen_addr.port(), 8080);
/// assert_eq!(cfg.target_addr, "127.0.0.1:5900");
/// ```
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address the HTTP/WebSocket listener binds to.
    pub listen_addr: SocketAddr,

    /// The TCP backend, as `host:port`.
    ///
    /// Kept as text so that host names are resolved when each session dials,
    /// not once at startup.
    pub target_addr: String,

    /// Bytes read from the backend per iteration of the stream→message pump.
    pub buffer_size: usize,

    /// Sub-protocol selected when the browser offers it.
    pub subprotocol: &'static str,
}

impl ProxyConfig {
    /// Builds a config with the given addresses and default relay settings.
    pub fn new(listen_addr: SocketAddr, target_addr: impl Into<String>) -> Self {
        Self {
            listen_addr,
            target_addr: target_addr.into(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            subprotocol: SUBPROTOCOL,
        }
    }
}

impl Default for ProxyConfig {
    /// | Field        | Default          |
    /// |--------------|------------------|
    /// | listen_addr  | `127.0.0.1:8080` |
    /// | target_addr  | `127.0.0.1:5900` |
    /// | buffer_size  | 2048             |
    /// | subprotocol  | `binary`         |
    fn default() -> Self {
        // Same address as DEFAULT_LISTEN_ADDR.
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)), DEFAULT_TARGET_ADDR)
    }
}

/// Checks that `target` looks like `host:port` with a numeric port.
///
/// Resolution of the host part is left to dial time.
///
/// # Errors
///
/// Returns a human-readable reason when the port is missing or not a `u16`.
pub fn validate_target_addr(target: &str) -> Result<(), String> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| format!("'{target}' is missing a port"))?;
    if host.is_empty() {
        return Err(format!("'{target}' is missing a host"));
    }
    port.parse::<u16>()
        .map(|_| ())
        .map_err(|_| format!("'{target}' has an invalid port '{port}'"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
