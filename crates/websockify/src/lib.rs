//! websockify library crate.
//!
//! Relays between browsers speaking WebSocket and a single TCP-only backend
//! (for example a Tox bootstrap node), so that a web client can reach a
//! service it could never open a raw socket to.
//!
//! # Architecture
//!
//! ```text
//! Browser (binary WebSocket messages)
//!         ↕
//! [websockify]
//!   ├── domain/           ProxyConfig, request-head decision, log line format
//!   ├── application/      SessionGuard: close-once teardown shared by pumps
//!   └── infrastructure/
//!         ├── ws_server/    accept loop, 404 reply, WebSocket upgrade
//!         ├── backend_conn/ one fresh TCP connection per session
//!         ├── relay/        stream→message and message→stream pumps
//!         └── logging/      tracing sink in the standard Tox log format
//!         ↕
//! Backend (opaque TCP byte stream)
//! ```
//!
//! # Layer rules
//!
//! - `domain` does no I/O and has no async code.
//! - `application` depends on `domain` and on cancellation primitives only.
//! - `infrastructure` depends on all other layers plus `tokio` and
//!   `tungstenite`.

/// Domain layer: pure types (no I/O).
pub mod domain;

/// Application layer: session lifecycle.
pub mod application;

/// Infrastructure layer: sockets, relay pumps, log sink.
pub mod infrastructure;
