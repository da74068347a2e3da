//! Infrastructure layer for websockify.
//!
//! Everything that touches a socket or a process-wide sink lives here:
//!
//! - Binding the listener and accepting connections
//! - Reading request heads, answering "404 Not Found", upgrading to WebSocket
//! - Dialling the TCP backend
//! - Running the two relay pumps of each session
//! - Installing the log format adapter as the global log sink

pub mod backend_conn;
pub mod logging;
pub mod relay;
pub mod ws_server;

pub use ws_server::{run_server, serve};
