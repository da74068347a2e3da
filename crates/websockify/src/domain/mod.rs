//! Domain layer for websockify.
//!
//! Pure types with no I/O, no async and no sockets: the relay configuration,
//! the request-head inspection that decides between upgrade and "not found",
//! and the log record parser/renderer behind the external log format.

pub mod config;
pub mod log_line;
pub mod request;

pub use config::ProxyConfig;
pub use log_line::{adapt_line, LogRecord};
pub use request::{Dispatch, RequestHead};
