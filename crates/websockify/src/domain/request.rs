//! Request-head inspection: the upgrade-or-not-found decision.
//!
//! The endpoint has exactly one route.  Whatever the method or path, a request
//! is either an upgrade request (its `Upgrade` header equals
//! [`UPGRADE_TOKEN`]) or it gets the fixed "404 Not Found" reply.  This module
//! only looks at the header block; it never sees payload bytes.

use httparse::{Status, EMPTY_HEADER};
use thiserror::Error;

/// Upper bound on the size of a request head (request line plus headers).
pub const MAX_HEAD_LEN: usize = 8 * 1024;

/// Most header lines a request head may carry.
pub const MAX_HEADERS: usize = 64;

/// Value of the `Upgrade` header that marks a session request.
pub const UPGRADE_TOKEN: &str = "websocket";

/// Body of the fixed reply for every non-upgrade request.
pub const NOT_FOUND_BODY: &str = "404 Not Found";

/// Why the bytes received so far are not a usable request head.
///
/// None of these is fatal to the endpoint: a request that fails to parse is
/// not an upgrade request, so it gets the "404 Not Found" reply.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeadError {
    /// `httparse` rejected the head (bad request line, bad header syntax,
    /// folded header, too many headers).
    #[error("malformed request head: {0}")]
    Malformed(#[from] httparse::Error),

    /// No blank line within the first [`MAX_HEAD_LEN`] bytes.
    #[error("request head exceeds {} bytes", MAX_HEAD_LEN)]
    TooLarge,

    /// The peer stopped sending before the blank line arrived.
    #[error("connection closed before the request head was complete")]
    Incomplete,
}

/// What the dispatcher should do with an inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Perform the WebSocket handshake and start a relay session.
    Upgrade,
    /// Answer with the fixed "404 Not Found" reply.
    NotFound,
}

/// The parsed request line and header block of an HTTP/1.x request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    /// Minor HTTP version: `1` for HTTP/1.1, `0` for HTTP/1.0.
    pub version: u8,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parses the request head at the start of `buf`.
    ///
    /// Returns `Ok(None)` while the head is still incomplete.  Both `\r\n`
    /// and bare `\n` line endings are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`HeadError::Malformed`] when the bytes cannot be an HTTP/1.x
    /// request head, and [`HeadError::TooLarge`] when `buf` has grown past
    /// [`MAX_HEAD_LEN`] without completing one.
    pub fn parse(buf: &[u8]) -> Result<Option<Self>, HeadError> {
        let mut headers = [EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);

        match request.parse(buf)? {
            Status::Complete(_) => Ok(Some(Self {
                method: request.method.unwrap_or_default().to_string(),
                path: request.path.unwrap_or_default().to_string(),
                version: request.version.unwrap_or_default(),
                headers: request
                    .headers
                    .iter()
                    .map(|h| {
                        let value = String::from_utf8_lossy(h.value).trim().to_string();
                        (h.name.to_string(), value)
                    })
                    .collect(),
            })),
            Status::Partial if buf.len() > MAX_HEAD_LEN => Err(HeadError::TooLarge),
            Status::Partial => Ok(None),
        }
    }

    /// Returns the first value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// `true` when the `Upgrade` header is exactly [`UPGRADE_TOKEN`].
    pub fn is_upgrade(&self) -> bool {
        self.header("Upgrade") == Some(UPGRADE_TOKEN)
    }

    /// The dispatcher's decision for this request.
    pub fn dispatch(&self) -> Dispatch {
        if self.is_upgrade() {
            Dispatch::Upgrade
        } else {
            Dispatch::NotFound
        }
    }
}

/// Picks the sub-protocol to answer with, given the client's
/// `Sec-WebSocket-Protocol` offer.
///
/// Returns `Some(supported)` only if the client listed it; a client that
/// offers nothing, or only other protocols, gets no sub-protocol header.
pub fn select_subprotocol<'a>(offered: Option<&str>, supported: &'a str) -> Option<&'a str> {
    offered?
        .split(',')
        .map(str::trim)
        .any(|p| p == supported)
        .then_some(supported)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
