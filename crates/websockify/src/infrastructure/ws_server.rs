//! HTTP/WebSocket endpoint: accept loop and connection dispatch.
//!
//! This module is responsible for:
//!
//! 1. Binding the listener on the configured address.
//! 2. Accepting connections and handing each one to its own Tokio task.
//! 3. Reading the request head with `httparse` and deciding between an
//!    upgrade and the fixed "404 Not Found" reply (any method, any path,
//!    and heads that do not parse at all).
//! 4. Completing the WebSocket handshake, selecting the `binary`
//!    sub-protocol when the browser offers it.
//! 5. Dialling a fresh TCP connection to the backend and starting the two
//!    relay pumps, without waiting for the session to finish.
//! 6. Stopping the accept loop, and every live session, when the shutdown
//!    token is cancelled.
//!
//! Nothing is retried here.  A failed handshake or dial aborts that one
//! connection; the browser is expected to reconnect.

use std::io::{self, Cursor};
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::{
    CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, SEC_WEBSOCKET_PROTOCOL,
};
use tokio_tungstenite::tungstenite::http::{self, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::SessionGuard;
use crate::domain::config::ProxyConfig;
use crate::domain::request::{
    select_subprotocol, Dispatch, HeadError, RequestHead, NOT_FOUND_BODY,
};
use crate::infrastructure::backend_conn::BackendConnection;
use crate::infrastructure::relay::{self, SessionHandle};

/// Why a connection never became a relay session.
///
/// A request that is not an upgrade is not an error: it is answered with
/// "404 Not Found" and `dispatch` returns `Ok(None)`.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to read request head: {0}")]
    ReadHead(#[source] io::Error),

    #[error("failed to send 404 response: {0}")]
    Respond(#[source] io::Error),

    #[error("upgrade: {0}")]
    Handshake(#[source] WsError),

    #[error("dial {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds the listening endpoint and serves until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound (address in use, no
/// permission).  This is the only fatal error of the process.
pub async fn run_server(config: ProxyConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    serve(listener, config, shutdown).await
}

/// Runs the accept loop on an already bound listener.
///
/// Each accepted connection is dispatched in its own task, so one slow
/// handshake or dial never delays the next accept.  There is no connection
/// limit.
///
/// # Errors
///
/// Returns an error only if the listener's local address cannot be read.
pub async fn serve(
    listener: TcpListener,
    config: ProxyConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let local_addr = listener
        .local_addr()
        .context("failed to read listener address")?;
    info!(
        "websockify endpoint listening on {local_addr}, relaying to {}",
        config.target_addr
    );

    let config = Arc::new(config);

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested; stopping accept loop");
                break;
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                // Each task gets its own handle on the shared, read-only config.
                let cfg = Arc::clone(&config);
                // Spawned so a slow handshake or dial never blocks accept().
                let token = shutdown.clone();
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, cfg, token).await;
                });
            }
            Err(e) => {
                // Transient (e.g. out of file descriptors); keep serving.
                error!("accept error: {e}");
            }
        }
    }

    Ok(())
}

// ── Per-connection dispatch ───────────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<ProxyConfig>,
    shutdown: CancellationToken,
) {
    match dispatch(stream, peer_addr, &config, &shutdown).await {
        Ok(Some(_session)) => debug!("session {peer_addr}: relay started"),
        Ok(None) => {}
        Err(e) => warn!("{peer_addr}: {e}"),
    }
}

/// Handles one accepted connection up to the point where the relay runs.
///
/// Returns `Ok(None)` when the request was answered with "404 Not Found",
/// and `Ok(Some(handle))` once both pumps of a new session are running.  The
/// session itself is not awaited; dropping the handle detaches it.
///
/// Every request that is not a well-formed upgrade request gets the 404,
/// including heads that fail to parse or never finish.  Only a connection
/// that closes before sending a single byte gets no reply.
///
/// # Errors
///
/// Returns [`DispatchError`] when the socket fails while reading the head or
/// writing the 404, the WebSocket handshake fails, or the backend cannot be
/// dialled.  On a dial failure the already upgraded WebSocket is closed
/// first so the browser sees the session end.
pub async fn dispatch(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    config: &ProxyConfig,
    shutdown: &CancellationToken,
) -> Result<Option<SessionHandle>, DispatchError> {
    // ── Step 1: Read the request head ─────────────────────────────────────────
    let (head_bytes, parsed) = read_request_head(&mut stream)
        .await
        .map_err(DispatchError::ReadHead)?;

    // ── Step 2: Upgrade or "404 Not Found" ────────────────────────────────────
    let head = match parsed {
        Ok(head) if head.dispatch() == Dispatch::Upgrade => head,
        Err(HeadError::Incomplete) if head_bytes.is_empty() => {
            debug!("{peer_addr}: closed without sending a request");
            return Ok(None);
        }
        other => {
            respond_not_found(&mut stream)
                .await
                .map_err(DispatchError::Respond)?;
            match other {
                Ok(head) => info!("{peer_addr}: {} {} -> 404 Not Found", head.method, head.path),
                Err(e) => info!("{peer_addr}: {e} -> 404 Not Found"),
            }
            return Ok(None);
        }
    };

    // ── Step 3: Complete the WebSocket handshake ──────────────────────────────
    // The handshake must see the request from its first byte, so the head
    // already consumed above is replayed in front of the socket.
    let (read_half, write_half) = stream.into_split();
    let io = tokio::io::join(Cursor::new(head_bytes).chain(read_half), write_half);

    // Answer with `binary` only when the browser asked for it.  The origin is
    // never checked.
    let subprotocol = config.subprotocol;
    let negotiate = move |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        let offered = request
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        if let Some(selected) = select_subprotocol(offered, subprotocol) {
            response
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(selected));
        }
        Ok(response)
    };

    let mut ws = accept_hdr_async(io, negotiate)
        .await
        .map_err(DispatchError::Handshake)?;
    info!("session {peer_addr}: WebSocket established ({})", head.path);

    // ── Step 4: Dial a fresh backend connection ───────────────────────────────
    let backend = match BackendConnection::connect(&config.target_addr).await {
        Ok(backend) => backend,
        Err(source) => {
            // Tell the browser the session is over before reporting why.
            let _ = ws.close(None).await;
            return Err(DispatchError::Dial {
                target: config.target_addr.clone(),
                source,
            });
        }
    };
    info!(
        "session {peer_addr}: connected to backend {} ({})",
        config.target_addr, backend.peer_addr
    );

    // ── Step 5: Start both pumps ──────────────────────────────────────────────
    // The guard's token is a child of `shutdown`, so Ctrl+C reaches every
    // live session without the accept loop tracking them.
    let guard = SessionGuard::new(peer_addr.to_string(), shutdown);
    Ok(Some(relay::spawn_session(
        ws,
        backend,
        guard,
        config.buffer_size,
    )))
}

/// Reads from `stream` until a complete request head has arrived or it is
/// clear that none will.
///
/// Returns every byte read (the head and whatever followed it in the same
/// reads) together with the parse outcome.  Parse failures are part of the
/// outcome, not errors: the caller still owes the peer a reply.
///
/// # Errors
///
/// Returns the I/O error if reading from the socket fails.
async fn read_request_head<R>(
    stream: &mut R,
) -> io::Result<(Vec<u8>, Result<RequestHead, HeadError>)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok((buf, Err(HeadError::Incomplete)));
        }
        buf.extend_from_slice(&chunk[..n]);

        match RequestHead::parse(&buf) {
            Ok(None) => continue,
            Ok(Some(head)) => return Ok((buf, Ok(head))),
            Err(e) => return Ok((buf, Err(e))),
        }
    }
}

/// The reply sent to every request that does not upgrade.
fn not_found_response() -> http::Response<&'static str> {
    let mut response = http::Response::new(NOT_FOUND_BODY);
    *response.status_mut() = StatusCode::NOT_FOUND;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(NOT_FOUND_BODY.len()));
    headers.insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

/// Serialises an HTTP/1.1 response: status line, headers, blank line, body.
fn encode_response(response: &http::Response<&str>) -> Vec<u8> {
    let mut out = format!("HTTP/1.1 {}\r\n", response.status()).into_bytes();
    for (name, value) in response.headers() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(response.body().as_bytes());
    out
}

async fn respond_not_found<W>(stream: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    stream.write_all(&encode_response(&not_found_response())).await?;
    stream.shutdown().await
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::request::MAX_HEAD_LEN;

    #[tokio::test]
    async fn test_read_request_head_across_reads() {
        // Arrange: the head arrives in two pieces
        let (mut client, mut server) = tokio::io::duplex(64);
        let reader = tokio::spawn(async move { read_request_head(&mut server).await });

        // Act
        client.write_all(b"GET / HTTP/1.1\r\nHost: x\r\n").await.unwrap();
        client.write_all(b"\r\n").await.unwrap();

        // Assert
        let (bytes, parsed) = reader.await.unwrap().unwrap();
        assert_eq!(bytes, b"GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(parsed.unwrap().header("Host"), Some("x"));
    }

    #[tokio::test]
    async fn test_read_request_head_lf_only() {
        let mut input: &[u8] = b"GET / HTTP/1.0\n\n";
        let (_, parsed) = read_request_head(&mut input).await.unwrap();
        assert_eq!(parsed.unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_read_request_head_incomplete() {
        const PARTIAL: &[u8] = b"GET / HTTP/1.1\r\nHost: x\r\n";
        let mut input = PARTIAL;
        let (bytes, parsed) = read_request_head(&mut input).await.unwrap();
        assert_eq!(bytes, PARTIAL);
        assert_eq!(parsed.unwrap_err(), HeadError::Incomplete);
    }

    #[tokio::test]
    async fn test_read_request_head_stops_at_malformed_head() {
        let mut input: &[u8] = b"GET / HTTP/1.1\r\nX-Folded: a\r\n b\r\n\r\n";
        let (_, parsed) = read_request_head(&mut input).await.unwrap();
        assert!(matches!(parsed, Err(HeadError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_read_request_head_too_large() {
        let mut request = b"GET / HTTP/1.1\r\nX-Long: ".to_vec();
        request.extend(std::iter::repeat(b'a').take(MAX_HEAD_LEN + 10));
        let mut input: &[u8] = &request;

        let (_, parsed) = read_request_head(&mut input).await.unwrap();
        assert_eq!(parsed.unwrap_err(), HeadError::TooLarge);
    }

    #[tokio::test]
    async fn test_respond_not_found_writes_fixed_reply() {
        // Arrange
        let mut out = Vec::new();

        // Act
        respond_not_found(&mut out).await.unwrap();

        // Assert: a complete response a plain HTTP client can parse
        let mut headers = [httparse::EMPTY_HEADER; 8];
        let mut response = httparse::Response::new(&mut headers);
        let body_start = match response.parse(&out).unwrap() {
            httparse::Status::Complete(n) => n,
            httparse::Status::Partial => panic!("response head must be complete"),
        };
        assert_eq!(response.code, Some(404));
        assert_eq!(response.reason, Some("Not Found"));
        let content_type = response
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("content-type"))
            .map(|h| h.value);
        assert_eq!(content_type, Some(&b"text/plain"[..]));
        assert_eq!(&out[body_start..], b"404 Not Found");
    }

    #[test]
    fn test_not_found_response_declares_body_length() {
        let response = not_found_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CONTENT_LENGTH], "13");
        assert_eq!(response.headers()[CONNECTION], "close");
    }

    #[test]
    fn test_dispatch_error_display() {
        let err = DispatchError::Dial {
            target: "127.0.0.1:5900".to_string(),
            source: io::ErrorKind::ConnectionRefused.into(),
        };
        assert!(err.to_string().starts_with("dial 127.0.0.1:5900:"));
    }
}
