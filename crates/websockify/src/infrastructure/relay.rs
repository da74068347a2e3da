//! The relay core: two unidirectional pumps per session.
//!
//! ```text
//!               stream→message pump
//!   backend  ── read ≤ buffer_size ──▶ one binary message ──▶  browser
//!   (TCP)                                                     (WebSocket)
//!            ◀── write whole payload ◀── one message ───────
//!               message→stream pump
//! ```
//!
//! Each pump forwards strictly in arrival order.  Nothing is reassembled: a
//! short backend read becomes a short message, and a backend burst larger
//! than the buffer becomes several messages.  In the other direction every
//! message is written on its own, never split and never merged with its
//! neighbours.
//!
//! Teardown is symmetric.  The first pump to hit an error or a clean close
//! closes the shared [`SessionGuard`]; the other pump wakes up from its
//! pending read or write, and both pumps close the write side they own (a
//! Close frame towards the browser, a TCP shutdown towards the backend)
//! before returning.  There is no half-duplex mode where one direction keeps
//! draining after the other has finished.

use std::io;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace, warn};

use crate::application::SessionGuard;
use crate::infrastructure::backend_conn::BackendConnection;

/// Why a pump stopped.  The prefix names the failing direction and step.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("TCP READ : {0}")]
    BackendRead(#[source] io::Error),

    #[error("TCP READ : EOF")]
    BackendClosed,

    #[error("WS WRITE : {0}")]
    ClientWrite(#[source] WsError),

    #[error("WS READ  : {0}")]
    ClientRead(#[source] WsError),

    #[error("WS READ  : client closed the connection")]
    ClientClosed,

    #[error("TCP WRITE: {0}")]
    BackendWrite(#[source] io::Error),

    #[error("session closed")]
    Cancelled,
}

impl RelayError {
    /// `true` for orderly endings: a peer closed, or the session was already
    /// being torn down.
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            RelayError::BackendClosed | RelayError::ClientClosed | RelayError::Cancelled
        )
    }
}

/// Both pump tasks of one running session.
pub struct SessionHandle {
    pub guard: Arc<SessionGuard>,
    stream_to_message: JoinHandle<RelayError>,
    message_to_stream: JoinHandle<RelayError>,
}

impl SessionHandle {
    /// Waits for both pumps and returns why each stopped, as
    /// `(stream→message, message→stream)`.
    ///
    /// # Errors
    ///
    /// Returns the [`tokio::task::JoinError`] if a pump task panicked or was
    /// aborted.
    pub async fn join(self) -> Result<(RelayError, RelayError), tokio::task::JoinError> {
        tokio::try_join!(self.stream_to_message, self.message_to_stream)
    }
}

/// Starts the two pumps of a session as independent tasks and returns at
/// once.
pub fn spawn_session<S>(
    ws: WebSocketStream<S>,
    backend: BackendConnection,
    guard: Arc<SessionGuard>,
    buffer_size: usize,
) -> SessionHandle
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (ws_tx, ws_rx) = ws.split();

    let stream_to_message = tokio::spawn(pump_stream_to_message(
        backend.read_half,
        ws_tx,
        buffer_size,
        Arc::clone(&guard),
    ));
    let message_to_stream = tokio::spawn(pump_message_to_stream(
        ws_rx,
        backend.write_half,
        Arc::clone(&guard),
    ));

    SessionHandle {
        guard,
        stream_to_message,
        message_to_stream,
    }
}

/// Backend → browser.
///
/// Reads up to `buffer_size` bytes per iteration and sends each read as one
/// binary message.  On exit, closes the session and sends a Close frame to
/// the browser.
pub async fn pump_stream_to_message<R, S>(
    mut reader: R,
    mut sink: S,
    buffer_size: usize,
    guard: Arc<SessionGuard>,
) -> RelayError
where
    R: AsyncRead + Unpin,
    S: Sink<Message, Error = WsError> + Unpin,
{
    let id = guard.id().to_string();
    let mut buf = vec![0u8; buffer_size];

    let reason = loop {
        let n = tokio::select! {
            biased;
            _ = guard.closed() => break RelayError::Cancelled,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break RelayError::BackendClosed,
                Ok(n) => n,
                Err(e) => break RelayError::BackendRead(e),
            },
        };
        debug!("session {id}: TCP READ : {n}");
        trace!("session {id}: TCP READ : {}", hex::encode(&buf[..n]));

        let sent = tokio::select! {
            biased;
            _ = guard.closed() => break RelayError::Cancelled,
            sent = sink.send(Message::Binary(buf[..n].to_vec())) => sent,
        };
        if let Err(e) = sent {
            break RelayError::ClientWrite(e);
        }
        debug!("session {id}: WS WRITE : {n}");
    };

    finish(&guard, &reason);
    // The browser may already be gone; nothing left to report.
    let _ = sink.close().await;
    reason
}

/// Browser → backend.
///
/// Reads one message per iteration and writes its whole payload to the
/// backend.  Binary and text messages carry data; ping, pong and raw frames
/// are protocol traffic and are skipped; a Close frame ends the session.  On
/// exit, closes the session and shuts down the backend write side.
pub async fn pump_message_to_stream<St, W>(
    mut stream: St,
    mut writer: W,
    guard: Arc<SessionGuard>,
) -> RelayError
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
    W: AsyncWrite + Unpin,
{
    let id = guard.id().to_string();

    let reason = loop {
        let msg = tokio::select! {
            biased;
            _ = guard.closed() => break RelayError::Cancelled,
            next = stream.next() => match next {
                Some(Ok(msg)) => msg,
                Some(Err(WsError::ConnectionClosed)) | None => break RelayError::ClientClosed,
                Some(Err(e)) => break RelayError::ClientRead(e),
            },
        };

        let payload = match msg {
            Message::Binary(data) => data,
            Message::Text(text) => text.into_bytes(),
            Message::Close(_) => break RelayError::ClientClosed,
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };
        debug!("session {id}: WS READ  : {}", payload.len());
        trace!("session {id}: WS READ  : {}", hex::encode(&payload));

        // A write that cannot complete is a transport error; nothing is
        // resumed afterwards.
        let written = tokio::select! {
            biased;
            _ = guard.closed() => break RelayError::Cancelled,
            written = writer.write_all(&payload) => written,
        };
        if let Err(e) = written {
            break RelayError::BackendWrite(e);
        }
        debug!("session {id}: TCP WRITE: {}", payload.len());
    };

    finish(&guard, &reason);
    let _ = writer.shutdown().await;
    reason
}

fn finish(guard: &SessionGuard, reason: &RelayError) {
    if !reason.is_clean() {
        warn!("session {}: {reason}", guard.id());
    }
    guard.close(reason);
}


// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use futures_util::{sink, stream};
    use tokio_util::sync::CancellationToken;

    /// A sink that records every message it receives.
    fn recording_sink(
        out: Arc<Mutex<Vec<Message>>>,
    ) -> impl Sink<Message, Error = WsError> + Unpin {
        Box::pin(sink::unfold(out, |out, msg: Message| async move {
            out.lock().unwrap().push(msg);
            Ok::<_, WsError>(out)
        }))
    }

    /// Log sink shared with the test body.
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn guard() -> Arc<SessionGuard> {
        SessionGuard::new("test", &CancellationToken::new())
    }

    fn binary_payloads(messages: &[Message]) -> Vec<Vec<u8>> {
        messages
            .iter()
            .map(|m| match m {
                Message::Binary(data) => data.clone(),
                other => panic!("expected binary message, got {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_clean_reasons() {
        assert!(RelayError::BackendClosed.is_clean());
        assert!(RelayError::ClientClosed.is_clean());
        assert!(RelayError::Cancelled.is_clean());
        assert!(!RelayError::BackendWrite(io::ErrorKind::BrokenPipe.into()).is_clean());
    }

    #[test]
    fn test_error_display_names_direction() {
        let err = RelayError::BackendRead(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert_eq!(err.to_string(), "TCP READ : reset");
        assert_eq!(RelayError::BackendClosed.to_string(), "TCP READ : EOF");
    }

    #[tokio::test]
    async fn test_stream_to_message_splits_by_buffer_size() {
        // Arrange: 5000 bytes queued on the backend side, then EOF
        let (mut backend, relay_side) = tokio::io::duplex(8192);
        let data: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        backend.write_all(&data).await.unwrap();
        drop(backend);

        let out = Arc::new(Mutex::new(Vec::new()));
        let guard = guard();

        // Act
        let reason = pump_stream_to_message(
            relay_side,
            recording_sink(Arc::clone(&out)),
            2048,
            Arc::clone(&guard),
        )
        .await;

        // Assert: frames are bounded and concatenate back to the input
        assert!(matches!(reason, RelayError::BackendClosed));
        assert!(guard.is_closed());
        let frames = binary_payloads(&out.lock().unwrap());
        assert!(frames.len() >= 3, "5000 bytes need at least 3 frames of 2048");
        assert!(frames.iter().all(|f| !f.is_empty() && f.len() <= 2048));
        assert_eq!(frames.concat(), data);
    }

    #[tokio::test]
    async fn test_stream_to_message_traces_payload_as_hex() {
        // Arrange: capture log output for this thread only
        let captured = Arc::new(Mutex::new(Vec::<u8>::new()));
        let sink = Arc::clone(&captured);
        let _log = tracing::subscriber::set_default(crate::infrastructure::logging::subscriber(
            move || SharedBuf(Arc::clone(&sink)),
            tracing_subscriber::EnvFilter::new("trace"),
        ));
        let (mut backend, relay_side) = tokio::io::duplex(64);
        backend.write_all(&[0x00, 0xab, 0x10]).await.unwrap();
        drop(backend);

        // Act
        pump_stream_to_message(
            relay_side,
            recording_sink(Arc::new(Mutex::new(Vec::new()))),
            2048,
            guard(),
        )
        .await;

        // Assert
        let out = String::from_utf8(captured.lock().unwrap().clone()).unwrap();
        assert!(out.contains(": Debug: session test: TCP READ : 3\n"), "got: {out}");
        assert!(out.contains(": Debug: session test: TCP READ : 00ab10\n"), "got: {out}");
    }

    #[tokio::test]
    async fn test_stream_to_message_forwards_short_reads_as_is() {
        let (mut backend, relay_side) = tokio::io::duplex(64);
        let out = Arc::new(Mutex::new(Vec::new()));
        let pump = tokio::spawn(pump_stream_to_message(
            relay_side,
            recording_sink(Arc::clone(&out)),
            2048,
            guard(),
        ));

        backend.write_all(b"hello").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(backend);
        pump.await.unwrap();

        let frames = binary_payloads(&out.lock().unwrap());
        assert_eq!(frames, vec![b"hello".to_vec()]);
    }

    #[tokio::test]
    async fn test_stream_to_message_stops_on_sink_error() {
        let (mut backend, relay_side) = tokio::io::duplex(64);
        backend.write_all(b"data").await.unwrap();
        let failing = Box::pin(sink::unfold((), |(), _msg: Message| async move {
            Err::<(), _>(WsError::ConnectionClosed)
        }));
        let guard = guard();

        let reason = pump_stream_to_message(relay_side, failing, 2048, Arc::clone(&guard)).await;

        assert!(matches!(reason, RelayError::ClientWrite(_)));
        assert!(guard.is_closed());
    }

    #[tokio::test]
    async fn test_stream_to_message_exits_when_session_closed() {
        // The backend never sends anything; only the guard can end the pump.
        let (_backend, relay_side) = tokio::io::duplex(64);
        let guard = guard();
        let pump = tokio::spawn(pump_stream_to_message(
            relay_side,
            recording_sink(Arc::new(Mutex::new(Vec::new()))),
            2048,
            Arc::clone(&guard),
        ));

        guard.close("other pump finished");

        let reason = tokio::time::timeout(Duration::from_secs(2), pump)
            .await
            .expect("pump must stop promptly")
            .unwrap();
        assert!(matches!(reason, RelayError::Cancelled));
    }

    #[tokio::test]
    async fn test_message_to_stream_keeps_order_and_boundaries() {
        // Arrange: data messages interleaved with protocol traffic
        let messages = stream::iter(vec![
            Ok(Message::Binary(b"alpha".to_vec())),
            Ok(Message::Ping(b"p".to_vec())),
            Ok(Message::Text("beta".to_string())),
            Ok(Message::Pong(Vec::new())),
            Ok(Message::Binary(b"gamma".to_vec())),
        ]);
        let (relay_side, mut backend) = tokio::io::duplex(1024);
        let guard = guard();

        // Act
        let reason = pump_message_to_stream(messages, relay_side, Arc::clone(&guard)).await;

        // Assert: exact concatenation, then EOF on the backend side
        assert!(matches!(reason, RelayError::ClientClosed));
        let mut received = Vec::new();
        backend.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"alphabetagamma");
        assert!(guard.is_closed());
    }

    #[tokio::test]
    async fn test_message_to_stream_stops_at_close_frame() {
        let messages = stream::iter(vec![
            Ok(Message::Binary(b"before".to_vec())),
            Ok(Message::Close(None)),
            Ok(Message::Binary(b"after".to_vec())),
        ]);
        let (relay_side, mut backend) = tokio::io::duplex(1024);

        let reason = pump_message_to_stream(messages, relay_side, guard()).await;

        assert!(matches!(reason, RelayError::ClientClosed));
        let mut received = Vec::new();
        backend.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"before");
    }

    #[tokio::test]
    async fn test_message_to_stream_reports_read_errors() {
        let messages = stream::iter(vec![Err(WsError::Utf8)]);
        let (relay_side, _backend) = tokio::io::duplex(1024);

        let reason = pump_message_to_stream(messages, relay_side, guard()).await;

        assert!(matches!(reason, RelayError::ClientRead(WsError::Utf8)));
        assert!(!reason.is_clean());
    }

    #[tokio::test]
    async fn test_message_to_stream_reports_write_errors() {
        let messages = stream::iter(vec![Ok(Message::Binary(b"lost".to_vec()))]);
        let (relay_side, backend) = tokio::io::duplex(1024);
        drop(backend);

        let reason = pump_message_to_stream(messages, relay_side, guard()).await;

        assert!(matches!(reason, RelayError::BackendWrite(_)));
    }

    #[tokio::test]
    async fn test_message_to_stream_exits_when_session_closed() {
        let guard = guard();
        let pump = tokio::spawn(pump_message_to_stream(
            stream::pending::<Result<Message, WsError>>(),
            tokio::io::sink(),
            Arc::clone(&guard),
        ));

        guard.cancellation_token().cancel();

        let reason = tokio::time::timeout(Duration::from_secs(2), pump)
            .await
            .expect("pump must stop promptly")
            .unwrap();
        assert!(matches!(reason, RelayError::Cancelled));
    }
}
