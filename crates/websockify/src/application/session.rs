//! Session lifecycle: one browser WebSocket paired with one backend TCP
//! connection.
//!
//! The two pumps of a session share a single [`SessionGuard`].  Whichever
//! pump stops first closes the guard; the guard cancels the session's
//! [`CancellationToken`], which wakes the other pump so it can close its own
//! write side and exit.  Closing is idempotent: only the first call has an
//! effect and gets logged.
//!
//! The session token is a child of the server's shutdown token, so a Ctrl+C
//! (or any other holder of [`SessionGuard::cancellation_token`]) can tear a
//! session down from outside.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Close-once guard shared by the two pumps of a session.
#[derive(Debug)]
pub struct SessionGuard {
    id: String,
    closed: AtomicBool,
    token: CancellationToken,
}

impl SessionGuard {
    /// Creates a guard whose cancellation follows `parent`.
    pub fn new(id: impl Into<String>, parent: &CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            closed: AtomicBool::new(false),
            token: parent.child_token(),
        })
    }

    /// Session identifier used in log lines (the browser's peer address).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Closes the session.
    ///
    /// Returns `true` for the call that actually closed it; every later call
    /// returns `false` and does nothing.
    pub fn close(&self, reason: impl Display) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        info!("session {}: closing ({reason})", self.id);
        self.token.cancel();
        true
    }

    /// `true` once the session has been closed or cancelled from outside.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.token.is_cancelled()
    }

    /// Resolves when the session is closed by either pump or cancelled from
    /// outside.
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }

    /// A handle that tears the session down when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
