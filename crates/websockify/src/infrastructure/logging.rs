//! Process-wide log sink in the standard Tox log format.
//!
//! Logging happens in two stages:
//!
//! 1. [`RawLineFormat`] renders each `tracing` event as a plain line
//!    `HH:MM:SS.ffffff file.rs:LINE: message` (UTC, microseconds).
//! 2. [`LogFormatAdapter`] wraps the real writer and rewrites every line into
//!    `[HH:MM:SS.mmm UTC] (websockify) file.rs:LINE : Debug: message`.  A line
//!    that does not fit the raw shape is written unchanged with an
//!    `(unparsed)` marker.
//!
//! The adapter never fails its caller: whatever happens on the underlying
//! writer, a write reports the full input as consumed.
//!
//! Production code calls [`init`] once at startup; tests build a scoped
//! subscriber with [`subscriber`] over an in-memory writer instead.

use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;

use chrono::Utc;
use tracing::{Event, Subscriber};
use tracing_log::NormalizeEvent;
use tracing_subscriber::fmt::format::{self, DefaultFields, FormatEvent, FormatFields};
use tracing_subscriber::fmt::{FmtContext, MakeWriter, SubscriberBuilder};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

use crate::domain::log_line::{adapt_line, COMPONENT_NAME};

/// Filter used when `RUST_LOG` is unset: per-packet relay logs on, library
/// chatter off.
pub const DEFAULT_FILTER: &str = "info,websockify=debug";

// ── Raw line formatter ────────────────────────────────────────────────────────

/// Formats events as `HH:MM:SS.ffffff file:line: message`.
///
/// Only the file name is kept, not its directory.  Events without a source
/// location lose the `file:line:` part and end up `(unparsed)` downstream.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawLineFormat;

impl<S, N> FormatEvent<S, N> for RawLineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Records bridged from the `log` crate carry their real file and line
        // in fields; the event's own metadata points at the bridge.
        let normalized = event.normalized_metadata();
        let meta = normalized.as_ref().unwrap_or_else(|| event.metadata());
        write!(writer, "{} ", Utc::now().format("%H:%M:%S%.6f"))?;
        if let (Some(file), Some(line)) = (meta.file(), meta.line()) {
            let short = file.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(file);
            write!(writer, "{short}:{line}: ")?;
        }
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// ── Adapter ───────────────────────────────────────────────────────────────────

/// `MakeWriter` that rewrites every raw line before it reaches `inner`.
#[derive(Debug)]
pub struct LogFormatAdapter<M> {
    inner: M,
    component: &'static str,
}

impl<M> LogFormatAdapter<M> {
    pub fn new(inner: M, component: &'static str) -> Self {
        Self { inner, component }
    }
}

impl<'a, M> MakeWriter<'a> for LogFormatAdapter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = AdaptingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        AdaptingWriter {
            inner: self.inner.make_writer(),
            component: self.component,
        }
    }
}

/// Writer handed out by [`LogFormatAdapter`].  One `write` call is one
/// record.
#[derive(Debug)]
pub struct AdaptingWriter<W> {
    inner: W,
    component: &'static str,
}

impl<W: Write> Write for AdaptingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let raw = String::from_utf8_lossy(buf);
        let line = adapt_line(&raw, self.component);
        // Nowhere left to report a failing log sink.
        let _ = self.inner.write_all(line.as_bytes());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.inner.flush();
        Ok(())
    }
}

// ── Wiring ────────────────────────────────────────────────────────────────────

type AdaptedBuilder<M> = SubscriberBuilder<DefaultFields, RawLineFormat, EnvFilter, LogFormatAdapter<M>>;

fn builder<M>(make_writer: M, filter: EnvFilter) -> AdaptedBuilder<M>
where
    M: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_ansi(false)
        .event_format(RawLineFormat)
        .with_writer(LogFormatAdapter::new(make_writer, COMPONENT_NAME))
        .with_env_filter(filter)
}

/// Builds a subscriber that logs through the adapter into `make_writer`.
///
/// Meant for scoped use (`tracing::subscriber::with_default`), e.g. in tests
/// that capture output in memory.
pub fn subscriber<M>(make_writer: M, filter: EnvFilter) -> impl Subscriber + Send + Sync
where
    M: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    builder(make_writer, filter).finish()
}

/// `RUST_LOG` if set and valid, [`DEFAULT_FILTER`] otherwise.
pub fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the adapter on stderr as the global subscriber.
///
/// Records from the `log` crate (used by tungstenite) are routed through the
/// same sink.  Writes are serialised by a mutex, so concurrent sessions never
/// interleave partial lines.
///
/// # Errors
///
/// Fails if a global subscriber is already installed; the process keeps the
/// first one.
pub fn init(filter: EnvFilter) -> anyhow::Result<()> {
    builder(Mutex::new(io::stderr()), filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log sink: {e}"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
