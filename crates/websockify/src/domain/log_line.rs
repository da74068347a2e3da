//! Log line parsing and the external wire format.
//!
//! The logging facility produces raw lines shaped like
//!
//! ```text
//! 15:02:46.433968 websockify.go:106: Starting up websockify endpoint
//! ```
//!
//! and the outside world expects the standard Tox format:
//!
//! ```text
//! [15:02:46.433 UTC] (websockify) websockify.go:106 : Debug: Starting up websockify endpoint
//! ```
//!
//! A line that does not have the raw shape is never dropped: it is echoed
//! as-is with an `(unparsed)` marker.

use std::sync::OnceLock;

use regex::Regex;

/// Component name written between parentheses in every adapted line.
pub const COMPONENT_NAME: &str = "websockify";

/// Marker appended to lines that could not be parsed.
pub const UNPARSED_MARKER: &str = "(unparsed)";

/// `HH:MM:SS.mmm` followed by three more fractional digits, the file, the
/// line number and the message.
fn raw_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d{2}:\d{2}:\d{2}\.\d{3})\d{3} ([^:]+):(\d+): (.*)$")
            .expect("log line pattern is a valid regex")
    })
}

/// One parsed log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// `HH:MM:SS.mmm`, already truncated to milliseconds.
    pub time: String,
    pub file: String,
    pub line: u32,
    pub message: String,
}

impl LogRecord {
    /// Parses one raw line (a single trailing newline is ignored).
    ///
    /// Returns `None` if the line does not have the raw shape.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.strip_suffix('\n').unwrap_or(raw);
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        let caps = raw_line_pattern().captures(raw)?;
        Some(Self {
            time: caps[1].to_string(),
            file: caps[2].to_string(),
            line: caps[3].parse().ok()?,
            message: caps[4].to_string(),
        })
    }

    /// Renders the record in the external wire format, without a newline.
    pub fn render(&self, component: &str) -> String {
        format!(
            "[{} UTC] ({component}) {}:{} : Debug: {}",
            self.time, self.file, self.line, self.message
        )
    }
}

/// Rewrites one raw line into the wire format, newline-terminated.
///
/// Lines that do not parse come back unchanged apart from the
/// `(unparsed)` marker and a terminating newline.
pub fn adapt_line(raw: &str, component: &str) -> String {
    match LogRecord::parse(raw) {
        Some(record) => {
            let mut out = record.render(component);
            out.push('\n');
            out
        }
        None => {
            let body = raw.strip_suffix('\n').unwrap_or(raw);
            format!("{body} {UNPARSED_MARKER}\n")
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
