//! Event-stream record formatting
//!
//! A record is formatted exactly once per publish and the same buffer is
//! shared by history and every subscriber:
//!
//! ```text
//! id: <n>          (only when data is non-empty)
//! event: <name>    (only when an event name is given)
//! data: <line>     (one per payload line, bare "data: " when empty)
//! <blank line>
//! ```

use std::fmt::{self, Write as _};
use std::sync::Arc;

use serde::Serialize;

/// Keepalive comment. Carries no id and no event name.
pub const PING_RECORD: &str = ":ping\n\n";

/// Payload handed to `publish`, decided once at the public boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No data; the record carries a bare `data: ` line and no `id:`.
    Empty,
    /// Text, split into one `data:` line per input line.
    Text(String),
    /// Structured value, serialized to JSON text before formatting.
    Json(serde_json::Value),
}

impl Payload {
    /// Serialize any value into a structured payload.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Payload::Json)
    }

    /// Canonical text form of the payload.
    fn to_text(&self) -> String {
        match self {
            Payload::Empty => String::new(),
            Payload::Text(text) => text.clone(),
            Payload::Json(value) => value.to_string(),
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

impl<T: Into<Payload>> From<Option<T>> for Payload {
    fn from(data: Option<T>) -> Self {
        data.map_or(Payload::Empty, Into::into)
    }
}

/// An immutable, fully serialized record ready to write to any subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedMessage {
    id: Option<u64>,
    text: Arc<str>,
}

impl FormattedMessage {
    /// Sequence id written into the record, `None` for empty-data records.
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Shared buffer handed to subscriber sinks.
    pub(crate) fn shared(&self) -> Arc<str> {
        Arc::clone(&self.text)
    }
}

impl fmt::Display for FormattedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Format one record for sequence id `id`.
///
/// The id is consumed by the caller regardless; it is only written out
/// when the payload has content.
pub fn format_record(id: u64, event: Option<&str>, payload: &Payload) -> FormattedMessage {
    let data = payload.to_text();
    let mut out = String::with_capacity(data.len() + 32);

    let written_id = if data.is_empty() {
        None
    } else {
        // Writing to a String cannot fail.
        let _ = writeln!(out, "id: {}", id);
        Some(id)
    };

    if let Some(name) = event {
        let _ = writeln!(out, "event: {}", name);
    }

    if data.is_empty() {
        out.push_str("data: \n");
    } else {
        for line in split_lines(&data) {
            let _ = writeln!(out, "data: {}", line);
        }
    }
    out.push('\n');

    FormattedMessage {
        id: written_id,
        text: Arc::from(out),
    }
}

/// Reconnect hint written first on every new subscription.
pub fn retry_hint(client_retry_interval_ms: u64) -> String {
    format!("retry: {}\n\n", client_retry_interval_ms)
}

/// Split on `\r\n`, `\r` or `\n`. Every break ends a line, so blank lines
/// inside the payload survive as empty `data: ` lines.
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(|c: char| c == '\r' || c == '\n') {
        lines.push(&rest[..pos]);
        let skip = if rest[pos..].starts_with("\r\n") { 2 } else { 1 };
        rest = &rest[pos + skip..];
    }
    lines.push(rest);
    lines
}
