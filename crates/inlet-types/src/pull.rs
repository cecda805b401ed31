//! Per-call result envelope exchanged between the pull state machine and
//! a transport connection.

use std::collections::HashMap;

use bytes::Bytes;

/// Well-known side-channel message keys.
pub const MSG_CONTENT_TYPE: &str = "content-type";
pub const MSG_SCHEMA: &str = "schema";
pub const MSG_HEADERS: &str = "headers";

/// The outcome of one connection call.
///
/// Produced fresh by each call; consumed by the next call and by the
/// driving loop's termination check. The buffer is opaque to the pull
/// core; record decoding belongs to the consuming layer.
#[derive(Debug, Clone, Default)]
pub struct PullResult {
    /// Raw response data; `None` when the call produced no data buffer.
    pub buffer: Option<Bytes>,
    /// Side-channel metadata (content type, inferred schema, headers).
    pub messages: HashMap<String, String>,
    /// Total record count advertised by the source, when it reports one.
    pub total_count: u64,
    /// Records contained in this call's buffer.
    pub set_count: u64,
    pub page_number: u64,
    pub page_start: u64,
    pub page_size: u64,
    /// Session key value carried by this response.
    pub session_key: String,
}

impl PullResult {
    /// Detected content type, if the transport reported one.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.messages.get(MSG_CONTENT_TYPE).map(String::as_str)
    }

    /// Source-provided schema string, if present.
    #[must_use]
    pub fn schema(&self) -> Option<&str> {
        self.messages.get(MSG_SCHEMA).map(String::as_str)
    }

    /// Look up a response header by name from the side-channel `headers`
    /// message (a JSON object). Returns `None` when headers are absent or
    /// unparsable; extraction failures never fail the call.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        let raw = self.messages.get(MSG_HEADERS)?;
        let parsed: serde_json::Value = serde_json::from_str(raw).ok()?;
        match parsed.get(name) {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        }
    }
}
