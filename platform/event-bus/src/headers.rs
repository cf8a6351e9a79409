//! Per-message headers derived from an envelope.
//!
//! Header derivation is best-effort: a missing or unparsable envelope yields
//! the default header set instead of an error, so dispatch is never blocked
//! on it.

use serde_json::Value;
use std::collections::HashMap;

pub type Headers = HashMap<String, String>;

pub const EVENT_TYPE: &str = "X-Event-Type";
pub const EVENT_VERSION: &str = "X-Event-Version";
pub const TRACE_ID: &str = "X-Trace-Id";
pub const OCCURRED_AT: &str = "X-Occurred-At";
pub const PRODUCER_SERVICE: &str = "X-Producer-Service";
pub const DEAD_LETTER: &str = "X-Dead-Letter";
pub const DLQ_REASON: &str = "X-DLQ-Reason";
/// Partition/dedup key, carried as a header on transports without native keys
pub const MESSAGE_KEY: &str = "X-Message-Key";

/// Header set used when nothing can be read from the envelope
pub fn default_headers() -> Headers {
    let mut headers = Headers::with_capacity(5);
    headers.insert(EVENT_TYPE.to_string(), "unknown".to_string());
    headers.insert(EVENT_VERSION.to_string(), "0".to_string());
    headers.insert(TRACE_ID.to_string(), String::new());
    headers.insert(OCCURRED_AT.to_string(), String::new());
    headers.insert(PRODUCER_SERVICE.to_string(), String::new());
    headers
}

/// Derive the standard headers from a serialized envelope
pub fn derive_headers(envelope_json: Option<&str>) -> Headers {
    let mut headers = default_headers();

    let Some(json) = envelope_json.filter(|s| !s.trim().is_empty()) else {
        return headers;
    };
    let Ok(root) = serde_json::from_str::<Value>(json) else {
        return headers;
    };

    let mut copy = |name: &str, value: Option<&Value>| {
        if let Some(value) = value {
            headers.insert(name.to_string(), as_text(value));
        }
    };

    copy(EVENT_TYPE, root.get("type"));
    copy(EVENT_VERSION, root.get("version"));
    copy(OCCURRED_AT, root.get("occurredAt"));
    copy(TRACE_ID, root.get("trace").and_then(|t| t.get("traceId")));
    copy(
        PRODUCER_SERVICE,
        root.get("producer").and_then(|p| p.get("service")),
    );

    headers
}

/// Original headers plus the dead-letter markers
pub fn dead_letter_headers(base: &Headers, reason: Option<&str>) -> Headers {
    let mut headers = base.clone();
    if let Some(reason) = reason {
        headers.insert(DLQ_REASON.to_string(), reason.to_string());
    }
    headers.insert(DEAD_LETTER.to_string(), "true".to_string());
    headers
}

// Strings render without quotes, everything else as compact JSON.
fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
