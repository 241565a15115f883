//! Normalizing transport results into success or failure.
//!
//! Devices answer in inconsistent ways: HTTP errors, `200` responses with a
//! logical error envelope, non-JSON bodies, and for SCP pushes a dropped
//! connection that actually means the upload worked. Everything funnels into
//! a [`Failure`] with a [`FailureKind`] or a successful [`Payload`].

mod http;
mod transfer;

pub use http::{classify_http, describe_http_error, is_truthy};
pub use transfer::{
    classify_transfer, TransferOutput, TransferVerdict, FAILURE_PHRASES, LOST_CONNECTION_PHRASE,
};

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::TransportError;

/// Maximum length of a user-facing transport error message.
const SHORT_MESSAGE_LEN: usize = 80;

/// Why a per-target call did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    /// Target has no usable address or credentials; it was not attempted.
    InvalidTarget,
    /// The call did not finish within its timeout.
    TransportTimeout,
    /// Refused, no route, DNS failure and similar.
    TransportUnreachable,
    /// Non-success HTTP status, logical error envelope, tool failure.
    TransportProtocolError,
    /// A signal that needed the lost-connection heuristic and still failed.
    AmbiguousTransportSignal,
    /// Body was expected to be JSON and was not.
    MalformedResponse,
    /// The worker for this target panicked.
    TaskFault,
}

impl FailureKind {
    /// Short stable name, suitable for metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidTarget => "invalid_target",
            FailureKind::TransportTimeout => "timeout",
            FailureKind::TransportUnreachable => "unreachable",
            FailureKind::TransportProtocolError => "protocol_error",
            FailureKind::AmbiguousTransportSignal => "ambiguous_signal",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::TaskFault => "task_fault",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified per-target failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    /// Classification of the failure.
    pub kind: FailureKind,

    /// Short human-readable message.
    pub message: String,
}

impl Failure {
    /// Create a failure.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Check if this failure is a timeout.
    pub fn is_timeout(&self) -> bool {
        self.kind == FailureKind::TransportTimeout
    }

    /// Classify a transport error into a failure with a short message.
    pub fn from_transport(error: &TransportError) -> Self {
        match error {
            TransportError::Timeout(_) => {
                Failure::new(FailureKind::TransportTimeout, "Connection timed out")
            }
            TransportError::Http(e) => describe_http_error(e),
            TransportError::Disconnected => {
                Failure::new(FailureKind::AmbiguousTransportSignal, "Connection disconnected")
            }
            TransportError::AuthenticationFailed { .. } => {
                Failure::new(FailureKind::TransportProtocolError, error.to_string())
            }
            other => describe_error_text(&other.to_string()),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A successful response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Parsed JSON (with a `data` envelope already unwrapped for reads).
    Json(Value),
    /// Body that was not JSON, surfaced as-is.
    Text(String),
}

impl Payload {
    /// The payload as a JSON value; text becomes a JSON string.
    pub fn into_value(self) -> Value {
        match self {
            Payload::Json(v) => v,
            Payload::Text(s) => Value::String(s),
        }
    }

    /// Borrow the JSON value if this payload was JSON.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            Payload::Text(_) => None,
        }
    }
}

/// Outcome of one classified transport call.
pub type CallOutcome = std::result::Result<Payload, Failure>;

/// Map free-form error text onto the short messages operators see.
pub(crate) fn describe_error_text(text: &str) -> Failure {
    let lower = text.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        return Failure::new(FailureKind::TransportTimeout, "Connection timed out");
    }
    if lower.contains("connection refused") || lower.contains("connectionrefused") {
        return Failure::new(FailureKind::TransportUnreachable, "Connection refused");
    }
    if lower.contains("name or service not known")
        || lower.contains("nodename nor servname")
        || lower.contains("failed to lookup address")
        || lower.contains("dns error")
    {
        return Failure::new(FailureKind::TransportUnreachable, "Host not found");
    }
    if lower.contains("no route to host") || lower.contains("network is unreachable") {
        return Failure::new(FailureKind::TransportUnreachable, "Host unreachable");
    }
    Failure::new(FailureKind::TransportProtocolError, truncate(text, SHORT_MESSAGE_LEN, "..."))
}

/// Truncate on a character boundary, appending `suffix` when cut.
pub(crate) fn truncate(text: &str, max_chars: usize, suffix: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &text[..cut], suffix),
        None => text.to_string(),
    }
}
