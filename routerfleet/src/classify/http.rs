//! Classification of HTTP management API responses.

use std::error::Error as StdError;

use serde_json::Value;

use super::{describe_error_text, truncate, CallOutcome, Failure, FailureKind, Payload};
use crate::transport::ApiMethod;

/// Maximum length of a body or error excerpt carried in a failure message.
const EXCERPT_LEN: usize = 200;

/// Turn a status code and body into a success payload or a failure.
///
/// A call succeeds only if the status is below 300 and, when the body is a
/// JSON object, it carries neither `"success": false` nor a truthy `error`.
/// For `GET`, an object with a `data` field is unwrapped to that field.
/// Bodies that are not JSON are surfaced as text rather than failing.
pub fn classify_http(status: u16, body: &str, method: ApiMethod) -> CallOutcome {
    if status >= 300 {
        let excerpt = if body.is_empty() {
            "No response".to_string()
        } else {
            truncate(body, EXCERPT_LEN, "")
        };
        return Err(Failure::new(
            FailureKind::TransportProtocolError,
            format!("{status}: {excerpt}"),
        ));
    }

    let data: Value = if body.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => return Ok(Payload::Text(body.to_string())),
        }
    };

    if let Value::Object(map) = &data {
        if map.get("success") == Some(&Value::Bool(false)) {
            let message = ["error", "message"]
                .iter()
                .filter_map(|k| map.get(*k))
                .find(|v| is_truthy(v))
                .map(value_message)
                .unwrap_or_else(|| truncate(&data.to_string(), EXCERPT_LEN, ""));
            return Err(Failure::new(FailureKind::TransportProtocolError, message));
        }
        if let Some(error) = map.get("error").filter(|v| is_truthy(v)) {
            return Err(Failure::new(
                FailureKind::TransportProtocolError,
                truncate(&value_message(error), EXCERPT_LEN, ""),
            ));
        }
    }

    if method == ApiMethod::Get {
        if let Value::Object(mut map) = data {
            return Ok(Payload::Json(match map.remove("data") {
                Some(inner) => inner,
                None => Value::Object(map),
            }));
        }
    }

    Ok(Payload::Json(data))
}

/// JSON truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn value_message(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Classify a reqwest error, walking its source chain for the OS reason.
pub fn describe_http_error(error: &reqwest::Error) -> Failure {
    if error.is_timeout() {
        return Failure::new(FailureKind::TransportTimeout, "Connection timed out");
    }

    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }

    describe_error_text(&text)
}
