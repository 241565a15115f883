//! Parsing of operator-entered paths and payloads.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{DispatchError, Result};

static LIST_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\r\n,]+").expect("separator pattern is valid"));

/// Non-empty items of a whitespace- or comma-separated list.
pub(crate) fn split_items(raw: &str) -> impl Iterator<Item = &str> {
    LIST_SEPARATOR.split(raw).filter(|item| !item.is_empty())
}

/// Split a free-form list of paths on whitespace and commas.
pub fn parse_path_list(raw: &str) -> Vec<String> {
    split_items(raw).map(str::to_string).collect()
}

/// Parse a command payload. Blank input means no payload.
pub fn parse_payload(raw: &str) -> Result<Option<Value>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let value = serde_json::from_str(raw).map_err(DispatchError::InvalidPayload)?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serde_json::json;

    #[test]
    fn test_parse_path_list() {
        assert_eq!(
            parse_path_list("status/product_info, config/system/system_id\n status/wan/devices/*/status"),
            vec![
                "status/product_info",
                "config/system/system_id",
                "status/wan/devices/*/status"
            ]
        );
        assert!(parse_path_list(" ,\n ").is_empty());
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload("  ").unwrap(), None);
        assert_eq!(parse_payload(r#"{"enabled": true}"#).unwrap(), Some(json!({"enabled": true})));
        assert!(matches!(
            parse_payload("{nope"),
            Err(Error::Dispatch(DispatchError::InvalidPayload(_)))
        ));
    }
}
