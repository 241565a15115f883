//! Wildcard expansion over arbitrarily shaped JSON documents.

use serde::Serialize;
use serde_json::Value;

use super::expression::{PathExpression, Segment, WildcardPattern};
use crate::error::PathError;

/// Fields tried, in order, to name an array element for partial patterns.
const IDENTIFIER_FIELDS: [&str; 5] = ["id", "uid", "name", "_id", "device_id"];

/// One concrete location produced by expanding an expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    /// Concrete `/`-joined path, unique within one expansion.
    pub path: String,

    /// The value found at that path.
    pub value: Value,
}

/// Resolve `expression` against `document`.
///
/// Literal segments that do not exist yield an empty result, not an error.
/// The only error is an expression that starts with a wildcard.
///
/// # Example
///
/// ```rust
/// use routerfleet::path::{resolve_wildcard_path, PathExpression};
/// use serde_json::json;
///
/// let doc = json!({"status": {"devices": [
///     {"id": "mdm1", "signal": -80},
///     {"id": "mdm2", "signal": -70}
/// ]}});
/// let expr: PathExpression = "status/devices/mdm*/signal".parse().unwrap();
/// let matches = resolve_wildcard_path(&doc, &expr).unwrap();
/// assert_eq!(matches[0].path, "status/devices/mdm1/signal");
/// assert_eq!(matches[1].value, json!(-70));
/// ```
pub fn resolve_wildcard_path(
    document: &Value,
    expression: &PathExpression,
) -> Result<Vec<MatchResult>, PathError> {
    if matches!(expression.segments().first(), Some(Segment::Wildcard(_))) {
        return Err(PathError::LeadingWildcard {
            expression: expression.as_str().to_string(),
        });
    }
    Ok(expand(document, "", expression.segments()))
}

/// Expand `segments` below `value`, prefixing every produced path with `base`.
///
/// This is the recursive step used both by [`resolve_wildcard_path`] and by
/// the read dispatcher, which requests the literal prefix from the device and
/// expands the remainder locally.
pub fn expand(value: &Value, base: &str, segments: &[Segment]) -> Vec<MatchResult> {
    let Some((segment, rest)) = segments.split_first() else {
        return vec![MatchResult {
            path: base.to_string(),
            value: value.clone(),
        }];
    };

    match segment {
        Segment::Literal(key) => match lookup_literal(value, key) {
            Some((name, child)) => expand(child, &join(base, &name), rest),
            None => Vec::new(),
        },
        Segment::Wildcard(pattern) => expand_wildcard(value, base, pattern, rest),
    }
}

fn expand_wildcard(
    value: &Value,
    base: &str,
    pattern: &WildcardPattern,
    rest: &[Segment],
) -> Vec<MatchResult> {
    let mut results = Vec::new();

    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if pattern.matches(key) {
                    results.extend(expand(child, &join(base, key), rest));
                }
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                let name = if pattern.is_universal() {
                    idx.to_string()
                } else {
                    item_identifier(child).unwrap_or_else(|| idx.to_string())
                };
                if pattern.matches(&name) {
                    results.extend(expand(child, &join(base, &name), rest));
                }
            }
        }
        _ => {}
    }

    results
}

/// Exact key, then case-insensitive key, then array index.
fn lookup_literal<'a>(value: &'a Value, key: &str) -> Option<(String, &'a Value)> {
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(key) {
                return Some((key.to_string(), child));
            }
            map.iter()
                .find(|(k, _)| k.to_lowercase() == key.to_lowercase())
                .map(|(k, child)| (k.clone(), child))
        }
        Value::Array(items) => {
            if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let idx: usize = key.parse().ok()?;
            items.get(idx).map(|child| (key.to_string(), child))
        }
        _ => None,
    }
}

/// Own name of an array element, used when matching partial patterns.
fn item_identifier(item: &Value) -> Option<String> {
    let map = item.as_object()?;
    IDENTIFIER_FIELDS.iter().find_map(|field| match map.get(*field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    })
}

fn join(base: &str, key: &str) -> String {
    if base.is_empty() {
        key.to_string()
    } else {
        format!("{base}/{key}")
    }
}

/// Display form of an expanded value: `null` and scalars pass through,
/// objects and arrays become their JSON text.
pub fn display_value(value: &Value) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) => Value::String(value.to_string()),
        scalar => scalar.clone(),
    }
}

/// Display form of a whole response for a literal path.
///
/// Empty objects/arrays and `null` render as an empty string.
pub fn display_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Object(map) if map.is_empty() => String::new(),
        Value::Array(items) if items.is_empty() => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resolve(doc: &Value, expr: &str) -> Vec<MatchResult> {
        resolve_wildcard_path(doc, &expr.parse().unwrap()).unwrap()
    }

    fn paths(results: &[MatchResult]) -> Vec<&str> {
        results.iter().map(|m| m.path.as_str()).collect()
    }

    #[test]
    fn test_modem_scenario() {
        let doc = json!({"status": {"devices": [
            {"id": "mdm1", "signal": -80},
            {"id": "mdm2", "signal": -70}
        ]}});

        let results = resolve(&doc, "status/devices/mdm*/signal");
        assert_eq!(
            results,
            vec![
                MatchResult { path: "status/devices/mdm1/signal".into(), value: json!(-80) },
                MatchResult { path: "status/devices/mdm2/signal".into(), value: json!(-70) },
            ]
        );
    }

    #[test]
    fn test_literal_matches_direct_lookup() {
        let doc = json!({"config": {"system": {"system_id": "IBR900-1a2"}}});
        let results = resolve(&doc, "config/system/system_id");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value, doc["config"]["system"]["system_id"]);

        assert!(resolve(&doc, "config/system/missing").is_empty());
        assert!(resolve(&doc, "config/system/system_id/deeper").is_empty());
    }

    #[test]
    fn test_literal_case_insensitive_fallback() {
        let doc = json!({"Status": {"WAN": {"primary": "mdm"}}});
        let results = resolve(&doc, "status/wan/primary");
        assert_eq!(paths(&results), vec!["Status/WAN/primary"]);
    }

    #[test]
    fn test_literal_array_index() {
        let doc = json!({"list": ["a", "b", "c"]});
        assert_eq!(resolve(&doc, "list/2")[0].value, json!("c"));
        assert!(resolve(&doc, "list/3").is_empty());
        assert!(resolve(&doc, "list/-1").is_empty());
    }

    #[test]
    fn test_universal_wildcard_cardinality() {
        let doc = json!({
            "obj": {"a": 1, "b": 2, "c": 3},
            "arr": [10, 20],
            "empty": {}
        });
        assert_eq!(resolve(&doc, "obj/*").len(), 3);
        assert_eq!(paths(&resolve(&doc, "arr/*")), vec!["arr/0", "arr/1"]);
        assert!(resolve(&doc, "empty/*").is_empty());
    }

    #[test]
    fn test_universal_wildcard_uses_index_even_with_ids() {
        let doc = json!({"devices": [{"id": "mdm1"}, {"id": "mdm2"}]});
        assert_eq!(paths(&resolve(&doc, "devices/*/id")), vec!["devices/0/id", "devices/1/id"]);
    }

    #[test]
    fn test_partial_pattern_falls_back_to_index() {
        let doc = json!({"items": [{"uid": "eth0"}, {"value": 3}, 7]});
        assert_eq!(paths(&resolve(&doc, "items/*0")), vec!["items/eth0"]);
        assert_eq!(paths(&resolve(&doc, "items/1*")), vec!["items/1"]);
    }

    #[test]
    fn test_identifier_field_priority() {
        let doc = json!({"items": [{"name": "wan", "id": 42}]});
        assert_eq!(paths(&resolve(&doc, "items/4*")), vec!["items/42"]);
    }

    #[test]
    fn test_object_keys_case_insensitive() {
        let doc = json!({"status": {"MDM1": {"sig": 1}, "eth0": {"sig": 2}}});
        let results = resolve(&doc, "status/mdm*/sig");
        assert_eq!(paths(&results), vec!["status/MDM1/sig"]);
    }

    #[test]
    fn test_nested_wildcards() {
        let doc = json!({"a": {"x": {"p": 1, "q": 2}, "y": {"p": 3}}});
        let results = resolve(&doc, "a/*/*");
        assert_eq!(paths(&results), vec!["a/x/p", "a/x/q", "a/y/p"]);
    }

    #[test]
    fn test_wildcard_over_scalar_is_empty() {
        let doc = json!({"a": 5});
        assert!(resolve(&doc, "a/*").is_empty());
    }

    #[test]
    fn test_leading_wildcard_is_error() {
        let doc = json!({"a": 1});
        let expr: PathExpression = "*/a".parse().unwrap();
        assert!(resolve_wildcard_path(&doc, &expr).is_err());
    }

    #[test]
    fn test_document_not_mutated() {
        let doc = json!({"a": {"b": [1, 2]}});
        let before = doc.clone();
        let _ = resolve(&doc, "a/*/*");
        assert_eq!(doc, before);
    }

    #[test]
    fn test_expand_with_base() {
        let data = json!([{"id": "mdm1", "signal": -80}]);
        let expr: PathExpression = "status/devices/mdm*/signal".parse().unwrap();
        let (base, rest) = expr.split_at_wildcard().unwrap();
        let results = expand(&data, &base, rest);
        assert_eq!(paths(&results), vec!["status/devices/mdm1/signal"]);
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(display_value(&json!(null)), json!(null));
        assert_eq!(display_value(&json!(-80)), json!(-80));
        assert_eq!(display_value(&json!({"a": 1})), json!("{\"a\":1}"));
        assert_eq!(display_text(&json!({})), "");
        assert_eq!(display_text(&json!("up")), "up");
        assert_eq!(display_text(&json!([1, 2])), "[1,2]");
        assert_eq!(display_text(&json!(null)), "");
    }
}
