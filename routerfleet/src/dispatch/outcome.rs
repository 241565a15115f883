//! Per-target outcomes and the tabular read-mode result.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::classify::{Failure, Payload};
use crate::target::{SkipReason, Target};

/// Fixed column holding the target address.
pub const ADDRESS_COLUMN: &str = "address";

/// Fixed column holding the target display name.
pub const DISPLAY_NAME_COLUMN: &str = "display_name";

/// Which target an outcome belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetIdentity {
    /// Position in the submitted target list.
    pub index: usize,
    pub address: String,
    pub display_name: String,
}

impl TargetIdentity {
    pub(crate) fn of(index: usize, target: &Target) -> Self {
        Self {
            index,
            address: target.host().to_string(),
            display_name: target.label().to_string(),
        }
    }
}

/// Result of one operation on one target.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failed(Failure),
    /// Not attempted; the target had no usable address or credentials.
    Skipped(SkipReason),
}

impl<T> Outcome<T> {
    /// Check if the operation succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Check if the target was skipped.
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }

    /// The failure, if any.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// The success value, if any.
    pub fn success(&self) -> Option<&T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Map the success value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Failed(failure) => Outcome::Failed(failure),
            Outcome::Skipped(reason) => Outcome::Skipped(reason),
        }
    }

    /// `Success`, `Failed: <message>` or `Skipped: <reason>`.
    pub fn status_text(&self) -> String {
        match self {
            Outcome::Success(_) => "Success".to_string(),
            Outcome::Failed(failure) => format!("Failed: {}", failure.message),
            Outcome::Skipped(reason) => format!("Skipped: {}", reason),
        }
    }
}

impl<T> From<Result<T, Failure>> for Outcome<T> {
    fn from(result: Result<T, Failure>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(failure) => Outcome::Failed(failure),
        }
    }
}

impl<T> fmt::Display for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.status_text())
    }
}

/// One target's outcome, tagged with its identity.
#[derive(Debug, Clone)]
pub struct TargetOutcome<T = Payload> {
    pub target: TargetIdentity,
    pub outcome: Outcome<T>,
    /// Wall time spent on this target, including waiting for a worker slot.
    pub elapsed: Duration,
}

impl<T> TargetOutcome<T> {
    /// Check if the operation succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// One row of a read report: the fixed columns plus one cell per
/// requested path or concrete wildcard match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    pub address: String,
    pub display_name: String,
    pub cells: IndexMap<String, Value>,
}

impl Row {
    pub(crate) fn new(identity: &TargetIdentity) -> Self {
        Self {
            address: identity.address.clone(),
            display_name: identity.display_name.clone(),
            cells: IndexMap::new(),
        }
    }

    /// Value of `column`, including the fixed columns.
    pub fn get(&self, column: &str) -> Option<Value> {
        match column {
            ADDRESS_COLUMN => Some(Value::String(self.address.clone())),
            DISPLAY_NAME_COLUMN => Some(Value::String(self.display_name.clone())),
            _ => self.cells.get(column).cloned(),
        }
    }
}

/// Output schema of a read dispatch.
///
/// `fixed` is address, display name and every literal requested path in
/// request order; `dynamic` is every other key observed in any row, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnSet {
    pub fixed: Vec<String>,
    pub dynamic: Vec<String>,
}

impl ColumnSet {
    /// Derive the column set from the literal paths and all rows.
    pub fn derive<S: AsRef<str>>(literal_paths: &[S], rows: &[Row]) -> Self {
        let mut fixed: Vec<String> = vec![ADDRESS_COLUMN.to_string(), DISPLAY_NAME_COLUMN.to_string()];
        for path in literal_paths {
            let path = path.as_ref();
            if !fixed.iter().any(|c| c == path) {
                fixed.push(path.to_string());
            }
        }

        let dynamic: BTreeSet<&str> = rows
            .iter()
            .flat_map(|row| row.cells.keys())
            .map(String::as_str)
            .filter(|key| !fixed.iter().any(|c| c.as_str() == *key))
            .collect();

        Self {
            dynamic: dynamic.into_iter().map(str::to_string).collect(),
            fixed,
        }
    }

    /// All columns, fixed first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.fixed.iter().chain(self.dynamic.iter()).map(String::as_str)
    }

    /// Total column count.
    pub fn len(&self) -> usize {
        self.fixed.len() + self.dynamic.len()
    }

    /// Check if there are no columns.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Rows plus derived columns.
#[derive(Debug, Clone, Serialize)]
pub struct ReadReport {
    pub rows: Vec<Row>,
    pub columns: ColumnSet,
}

impl ReadReport {
    /// Rows rendered against the column set; missing cells are `null`.
    pub fn table(&self) -> Vec<Vec<Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .map(|column| row.get(column).unwrap_or(Value::Null))
                    .collect()
            })
            .collect()
    }
}

/// How a successful push was confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Delivery {
    /// Clean success from the transport.
    Confirmed,
    /// Inferred from a dropped connection with no failure signal.
    AfterDisconnect,
}

/// One target's push result and its transcript lines.
#[derive(Debug, Clone)]
pub struct PushRecord {
    pub target: TargetIdentity,
    pub outcome: Outcome<Delivery>,
    pub lines: Vec<String>,
}

/// Result of a file push or HTTP upload across a fleet.
#[derive(Debug, Clone)]
pub struct PushReport {
    /// First transcript line, e.g. `SDK App Deployment: app.tar.gz`.
    pub title: String,
    pub started: DateTime<Local>,
    pub records: Vec<PushRecord>,
}

impl PushReport {
    /// Number of targets that were attempted and failed. Skipped targets
    /// are not counted.
    pub fn failure_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome.failure().is_some())
            .count()
    }

    /// The full transcript: title, start time, then every target's lines.
    pub fn transcript(&self) -> Vec<String> {
        let mut lines = vec![
            self.title.clone(),
            format!("Started: {}", self.started.format("%Y-%m-%dT%H:%M:%S%.6f")),
            String::new(),
        ];
        for record in &self.records {
            lines.extend(record.lines.iter().cloned());
            lines.push(String::new());
        }
        lines
    }

    /// Per-target outcomes in input order.
    pub fn outcomes(&self) -> impl Iterator<Item = (&TargetIdentity, &Outcome<Delivery>)> {
        self.records.iter().map(|r| (&r.target, &r.outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FailureKind;
    use serde_json::json;

    fn row(cells: &[(&str, Value)]) -> Row {
        Row {
            address: "10.0.0.1".to_string(),
            display_name: "-".to_string(),
            cells: cells.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        }
    }

    #[test]
    fn test_status_text() {
        assert_eq!(Outcome::Success(()).status_text(), "Success");
        let failed: Outcome<()> =
            Outcome::Failed(Failure::new(FailureKind::TransportTimeout, "Connection timed out"));
        assert_eq!(failed.to_string(), "Failed: Connection timed out");
        let skipped: Outcome<()> = Outcome::Skipped(SkipReason::MissingCredentials);
        assert_eq!(skipped.to_string(), "Skipped: missing credentials");
    }

    #[test]
    fn test_column_union_sorted() {
        let rows = vec![
            row(&[
                ("status/product_info/product_name", json!("IBR900")),
                ("status/wan/devices/mdm2/status", json!("up")),
            ]),
            row(&[
                ("status/product_info/product_name", json!("E300")),
                ("status/wan/devices/mdm1/status", json!("up")),
                ("status/wan/devices/mdm2/status", json!("down")),
            ]),
        ];
        let columns = ColumnSet::derive(&["status/product_info/product_name"], &rows);

        assert_eq!(
            columns.fixed,
            vec!["address", "display_name", "status/product_info/product_name"]
        );
        assert_eq!(
            columns.dynamic,
            vec!["status/wan/devices/mdm1/status", "status/wan/devices/mdm2/status"]
        );
        assert_eq!(columns.len(), 5);
    }

    #[test]
    fn test_duplicate_literal_paths() {
        let columns = ColumnSet::derive(&["a/b", "a/b", "address"], &[]);
        assert_eq!(columns.fixed, vec!["address", "display_name", "a/b"]);
        assert!(columns.dynamic.is_empty());
    }

    #[test]
    fn test_table_fills_missing() {
        let rows = vec![row(&[("x", json!(1))]), row(&[("y", json!(2))])];
        let report = ReadReport {
            columns: ColumnSet::derive::<&str>(&[], &rows),
            rows,
        };
        let table = report.table();
        assert_eq!(table[0], vec![json!("10.0.0.1"), json!("-"), json!(1), Value::Null]);
        assert_eq!(table[1][3], json!(2));
    }

    #[test]
    fn test_failure_count_ignores_skips() {
        let identity = TargetIdentity {
            index: 0,
            address: "10.0.0.1".to_string(),
            display_name: "-".to_string(),
        };
        let report = PushReport {
            title: "SDK App Deployment: app.tar.gz".to_string(),
            started: Local::now(),
            records: vec![
                PushRecord {
                    target: identity.clone(),
                    outcome: Outcome::Success(Delivery::AfterDisconnect),
                    lines: vec!["ok".to_string()],
                },
                PushRecord {
                    target: identity.clone(),
                    outcome: Outcome::Failed(Failure::new(FailureKind::TransportUnreachable, "x")),
                    lines: vec!["bad".to_string()],
                },
                PushRecord {
                    target: identity,
                    outcome: Outcome::Skipped(SkipReason::MissingCredentials),
                    lines: vec!["skip".to_string()],
                },
            ],
        };
        assert_eq!(report.failure_count(), 1);

        let transcript = report.transcript();
        assert_eq!(transcript[0], "SDK App Deployment: app.tar.gz");
        assert!(transcript[1].starts_with("Started: "));
        assert_eq!(&transcript[3..], ["ok", "", "bad", "", "skip", ""]);
    }
}
