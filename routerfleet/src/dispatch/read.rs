//! Read queries: `GET` each path on each target and tabulate the results.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, info};
use serde_json::Value;

use super::outcome::{ColumnSet, ReadReport, Row, TargetIdentity};
use super::pool::fan_out;
use super::Fleet;
use crate::config::ConcurrencyProfile;
use crate::error::{DispatchError, Result};
use crate::path::{display_text, display_value, expand, PathExpression};
use crate::target::Target;
use crate::transport::{ApiRequest, DeviceApi, FileTransfer};

impl<A: DeviceApi, F: FileTransfer> Fleet<A, F> {
    /// `GET` every path on every target.
    ///
    /// Literal paths are requested as-is and land in a column named after
    /// the path. A wildcard path is requested up to its first wildcard
    /// segment and the rest is expanded locally, giving one column per
    /// concrete match. Per-target failures become `Failed: <message>` cells;
    /// the report always has one row per target, in input order.
    pub async fn dispatch_read<S: AsRef<str>>(&self, targets: &[Target], paths: &[S]) -> Result<ReadReport> {
        let expressions = parse_expressions(paths)?;
        if expressions.is_empty() {
            return Err(DispatchError::NoPaths.into());
        }

        let limit = self
            .config
            .concurrency_limit(targets.len(), ConcurrencyProfile::Command);
        info!(
            "read: {} path(s) across {} target(s), concurrency {}",
            expressions.len(),
            targets.len(),
            limit
        );

        let expressions = Arc::new(expressions);
        let timeout = self.config.http_timeout;
        let prepared = self.prepare(targets);

        let results = fan_out(&prepared, limit, |index, target| {
            let api = self.api.clone();
            let expressions = expressions.clone();
            async move {
                if let Err(reason) = target.validate() {
                    info!("read: skipping target {} ({})", index, reason);
                    return fill(&expressions, &format!("Skipped: {}", reason));
                }
                read_target(api.as_ref(), &target, &expressions, timeout).await
            }
        })
        .await;

        let rows: Vec<Row> = prepared
            .iter()
            .zip(results)
            .enumerate()
            .map(|(index, (target, result))| {
                let mut row = Row::new(&TargetIdentity::of(index, target));
                row.cells = match result {
                    Ok(cells) => cells,
                    Err(fault) => fill(&expressions, &format!("Failed: {}", fault.message)),
                };
                row
            })
            .collect();

        let literal_paths: Vec<&str> = expressions
            .iter()
            .filter(|e| !e.has_wildcard())
            .map(PathExpression::as_str)
            .collect();
        let columns = ColumnSet::derive(&literal_paths, &rows);

        Ok(ReadReport { rows, columns })
    }
}

/// Parse non-blank paths, in order.
pub(super) fn parse_expressions<S: AsRef<str>>(paths: &[S]) -> Result<Vec<PathExpression>> {
    let expressions = paths
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .map(PathExpression::parse)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(expressions)
}

/// Query every expression on one target.
pub(super) async fn read_target<A: DeviceApi>(
    api: &A,
    target: &Target,
    expressions: &[PathExpression],
    timeout: Duration,
) -> IndexMap<String, Value> {
    let mut cells = IndexMap::new();

    for expression in expressions {
        let raw = expression.as_str().to_string();
        let (request_path, remainder) = match expression.split_at_wildcard() {
            Ok(split) => split,
            Err(e) => {
                cells.insert(raw, Value::String(format!("Failed: {}", e)));
                continue;
            }
        };

        let outcome = api
            .call(target, &ApiRequest::get(request_path.clone(), timeout))
            .await;

        match outcome {
            Ok(payload) => {
                let value = payload.into_value();
                if !remainder.is_empty() && matches!(value, Value::Object(_) | Value::Array(_)) {
                    for found in expand(&value, &request_path, remainder) {
                        cells.insert(found.path, display_value(&found.value));
                    }
                } else {
                    cells.insert(raw, Value::String(display_text(&value)));
                }
            }
            Err(failure) => {
                debug!("read {} on {}: {}", raw, target.host(), failure);
                cells.insert(raw, Value::String(format!("Failed: {}", failure.message)));
            }
        }
    }

    cells
}

/// The same cell text for every requested path.
fn fill(expressions: &[PathExpression], text: &str) -> IndexMap<String, Value> {
    expressions
        .iter()
        .map(|e| (e.as_str().to_string(), Value::String(text.to_string())))
        .collect()
}
