//! In-memory router inventory shared between dispatch callers.
//!
//! The dispatcher never touches this; callers take [`Target`]s out of it
//! with [`Inventory::select`] and write results back with
//! [`Inventory::merge_info`], [`Inventory::merge_read`],
//! [`Inventory::merge_refreshed`] or [`Inventory::upsert_discovered`]. All writes
//! go through one lock, so two operations never update the same record at
//! the same time.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use log::debug;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::dispatch::{Discovered, ReadReport, Refreshed, RouterInfo, TargetOutcome};
use crate::error::{DispatchError, Result};
use crate::target::Target;

/// One inventory entry.
#[derive(Debug, Clone)]
pub struct RouterRecord {
    pub target: Target,
    pub info: RouterInfo,
    /// Set when the last probe got an answer.
    pub online: bool,
    /// API path columns copied in from reads, keyed by column.
    pub cells: IndexMap<String, Value>,
}

impl RouterRecord {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            info: RouterInfo::default(),
            online: false,
            cells: IndexMap::new(),
        }
    }

    fn host(&self) -> &str {
        self.target.host()
    }

    fn apply_info(&mut self, info: &RouterInfo) {
        self.online = info.is_identified();
        if !info.hostname.is_empty() {
            self.target.display_name = info.hostname.clone();
        }
        self.info = info.clone();
    }
}

/// Cloneable handle to the router list.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    records: Arc<RwLock<Vec<RouterRecord>>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from already-known routers, e.g. loaded by the caller.
    pub fn from_targets(targets: impl IntoIterator<Item = Target>) -> Self {
        let records = targets.into_iter().map(RouterRecord::new).collect();
        Self {
            records: Arc::new(RwLock::new(records)),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Copy of every record.
    pub async fn snapshot(&self) -> Vec<RouterRecord> {
        self.records.read().await.clone()
    }

    /// Targets at `indices`, in selection order.
    ///
    /// Out-of-range indices are dropped; a selection with nothing left is
    /// an error.
    pub async fn select(&self, indices: &[usize]) -> Result<Vec<Target>> {
        let records = self.records.read().await;
        let selected: Vec<Target> = indices
            .iter()
            .filter_map(|&i| records.get(i))
            .map(|record| record.target.clone())
            .collect();
        if selected.is_empty() {
            return Err(DispatchError::InvalidSelection.into());
        }
        Ok(selected)
    }

    /// Every stored API path column, in first-seen order.
    ///
    /// Feed these to
    /// [`Fleet::refresh_info_with_paths`](crate::Fleet::refresh_info_with_paths)
    /// to bring them up to date.
    pub async fn api_paths(&self) -> Vec<String> {
        let records = self.records.read().await;
        let paths: IndexSet<&String> = records.iter().flat_map(|r| r.cells.keys()).collect();
        paths.into_iter().cloned().collect()
    }

    /// Apply [`Fleet::refresh_info`](crate::Fleet::refresh_info) results by
    /// address. Returns the number of records updated.
    ///
    /// Successful probes replace the stored info; the display name follows
    /// the hostname when the device reported one. Failed and skipped targets
    /// keep their old info.
    pub async fn merge_info(&self, outcomes: &[TargetOutcome<RouterInfo>]) -> usize {
        let mut records = self.records.write().await;
        let mut updated = 0;

        for outcome in outcomes {
            let Some(info) = outcome.outcome.success() else {
                continue;
            };
            for record in records
                .iter_mut()
                .filter(|r| r.host() == outcome.target.address)
            {
                record.apply_info(info);
                updated += 1;
            }
        }

        debug!("inventory: merged info into {} record(s)", updated);
        updated
    }

    /// [`merge_info`](Self::merge_info) for
    /// [`Fleet::refresh_info_with_paths`](crate::Fleet::refresh_info_with_paths)
    /// results; re-read cells overwrite the stored ones.
    pub async fn merge_refreshed(&self, refreshed: &[Refreshed]) -> usize {
        let mut records = self.records.write().await;
        let mut updated = 0;

        for entry in refreshed {
            let Some(info) = entry.info.outcome.success() else {
                continue;
            };
            for record in records
                .iter_mut()
                .filter(|r| r.host() == entry.info.target.address)
            {
                record.apply_info(info);
                record
                    .cells
                    .extend(entry.cells.iter().map(|(k, v)| (k.clone(), v.clone())));
                updated += 1;
            }
        }

        debug!("inventory: refreshed {} record(s)", updated);
        updated
    }

    /// Copy a read report's cells into the matching records.
    ///
    /// Rows for targets that were skipped are ignored. Returns the number
    /// of records updated.
    pub async fn merge_read(&self, report: &ReadReport) -> usize {
        let mut records = self.records.write().await;
        let mut updated = 0;

        for row in &report.rows {
            let skipped = row
                .cells
                .values()
                .all(|v| v.as_str().is_some_and(|s| s.starts_with("Skipped: ")));
            if skipped {
                continue;
            }
            for record in records.iter_mut().filter(|r| r.host() == row.address) {
                record
                    .cells
                    .extend(row.cells.iter().map(|(k, v)| (k.clone(), v.clone())));
                updated += 1;
            }
        }

        debug!("inventory: copied read cells into {} record(s)", updated);
        updated
    }

    /// Add routers found by [`Fleet::discover`](crate::Fleet::discover).
    ///
    /// Only addresses that answered are used. A known address gets the new
    /// credentials and info but keeps its path cells; a new one is appended. Returns how many
    /// routers were added or replaced.
    pub async fn upsert_discovered(&self, discovered: &[Discovered]) -> usize {
        let mut records = self.records.write().await;
        let mut changed = 0;

        for found in discovered.iter().filter(|d| d.is_online()) {
            let Some(info) = found.outcome.success() else {
                continue;
            };
            let mut record = RouterRecord {
                target: found.target.clone(),
                info: info.clone(),
                online: true,
                cells: IndexMap::new(),
            };
            match records.iter_mut().find(|r| r.host() == record.host()) {
                Some(existing) => {
                    record.cells = std::mem::take(&mut existing.cells);
                    *existing = record;
                }
                None => records.push(record),
            }
            changed += 1;
        }

        debug!("inventory: {} discovered router(s) stored", changed);
        changed
    }
}
