//! Concurrent fan-out of one operation across many targets.
//!
//! A [`Fleet`] holds the transports and settings; it keeps no state between
//! calls. Every dispatch returns exactly one result per submitted target,
//! in submission order, whatever happened to the individual calls.
//!
//! # Example
//!
//! ```rust,no_run
//! use routerfleet::{Fleet, Target};
//!
//! # async fn example() -> Result<(), routerfleet::Error> {
//! let fleet = Fleet::builder().build()?;
//! let targets = vec![
//!     Target::new("192.168.0.1").credentials("admin", "secret"),
//!     Target::new("192.168.0.2").credentials("admin", "secret"),
//! ];
//!
//! let report = fleet
//!     .dispatch_read(&targets, &["status/product_info/product_name", "status/wan/devices/mdm*/status"])
//!     .await?;
//! for row in report.table() {
//!     println!("{:?}", row);
//! }
//! # Ok(())
//! # }
//! ```

mod builder;
mod command;
mod discovery;
mod input;
mod outcome;
mod pool;
mod push;
mod read;

pub use builder::FleetBuilder;
pub use discovery::{expand_address_range, fetch_router_info, Discovered, Refreshed, RouterInfo};
pub use input::{parse_path_list, parse_payload};
pub use outcome::{
    ColumnSet, Delivery, Outcome, PushRecord, PushReport, ReadReport, Row, TargetIdentity,
    TargetOutcome, ADDRESS_COLUMN, DISPLAY_NAME_COLUMN,
};
pub use push::{DeploymentKind, DEFAULT_SSH_PORT};

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::config::FleetConfig;
use crate::error::Result;
use crate::target::Target;
use crate::transport::{ApiMethod, DeviceApi, FileTransfer, HttpDeviceApi, ScpCommand};

/// What to do on every target.
#[derive(Debug, Clone)]
pub enum OperationDescriptor {
    /// `GET` each path; wildcard paths are expanded locally.
    ReadQuery { paths: Vec<String> },

    /// One API call per target.
    WriteCommand {
        path: String,
        payload: Option<Value>,
        method: ApiMethod,
    },

    /// SCP a local file to each target's upload directory.
    FilePush { local_file: PathBuf, ssh_port: u16 },

    /// Multipart-upload a local file to a deploy endpoint.
    HttpUpload {
        kind: DeploymentKind,
        local_file: PathBuf,
    },
}

impl OperationDescriptor {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            OperationDescriptor::ReadQuery { .. } => "read",
            OperationDescriptor::WriteCommand { .. } => "command",
            OperationDescriptor::FilePush { .. } => "file push",
            OperationDescriptor::HttpUpload { .. } => "http upload",
        }
    }
}

/// Result of [`Fleet::dispatch`], one entry per target in input order.
#[derive(Debug, Clone)]
pub enum DispatchResult {
    Read(ReadReport),
    Command(Vec<TargetOutcome>),
    Push(PushReport),
}

impl DispatchResult {
    /// Number of per-target entries.
    pub fn len(&self) -> usize {
        match self {
            DispatchResult::Read(report) => report.rows.len(),
            DispatchResult::Command(outcomes) => outcomes.len(),
            DispatchResult::Push(report) => report.records.len(),
        }
    }

    /// Check if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Dispatcher over a fleet of devices.
///
/// Cheap to clone; transports and settings are shared.
#[derive(Debug)]
pub struct Fleet<A = HttpDeviceApi, F = ScpCommand> {
    config: Arc<FleetConfig>,
    api: Arc<A>,
    transfer: Arc<F>,
}

impl<A, F> Clone for Fleet<A, F> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            api: self.api.clone(),
            transfer: self.transfer.clone(),
        }
    }
}

impl Fleet {
    /// Start building a fleet with the default transports.
    pub fn builder() -> FleetBuilder {
        FleetBuilder::new()
    }
}

impl<A: DeviceApi, F: FileTransfer> Fleet<A, F> {
    /// Assemble a fleet from explicit parts. Prefer [`FleetBuilder`], which
    /// validates the config.
    pub fn new(config: FleetConfig, api: A, transfer: F) -> Self {
        Self {
            config: Arc::new(config),
            api: Arc::new(api),
            transfer: Arc::new(transfer),
        }
    }

    /// Settings in use.
    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// The HTTP transport.
    pub fn api(&self) -> &A {
        &self.api
    }

    /// The file-transfer transport.
    pub fn transfer(&self) -> &F {
        &self.transfer
    }

    /// Run `operation` against every target.
    pub async fn dispatch(&self, targets: &[Target], operation: &OperationDescriptor) -> Result<DispatchResult> {
        match operation {
            OperationDescriptor::ReadQuery { paths } => {
                self.dispatch_read(targets, paths).await.map(DispatchResult::Read)
            }
            OperationDescriptor::WriteCommand {
                path,
                payload,
                method,
            } => self
                .dispatch_command(targets, *method, path, payload.clone())
                .await
                .map(DispatchResult::Command),
            OperationDescriptor::FilePush {
                local_file,
                ssh_port,
            } => self
                .dispatch_file_push(targets, *ssh_port, local_file)
                .await
                .map(DispatchResult::Push),
            OperationDescriptor::HttpUpload { kind, local_file } => self
                .dispatch_http_upload(targets, *kind, local_file)
                .await
                .map(DispatchResult::Push),
        }
    }

    /// Copies of `targets` with the default username filled in.
    fn prepare(&self, targets: &[Target]) -> Vec<Target> {
        targets
            .iter()
            .map(|target| {
                let mut target = target.clone();
                if target.username.trim().is_empty() {
                    target.username = self.config.default_username.clone();
                } else {
                    target.username = target.username.trim().to_string();
                }
                target
            })
            .collect()
    }
}
