//! # Routerfleet
//!
//! Async fan-out engine for managing fleets of routers through their HTTP
//! management API and SCP.
//!
//! One operation is dispatched across many devices at once, with bounded
//! concurrency, and every device gets exactly one result row in submission
//! order, whether it answered, timed out, refused the connection or was
//! skipped for lack of credentials.
//!
//! ## Features
//!
//! - Read queries with wildcard paths (`status/wan/devices/mdm*/status`)
//!   expanded per device into concrete columns
//! - Write commands (`GET`/`PUT`/`POST`/`DELETE`) across the fleet
//! - File push over SCP (external `sshpass`/`pscp` or native russh), with a
//!   per-device transcript and lost-connection tolerance
//! - HTTP firmware, license and config uploads
//! - Address range discovery and identity refresh
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use routerfleet::{ApiMethod, Fleet, Target};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), routerfleet::Error> {
//!     let fleet = Fleet::builder().default_username("admin").build()?;
//!
//!     let targets = vec![
//!         Target::new("192.168.0.1").credentials("", "secret"),
//!         Target::new("192.168.0.2").credentials("", "secret"),
//!     ];
//!
//!     let outcomes = fleet
//!         .dispatch_command(&targets, ApiMethod::Put, "control/system/reboot", Some(true.into()))
//!         .await?;
//!     for outcome in &outcomes {
//!         println!("{}: {}", outcome.target.address, outcome.outcome.status_text());
//!     }
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod inventory;
pub mod metrics;
pub mod path;
pub mod target;
pub mod transport;

// Re-export main types for convenience
pub use classify::{Failure, FailureKind, Payload};
pub use config::FleetConfig;
pub use dispatch::{
    DeploymentKind, DispatchResult, Fleet, FleetBuilder, OperationDescriptor, Outcome, PushReport,
    ReadReport, Refreshed, TargetOutcome,
};
pub use error::{Error, Result};
pub use inventory::{Inventory, RouterRecord};
pub use metrics::TransportMetrics;
pub use path::{resolve_wildcard_path, MatchResult, PathExpression};
pub use target::{SkipReason, Target};
pub use transport::{ApiMethod, SshSettings};
