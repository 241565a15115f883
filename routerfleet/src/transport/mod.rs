//! Transports used to reach a device.
//!
//! Two seams: [`DeviceApi`] for the HTTP management API and [`FileTransfer`]
//! for SCP pushes. The dispatcher is generic over both so tests can swap in
//! fakes; production uses [`HttpDeviceApi`] with either the external
//! [`ScpCommand`] or the native [`SshScp`].

pub mod config;
mod http;
mod scp;
mod ssh;

pub use config::{HostKeyVerification, SshSettings, REMOTE_UPLOAD_DIR};
pub use http::{ApiMethod, ApiRequest, DeviceApi, HttpDeviceApi, UploadRequest};
pub use scp::ScpCommand;
pub use ssh::SshScp;

use std::future::Future;
use std::path::Path;

use crate::classify::TransferOutput;
use crate::error::TransportError;
use crate::target::Target;

/// Pushes one local file to a device's upload directory over SSH.
///
/// Implementations report what happened as a [`TransferOutput`] and leave
/// the success decision to [`classify_transfer`](crate::classify::classify_transfer).
/// An `Err` means the transfer could not even be started (missing tool,
/// unreadable local file).
pub trait FileTransfer: Send + Sync + 'static {
    /// Push `local_file` to `target` on `ssh_port`.
    fn push(
        &self,
        target: &Target,
        ssh_port: u16,
        local_file: &Path,
    ) -> impl Future<Output = Result<TransferOutput, TransportError>> + Send;
}
