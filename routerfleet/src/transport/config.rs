//! SSH transfer configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Remote directory that triggers SDK app installation on the router.
pub const REMOTE_UPLOAD_DIR: &str = "/app_upload";

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default)]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys. Connection fails if the host
    /// is not already in known_hosts.
    Strict,

    /// Accept and auto-learn unknown keys, but reject changed keys.
    AcceptNew,

    /// Accept all keys without checking, like the external tool's
    /// `StrictHostKeyChecking=no`.
    #[default]
    Disabled,
}

/// Settings for the native SSH transfer.
#[derive(Debug, Clone)]
pub struct SshSettings {
    /// Connect and inactivity timeout.
    pub timeout: Duration,

    /// Host key verification mode.
    pub host_key_verification: HostKeyVerification,

    /// Path to known_hosts file; `None` uses the user's default.
    pub known_hosts_path: Option<PathBuf>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
        }
    }
}
