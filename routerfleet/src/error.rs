//! Error types for routerfleet.
//!
//! Only caller mistakes and setup problems are reported through [`Error`].
//! Anything that goes wrong while talking to one device is folded into that
//! device's outcome as a [`Failure`](crate::classify::Failure) instead.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for routerfleet operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level errors (HTTP, SSH, external tools)
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Path expression errors
    #[error("Path error: {0}")]
    Path(#[from] PathError),

    /// Dispatch request errors
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Transport layer errors (HTTP client, SSH session, file-transfer tool).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// Server host key does not match known_hosts
    #[error("Host key for {host}:{port} has changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// Server host key is not in known_hosts and verification is strict
    #[error("Host key for {host}:{port} is not in known_hosts")]
    HostKeyUnknown { host: String, port: u16 },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// The remote side closed the session
    #[error("Connection disconnected")]
    Disconnected,

    /// External file-transfer tool could not be started
    #[error("{tool} not found: {source}")]
    ToolNotFound {
        tool: String,
        #[source]
        source: io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Path expression errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Expression has no segments
    #[error("path is empty")]
    Empty,

    /// First segment is a wildcard, so there is no parent object to enumerate
    #[error("path must have segment before *: '{expression}'")]
    LeadingWildcard { expression: String },
}

/// Errors in the request handed to the dispatcher, detected before any
/// device is contacted.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A read was requested without any paths
    #[error("Enter at least one path for GET")]
    NoPaths,

    /// A command was requested with an empty path
    #[error("Enter path")]
    EmptyPath,

    /// Unsupported HTTP method name
    #[error("Invalid method '{method}'")]
    InvalidMethod { method: String },

    /// Payload text is not JSON
    #[error("Invalid JSON payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// Unknown deployment kind name
    #[error("Invalid deploy type '{kind}'")]
    InvalidDeployment { kind: String },

    /// Local file to push does not exist
    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// Discovery was requested without a password
    #[error("Password required")]
    MissingPassword,

    /// Address range expanded to nothing
    #[error("No valid IP addresses from range '{spec}'")]
    NoAddresses { spec: String },

    /// Address range is larger than allowed
    #[error("Too many IPs ({count}, max {max}). Use a smaller range.")]
    TooManyAddresses { count: usize, max: usize },

    /// Inventory selection contained no usable index
    #[error("No valid router selection")]
    InvalidSelection,
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Concurrency bounds are unusable
    #[error("Invalid concurrency bounds: min {min}, max {max}")]
    InvalidConcurrency { min: usize, max: usize },

    /// Config document could not be parsed
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type alias using routerfleet's Error.
pub type Result<T> = std::result::Result<T, Error>;
