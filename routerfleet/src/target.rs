//! Device descriptors handed to the dispatcher.

use std::borrow::Cow;
use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Default HTTP management port on Cradlepoint routers.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// One managed device.
///
/// Owned by the inventory; the dispatcher only reads it for the lifetime of
/// one dispatch.
///
/// # Example
///
/// ```rust
/// use routerfleet::Target;
///
/// let target = Target::new("192.168.0.1")
///     .port(8080)
///     .credentials("admin", "secret")
///     .display_name("IBR900-1a2");
/// assert!(target.validate().is_ok());
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Target {
    /// IP address or hostname. A trailing `:port` is ignored.
    pub address: String,

    /// HTTP management port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login name; empty means the configured default.
    #[serde(default)]
    pub username: String,

    /// Login password; empty means the target is skipped.
    #[serde(default = "empty_secret")]
    pub password: SecretString,

    /// Name shown next to the address in results.
    #[serde(default)]
    pub display_name: String,
}

fn default_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

impl Target {
    /// Create a target with no credentials on the default port.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: DEFAULT_HTTP_PORT,
            username: String::new(),
            password: empty_secret(),
            display_name: String::new(),
        }
    }

    /// Set the HTTP management port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set username and password.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = SecretString::from(password.into());
        self
    }

    /// Set the display name.
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Host part of the address, without any `:port` suffix or IPv6
    /// brackets.
    pub fn host(&self) -> &str {
        let address = self.address.trim();
        if let Some((host, _)) = address.strip_prefix('[').and_then(|rest| rest.split_once(']')) {
            return host;
        }
        match address.split_once(':') {
            // Bracketless IPv6 has several colons; leave it alone.
            Some((host, rest)) if !rest.contains(':') => host,
            _ => address,
        }
    }

    /// Username, or `default` when none is set.
    pub fn username_or<'a>(&'a self, default: &'a str) -> &'a str {
        let username = self.username.trim();
        if username.is_empty() { default } else { username }
    }

    /// Expose the password for a transport call.
    pub(crate) fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Display name, or `-` when none is set.
    pub fn label(&self) -> &str {
        let name = self.display_name.trim();
        if name.is_empty() { "-" } else { name }
    }

    /// Host as written in a URL or an scp destination.
    pub fn url_host(&self) -> Cow<'_, str> {
        let host = self.host();
        if host.contains(':') {
            Cow::Owned(format!("[{}]", host))
        } else {
            Cow::Borrowed(host)
        }
    }

    /// Base URL of the HTTP management API.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.url_host(), self.port)
    }

    /// Check that the target can be attempted at all.
    pub fn validate(&self) -> Result<(), SkipReason> {
        if self.host().is_empty() {
            return Err(SkipReason::NoAddress);
        }
        if self.password().trim().is_empty() {
            return Err(SkipReason::MissingCredentials);
        }
        Ok(())
    }
}

/// Why a target was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SkipReason {
    /// Address is empty.
    NoAddress,
    /// Password is empty.
    MissingCredentials,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoAddress => f.write_str("no address"),
            SkipReason::MissingCredentials => f.write_str("missing credentials"),
        }
    }
}
