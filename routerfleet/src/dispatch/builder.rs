//! Builder for creating a [`Fleet`].

use std::sync::Arc;
use std::time::Duration;

use super::Fleet;
use crate::config::FleetConfig;
use crate::error::Result;
use crate::metrics::TransportMetrics;
use crate::transport::{DeviceApi, FileTransfer, HttpDeviceApi, ScpCommand, SshScp, SshSettings};

/// Builder for constructing a [`Fleet`].
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use routerfleet::Fleet;
///
/// # fn example() -> Result<(), routerfleet::Error> {
/// let fleet = Fleet::builder()
///     .http_timeout(Duration::from_secs(10))
///     .concurrency(4, 16, 32)
///     .default_username("admin")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct FleetBuilder {
    config: FleetConfig,
    client: Option<reqwest::Client>,
    metrics: Option<Arc<TransportMetrics>>,
}

impl FleetBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all settings at once, e.g. with a parsed config file.
    pub fn config(mut self, config: FleetConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the per-call HTTP timeout (default: 15s).
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.config.http_timeout = timeout;
        self
    }

    /// Set the discovery probe timeout (default: 2s).
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.discovery_timeout = timeout;
        self
    }

    /// Set the number of extra discovery attempts (default: 1).
    pub fn discovery_retries(mut self, retries: u32) -> Self {
        self.config.discovery_retries = retries;
        self
    }

    /// Set the multipart upload timeout (default: 120s).
    pub fn upload_timeout(mut self, timeout: Duration) -> Self {
        self.config.upload_timeout = timeout;
        self
    }

    /// Set the SCP push timeout (default: 30s).
    pub fn transfer_timeout(mut self, timeout: Duration) -> Self {
        self.config.transfer_timeout = timeout;
        self
    }

    /// Set the concurrency clamp: at least `min` workers, at most
    /// `command` for commands/reads/pushes and `probe` for probes.
    pub fn concurrency(mut self, min: usize, command: usize, probe: usize) -> Self {
        self.config.min_concurrency = min;
        self.config.command_concurrency = command;
        self.config.probe_concurrency = probe;
        self
    }

    /// Set the username used for targets that have none.
    pub fn default_username(mut self, username: impl Into<String>) -> Self {
        self.config.default_username = username.into();
        self
    }

    /// Set the `sshpass` executable.
    pub fn sshpass_path(mut self, path: impl Into<String>) -> Self {
        self.config.sshpass_path = path.into();
        self
    }

    /// Set the `pscp` executable.
    pub fn pscp_path(mut self, path: impl Into<String>) -> Self {
        self.config.pscp_path = path.into();
        self
    }

    /// Probe each device over HTTP before an SCP push.
    pub fn probe_before_push(mut self, probe: bool) -> Self {
        self.config.probe_before_push = probe;
        self
    }

    /// Use a preconfigured reqwest client.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Report HTTP traffic into `metrics`.
    pub fn metrics(mut self, metrics: Arc<TransportMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build with the reqwest API client and the external `scp` tool.
    pub fn build(self) -> Result<Fleet> {
        let transfer = ScpCommand::from_config(&self.config);
        let api = self.http_api()?;
        self.build_with(api, transfer)
    }

    /// Build with the reqwest API client and the native russh SCP sink.
    pub fn build_native_ssh(self, settings: SshSettings) -> Result<Fleet<HttpDeviceApi, SshScp>> {
        let api = self.http_api()?;
        self.build_with(api, SshScp::new(settings))
    }

    /// Build with caller-supplied transports.
    pub fn build_with<A: DeviceApi, F: FileTransfer>(self, api: A, transfer: F) -> Result<Fleet<A, F>> {
        self.config.validate()?;
        Ok(Fleet::new(self.config, api, transfer))
    }

    fn http_api(&self) -> Result<HttpDeviceApi> {
        let api = match &self.client {
            Some(client) => HttpDeviceApi::with_client(client.clone()),
            None => HttpDeviceApi::new()?,
        };
        Ok(match &self.metrics {
            Some(metrics) => api.with_metrics(metrics.clone()),
            None => api,
        })
    }
}
