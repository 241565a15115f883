//! Fleet-wide settings: timeouts, concurrency bounds, retries, tool paths.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::target::DEFAULT_HTTP_PORT;

/// Which upper bound applies to a fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyProfile {
    /// Commands, reads and pushes.
    Command,
    /// Lightweight read-only probes (discovery, info refresh).
    Probe,
}

/// Settings shared by every dispatch issued through one [`Fleet`](crate::Fleet).
///
/// Durations are given in seconds when read from JSON:
///
/// ```rust
/// use routerfleet::FleetConfig;
///
/// let config = FleetConfig::from_json_str(r#"{"connection_timeout": 3, "connection_retries": 2}"#).unwrap();
/// assert_eq!(config.discovery_retries, 2);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Timeout for one HTTP API call.
    #[serde(with = "secs")]
    pub http_timeout: Duration,

    /// Timeout for one discovery or info probe.
    #[serde(rename = "connection_timeout", with = "secs")]
    pub discovery_timeout: Duration,

    /// Extra attempts for a discovery probe before giving up.
    #[serde(rename = "connection_retries")]
    pub discovery_retries: u32,

    /// Timeout for one HTTP multipart upload.
    #[serde(with = "secs")]
    pub upload_timeout: Duration,

    /// Timeout for one SCP push.
    #[serde(with = "secs")]
    pub transfer_timeout: Duration,

    /// Lower concurrency clamp.
    pub min_concurrency: usize,

    /// Upper concurrency clamp for commands, reads and pushes.
    pub command_concurrency: usize,

    /// Upper concurrency clamp for read-only probes.
    pub probe_concurrency: usize,

    /// Username used when a target has none.
    pub default_username: String,

    /// HTTP port used by discovery when none is given.
    pub default_http_port: u16,

    /// Largest address range discovery will expand.
    pub max_discovery_addresses: usize,

    /// `sshpass` executable.
    pub sshpass_path: String,

    /// `pscp.exe` executable (Windows).
    pub pscp_path: String,

    /// Issue an HTTP identity probe before each SCP push.
    pub probe_before_push: bool,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(15),
            discovery_timeout: Duration::from_secs(2),
            discovery_retries: 1,
            upload_timeout: Duration::from_secs(120),
            transfer_timeout: Duration::from_secs(30),
            min_concurrency: 4,
            command_concurrency: 16,
            probe_concurrency: 32,
            default_username: "admin".to_string(),
            default_http_port: DEFAULT_HTTP_PORT,
            max_discovery_addresses: 512,
            sshpass_path: "sshpass".to_string(),
            pscp_path: "pscp.exe".to_string(),
            probe_before_push: false,
        }
    }
}

impl FleetConfig {
    /// Parse the JSON form; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: FleetConfig = serde_json::from_str(json).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject unusable concurrency bounds.
    pub fn validate(&self) -> Result<()> {
        let max = self.command_concurrency.min(self.probe_concurrency);
        if self.min_concurrency == 0 || self.min_concurrency > max {
            return Err(ConfigError::InvalidConcurrency {
                min: self.min_concurrency,
                max,
            }
            .into());
        }
        Ok(())
    }

    /// Worker count for a fan-out over `target_count` targets.
    pub fn concurrency_limit(&self, target_count: usize, profile: ConcurrencyProfile) -> usize {
        let high = match profile {
            ConcurrencyProfile::Command => self.command_concurrency,
            ConcurrencyProfile::Probe => self.probe_concurrency,
        };
        concurrency_limit(target_count, self.min_concurrency, high)
    }
}

/// `clamp(target_count, low, high)`, always at least `low`.
pub fn concurrency_limit(target_count: usize, low: usize, high: usize) -> usize {
    target_count.min(high).max(low)
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        // Rejects negative, non-finite and out-of-range values.
        Duration::try_from_secs_f64(f64::deserialize(deserializer)?).map_err(serde::de::Error::custom)
    }
}
