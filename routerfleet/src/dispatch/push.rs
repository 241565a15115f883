//! File pushes: SCP to `/app_upload`, or multipart upload to a deploy
//! endpoint. Both produce a timestamped transcript per target.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use chrono::Local;
use log::{debug, info};
use serde::Serialize;

use super::outcome::{Delivery, Outcome, PushRecord, PushReport, TargetIdentity};
use super::pool::fan_out;
use super::Fleet;
use crate::classify::{classify_transfer, Failure, Payload, TransferVerdict};
use crate::config::{ConcurrencyProfile, FleetConfig};
use crate::error::{DispatchError, Result, TransportError};
use crate::target::{SkipReason, Target};
use crate::transport::{ApiRequest, DeviceApi, FileTransfer, UploadRequest, REMOTE_UPLOAD_DIR};

/// SSH port used when none is given.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Timestamp format of transcript lines.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What a deploy file is, and where it goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeploymentKind {
    /// Feature license, uploaded to `feature`.
    License,
    /// NCOS firmware image, uploaded to `fw_upgrade`.
    Ncos,
    /// Configuration archive, uploaded to `config_save`.
    Configuration,
    /// SDK application archive, always pushed over SCP.
    SdkApp,
}

impl DeploymentKind {
    /// Deploy endpoint under the device root.
    pub fn endpoint(&self) -> &'static str {
        match self {
            DeploymentKind::License => "feature",
            DeploymentKind::Ncos => "fw_upgrade",
            DeploymentKind::Configuration => "config_save",
            DeploymentKind::SdkApp => "app_upload",
        }
    }

    /// Usual file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            DeploymentKind::License => ".lic",
            DeploymentKind::Ncos | DeploymentKind::Configuration => ".bin",
            DeploymentKind::SdkApp => ".tar.gz",
        }
    }

    /// Human-readable label used in transcript titles.
    pub fn label(&self) -> &'static str {
        match self {
            DeploymentKind::License => "License",
            DeploymentKind::Ncos => "NCOS",
            DeploymentKind::Configuration => "Configuration",
            DeploymentKind::SdkApp => "SDK App Deployment",
        }
    }

    /// Check if this kind goes over SCP instead of HTTP.
    pub fn uses_scp(&self) -> bool {
        matches!(self, DeploymentKind::SdkApp)
    }
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeploymentKind::License => "licenses",
            DeploymentKind::Ncos => "ncos",
            DeploymentKind::Configuration => "configuration",
            DeploymentKind::SdkApp => "sdk_apps",
        })
    }
}

impl FromStr for DeploymentKind {
    type Err = DispatchError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "licenses" | "license" => Ok(DeploymentKind::License),
            "ncos" => Ok(DeploymentKind::Ncos),
            "configuration" => Ok(DeploymentKind::Configuration),
            "sdk_apps" | "sdk_app" => Ok(DeploymentKind::SdkApp),
            _ => Err(DispatchError::InvalidDeployment {
                kind: s.to_string(),
            }),
        }
    }
}

/// Transcript lines for one target, each prefixed with the local time.
struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    fn new(header: String) -> Self {
        Self {
            lines: vec![header],
        }
    }

    fn log(&mut self, message: impl fmt::Display) {
        self.lines
            .push(format!("{} {}", Local::now().format(TIMESTAMP_FORMAT), message));
    }
}

impl<A: DeviceApi, F: FileTransfer> Fleet<A, F> {
    /// SCP `local_file` to `/app_upload` on every target over `ssh_port`.
    ///
    /// The SSH port is independent of each target's HTTP port. A push that
    /// ends in "lost connection" without any network-failure phrase counts as
    /// delivered, since the device drops the session once it has the file.
    pub async fn dispatch_file_push(&self, targets: &[Target], ssh_port: u16, local_file: &Path) -> Result<PushReport> {
        let local_file = check_local_file(local_file).await?;
        let title = format!("{}: {}", DeploymentKind::SdkApp.label(), file_name(&local_file));
        let limit = self
            .config
            .concurrency_limit(targets.len(), ConcurrencyProfile::Command);
        info!(
            "file push: {} to {} target(s) on port {}, concurrency {}",
            local_file.display(),
            targets.len(),
            ssh_port,
            limit
        );

        let started = Local::now();
        let local_file = Arc::new(local_file);
        let prepared = self.prepare(targets);

        let results = fan_out(&prepared, limit, |index, target| {
            let api = self.api.clone();
            let transfer = self.transfer.clone();
            let config = self.config.clone();
            let local_file = local_file.clone();
            async move {
                push_one(
                    api.as_ref(),
                    transfer.as_ref(),
                    &config,
                    index,
                    &target,
                    ssh_port,
                    &local_file,
                )
                .await
            }
        })
        .await;

        Ok(PushReport {
            title,
            started,
            records: collect_records(&prepared, results, Some(ssh_port)),
        })
    }

    /// Multipart-upload `local_file` to the `kind` endpoint on every target.
    ///
    /// [`DeploymentKind::SdkApp`] is routed to
    /// [`dispatch_file_push`](Self::dispatch_file_push) on [`DEFAULT_SSH_PORT`].
    pub async fn dispatch_http_upload(
        &self,
        targets: &[Target],
        kind: DeploymentKind,
        local_file: &Path,
    ) -> Result<PushReport> {
        if kind.uses_scp() {
            return self
                .dispatch_file_push(targets, DEFAULT_SSH_PORT, local_file)
                .await;
        }

        let local_file = check_local_file(local_file).await?;
        let title = format!("{}: {}", kind.label(), file_name(&local_file));
        let limit = self
            .config
            .concurrency_limit(targets.len(), ConcurrencyProfile::Command);
        info!(
            "http upload: {} to {} on {} target(s), concurrency {}",
            local_file.display(),
            kind.endpoint(),
            targets.len(),
            limit
        );

        let started = Local::now();
        let upload = Arc::new(UploadRequest {
            endpoint: kind.endpoint().to_string(),
            local_file,
            timeout: self.config.upload_timeout,
        });
        let prepared = self.prepare(targets);

        let results = fan_out(&prepared, limit, |index, target| {
            let api = self.api.clone();
            let config = self.config.clone();
            let upload = upload.clone();
            async move { upload_one(api.as_ref(), &config, index, &target, &upload).await }
        })
        .await;

        Ok(PushReport {
            title,
            started,
            records: collect_records(&prepared, results, None),
        })
    }
}

async fn check_local_file(local_file: &Path) -> Result<PathBuf> {
    match tokio::fs::metadata(local_file).await {
        Ok(meta) if meta.is_file() => Ok(local_file.to_path_buf()),
        _ => Err(DispatchError::FileNotFound {
            path: local_file.to_path_buf(),
        }
        .into()),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn skipped(identity: TargetIdentity, reason: SkipReason) -> PushRecord {
    info!("push: skipping target {} ({})", identity.index, reason);
    PushRecord {
        target: identity,
        outcome: Outcome::Skipped(reason),
        lines: vec![format!("--- Skipped ({}) ---", reason)],
    }
}

/// Records in input order; a faulted worker gets a one-line failure transcript.
fn collect_records(
    prepared: &[Target],
    results: Vec<std::result::Result<PushRecord, Failure>>,
    ssh_port: Option<u16>,
) -> Vec<PushRecord> {
    prepared
        .iter()
        .zip(results)
        .enumerate()
        .map(|(index, (target, result))| {
            result.unwrap_or_else(|fault| {
                let mut transcript = Transcript::new(header(target, ssh_port.unwrap_or(target.port)));
                transcript.log(format_args!("*** FAILURE *** {}", fault.message));
                PushRecord {
                    target: TargetIdentity::of(index, target),
                    outcome: Outcome::Failed(fault),
                    lines: transcript.lines,
                }
            })
        })
        .collect()
}

fn header(target: &Target, port: u16) -> String {
    format!("--- {}@{}:{} ---", target.username, target.host(), port)
}

/// First string field of a JSON object, or `default`.
fn field(payload: &Payload, key: &str, default: &str) -> String {
    payload
        .as_json()
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default)
        .to_string()
}

async fn push_one<A: DeviceApi, F: FileTransfer>(
    api: &A,
    transfer: &F,
    config: &FleetConfig,
    index: usize,
    target: &Target,
    ssh_port: u16,
    local_file: &Path,
) -> PushRecord {
    let identity = TargetIdentity::of(index, target);
    if let Err(reason) = target.validate() {
        return skipped(identity, reason);
    }

    let mut transcript = Transcript::new(header(target, ssh_port));
    let fail = |transcript: Transcript, failure: Failure| PushRecord {
        target: identity.clone(),
        outcome: Outcome::Failed(failure),
        lines: transcript.lines,
    };

    if config.probe_before_push {
        let probe = ApiRequest::get("status/product_info", config.http_timeout);
        match api.call(target, &probe).await {
            Ok(payload) => transcript.log(format_args!(
                "Connected to {}: {}",
                target.base_url(),
                field(&payload, "product_name", "N/A")
            )),
            Err(failure) => {
                transcript.log(format_args!(
                    "*** FAILURE *** Cannot connect to {}: {}",
                    target.base_url(),
                    failure.message
                ));
                return fail(transcript, failure);
            }
        }
    }

    let pushed = tokio::time::timeout(
        config.transfer_timeout,
        transfer.push(target, ssh_port, local_file),
    )
    .await;

    let output = match pushed {
        Ok(Ok(output)) => output,
        Ok(Err(error)) => {
            match &error {
                TransportError::ToolNotFound { .. } => transcript.log(format_args!(
                    "*** FAILURE *** SCP tool not found. Install sshpass (macOS/Linux) or pscp.exe (Windows): {}",
                    error
                )),
                _ => transcript.log(format_args!("*** FAILURE *** Exception: {}", error)),
            }
            debug!("push to {}: {}", target.host(), error);
            return fail(transcript, Failure::from_transport(&error));
        }
        Err(_) => {
            let error = TransportError::Timeout(config.transfer_timeout);
            transcript.log(format_args!(
                "*** FAILURE *** SCP timed out after {} seconds for {}:{}",
                config.transfer_timeout.as_secs(),
                target.host(),
                ssh_port
            ));
            return fail(transcript, Failure::from_transport(&error));
        }
    };

    match classify_transfer(&output) {
        TransferVerdict::Failed(failure) => {
            transcript.log(format_args!(
                "*** FAILURE *** {}@{}:{} - {}",
                target.username,
                target.host(),
                REMOTE_UPLOAD_DIR,
                output.detail()
            ));
            debug!("push to {}: {} ({})", target.host(), failure, failure.kind);
            fail(transcript, failure)
        }
        verdict => {
            transcript.log(format_args!("*** SUCCESS *** Pushed to {}:{}", target.host(), ssh_port));
            if !output.stdout.is_empty() {
                transcript.log(&output.stdout);
            }
            if !output.stderr.is_empty() && output.mentions_lost_connection() {
                transcript.log("(Connection closed after transfer - normal for Cradlepoint)");
            }
            let delivery = match verdict {
                TransferVerdict::DeliveredAfterDisconnect => Delivery::AfterDisconnect,
                _ => Delivery::Confirmed,
            };
            PushRecord {
                target: identity,
                outcome: Outcome::Success(delivery),
                lines: transcript.lines,
            }
        }
    }
}

async fn upload_one<A: DeviceApi>(
    api: &A,
    config: &FleetConfig,
    index: usize,
    target: &Target,
    upload: &UploadRequest,
) -> PushRecord {
    let identity = TargetIdentity::of(index, target);
    if let Err(reason) = target.validate() {
        return skipped(identity, reason);
    }

    let mut transcript = Transcript::new(header(target, target.port));
    let base = target.base_url();

    let product = match api
        .call(target, &ApiRequest::get("status/product_info", config.http_timeout))
        .await
    {
        Ok(payload) => payload,
        Err(failure) => {
            transcript.log(format_args!(
                "*** FAILURE *** Cannot connect to {}: {}",
                base, failure.message
            ));
            return PushRecord {
                target: identity,
                outcome: Outcome::Failed(failure),
                lines: transcript.lines,
            };
        }
    };

    let system_id = match api
        .call(target, &ApiRequest::get("config/system/system_id", config.http_timeout))
        .await
    {
        Ok(Payload::Json(serde_json::Value::String(id))) if !id.trim().is_empty() => id,
        _ => "unknown".to_string(),
    };
    transcript.log(format_args!(
        "Connected to {} at {}: {}",
        system_id,
        base,
        field(&product, "product_name", "N/A")
    ));

    match api.upload(target, upload).await {
        Ok(_) => {
            transcript.log(format_args!("*** SUCCESS *** Pushed to {}.", system_id));
            PushRecord {
                target: identity,
                outcome: Outcome::Success(Delivery::Confirmed),
                lines: transcript.lines,
            }
        }
        Err(failure) => {
            transcript.log(format_args!("*** FAILURE *** {}", failure.message));
            debug!("upload to {}: {} ({})", target.host(), failure, failure.kind);
            PushRecord {
                target: identity,
                outcome: Outcome::Failed(failure),
                lines: transcript.lines,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{output, FakeApi, FakePush, FakeTransfer};
    use super::*;
    use crate::classify::FailureKind;
    use crate::target::SkipReason;
    use serde_json::json;
    use std::time::Duration;

    fn app_file() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello_world.tar.gz");
        std::fs::write(&path, b"archive").unwrap();
        (dir, path)
    }

    fn target(host: &str) -> Target {
        Target::new(host).credentials("admin", "pw")
    }

    /// Transcript line without its timestamp.
    fn message(line: &str) -> &str {
        // "YYYY-MM-DD HH:MM:SS " is 20 characters.
        &line[20..]
    }

    #[tokio::test]
    async fn test_file_push_verdicts() {
        let transfer = FakeTransfer::new()
            .on("10.0.0.1", FakePush::Output(output(1, "", "lost connection")))
            .on(
                "10.0.0.2",
                FakePush::Output(output(
                    1,
                    "",
                    "ssh: connect to host 10.0.0.2 port 22: Connection refused\r\nlost connection",
                )),
            )
            .on("10.0.0.3", FakePush::Output(output(0, "app.tar.gz 100%", "")));
        let fleet = Fleet::new(FleetConfig::default(), FakeApi::new(), transfer);
        let (_dir, file) = app_file();
        let targets = vec![
            target("10.0.0.1"),
            target("10.0.0.2"),
            target("10.0.0.3"),
            Target::new("10.0.0.4"),
        ];

        let report = fleet.dispatch_file_push(&targets, 2222, &file).await.unwrap();

        assert_eq!(report.title, "SDK App Deployment: hello_world.tar.gz");
        assert_eq!(report.records.len(), 4);
        assert_eq!(report.failure_count(), 1);

        let first = &report.records[0];
        assert_eq!(first.outcome, Outcome::Success(Delivery::AfterDisconnect));
        assert_eq!(first.lines[0], "--- admin@10.0.0.1:2222 ---");
        assert_eq!(message(&first.lines[1]), "*** SUCCESS *** Pushed to 10.0.0.1:2222");
        assert_eq!(
            message(&first.lines[2]),
            "(Connection closed after transfer - normal for Cradlepoint)"
        );

        let second = &report.records[1];
        let failure = second.outcome.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::AmbiguousTransportSignal);
        assert!(message(&second.lines[1]).starts_with(
            "*** FAILURE *** admin@10.0.0.2:/app_upload - ssh: connect to host 10.0.0.2 port 22: Connection refused"
        ));

        let third = &report.records[2];
        assert_eq!(third.outcome, Outcome::Success(Delivery::Confirmed));
        assert_eq!(message(&third.lines[2]), "app.tar.gz 100%");

        let fourth = &report.records[3];
        assert_eq!(fourth.outcome, Outcome::Skipped(SkipReason::MissingCredentials));
        assert_eq!(fourth.lines, vec!["--- Skipped (missing credentials) ---"]);

        // SSH port is used for every attempt, independent of the HTTP port.
        let seen = fleet.transfer().seen();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(_, port, user)| *port == 2222 && user == "admin"));
    }

    #[tokio::test]
    async fn test_file_push_tool_missing_and_timeout() {
        let transfer = FakeTransfer::new()
            .on("10.0.0.1", FakePush::ToolMissing)
            .on("10.0.0.2", FakePush::Hang);
        let config = FleetConfig {
            transfer_timeout: Duration::from_millis(50),
            ..FleetConfig::default()
        };
        let fleet = Fleet::new(config, FakeApi::new(), transfer);
        let (_dir, file) = app_file();

        let report = fleet
            .dispatch_file_push(&[target("10.0.0.1"), target("10.0.0.2")], 22, &file)
            .await
            .unwrap();

        assert_eq!(report.failure_count(), 2);
        assert!(message(&report.records[0].lines[1]).starts_with("*** FAILURE *** SCP tool not found."));
        let timeout = report.records[1].outcome.failure().unwrap();
        assert!(timeout.is_timeout());
        assert_eq!(
            message(&report.records[1].lines[1]),
            "*** FAILURE *** SCP timed out after 0 seconds for 10.0.0.2:22"
        );
    }

    #[tokio::test]
    async fn test_probe_before_push() {
        let api = FakeApi::new().json("10.0.0.1", "status/product_info", json!({"product_name": "IBR900-600M"}));
        let config = FleetConfig {
            probe_before_push: true,
            ..FleetConfig::default()
        };
        let fleet = Fleet::new(config, api, FakeTransfer::new());
        let (_dir, file) = app_file();

        let report = fleet
            .dispatch_file_push(&[target("10.0.0.1"), target("10.0.0.9")], 22, &file)
            .await
            .unwrap();

        assert_eq!(
            message(&report.records[0].lines[1]),
            "Connected to http://10.0.0.1:8080: IBR900-600M"
        );
        assert!(report.records[0].outcome.is_success());
        // Unreachable probe stops the push before any transfer.
        assert!(message(&report.records[1].lines[1]).starts_with("*** FAILURE *** Cannot connect to"));
        assert_eq!(fleet.transfer().seen().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_local_file() {
        let fleet = Fleet::new(FleetConfig::default(), FakeApi::new(), FakeTransfer::new());
        let err = fleet
            .dispatch_file_push(&[target("10.0.0.1")], 22, Path::new("/nonexistent/app.tar.gz"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Dispatch(DispatchError::FileNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_http_upload() {
        let api = FakeApi::new()
            .json("10.0.0.1", "status/product_info", json!({"product_name": "E300"}))
            .json("10.0.0.1", "config/system/system_id", json!("store-12"))
            .json("10.0.0.2", "status/product_info", json!({}))
            .upload_result(
                "10.0.0.2",
                Err(Failure::new(
                    FailureKind::TransportProtocolError,
                    "http://10.0.0.2:8080/fw_upgrade: 500 boom",
                )),
            );
        let fleet = Fleet::new(FleetConfig::default(), api, FakeTransfer::new());
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ncos.bin");
        std::fs::write(&file, b"fw").unwrap();

        let report = fleet
            .dispatch_http_upload(
                &[target("10.0.0.1"), target("10.0.0.2")],
                DeploymentKind::Ncos,
                &file,
            )
            .await
            .unwrap();

        assert_eq!(report.title, "NCOS: ncos.bin");
        let ok = &report.records[0];
        assert_eq!(message(&ok.lines[1]), "Connected to store-12 at http://10.0.0.1:8080: E300");
        assert_eq!(message(&ok.lines[2]), "*** SUCCESS *** Pushed to store-12.");

        let bad = &report.records[1];
        assert_eq!(message(&bad.lines[1]), "Connected to unknown at http://10.0.0.2:8080: N/A");
        assert_eq!(
            message(&bad.lines[2]),
            "*** FAILURE *** http://10.0.0.2:8080/fw_upgrade: 500 boom"
        );
        assert_eq!(report.failure_count(), 1);

        let uploads: Vec<_> = fleet
            .api()
            .calls()
            .into_iter()
            .filter(|(_, _, path, _)| path == "fw_upgrade")
            .collect();
        assert_eq!(uploads.len(), 2);
    }

    #[test]
    fn test_deployment_kinds() {
        assert_eq!("licenses".parse::<DeploymentKind>().unwrap(), DeploymentKind::License);
        assert_eq!(DeploymentKind::Configuration.endpoint(), "config_save");
        assert!(DeploymentKind::SdkApp.uses_scp());
        assert!(!DeploymentKind::Ncos.uses_scp());
        assert!("firmware".parse::<DeploymentKind>().is_err());
    }
}
