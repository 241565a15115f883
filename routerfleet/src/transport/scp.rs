//! File push through an external `scp` tool.
//!
//! On Unix the password is fed to `scp` by `sshpass` (through the `SSHPASS`
//! environment variable, so it never shows up in the process list). On
//! Windows `pscp.exe` takes it on the command line.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::Stdio;

use log::trace;
use tokio::process::Command;

use super::FileTransfer;
use super::config::REMOTE_UPLOAD_DIR;
use crate::classify::TransferOutput;
use crate::config::FleetConfig;
use crate::error::TransportError;
use crate::target::Target;

/// [`FileTransfer`] that shells out to `sshpass scp` or `pscp`.
#[derive(Debug, Clone)]
pub struct ScpCommand {
    sshpass_path: String,
    pscp_path: String,
}

impl Default for ScpCommand {
    fn default() -> Self {
        Self::from_config(&FleetConfig::default())
    }
}

impl ScpCommand {
    /// Use the tool locations from `config`.
    pub fn from_config(config: &FleetConfig) -> Self {
        Self {
            sshpass_path: config.sshpass_path.clone(),
            pscp_path: config.pscp_path.clone(),
        }
    }

    /// Override the `sshpass` executable.
    pub fn sshpass_path(mut self, path: impl Into<String>) -> Self {
        self.sshpass_path = path.into();
        self
    }

    /// Override the `pscp` executable.
    pub fn pscp_path(mut self, path: impl Into<String>) -> Self {
        self.pscp_path = path.into();
        self
    }

    fn tool(&self) -> &str {
        if cfg!(windows) { &self.pscp_path } else { &self.sshpass_path }
    }

    fn command(&self, target: &Target, ssh_port: u16, local_file: &Path) -> Command {
        let destination = format!("{}@{}:{}", target.username, target.url_host(), REMOTE_UPLOAD_DIR);
        let port = ssh_port.to_string();
        let file: OsString = local_file.as_os_str().to_owned();

        let mut command = Command::new(self.tool());
        if cfg!(windows) {
            command
                .arg("-pw")
                .arg(target.password())
                .args(["-P", port.as_str(), "-batch"])
                .arg(file)
                .arg(destination);
        } else {
            command
                .arg("-e")
                .env("SSHPASS", target.password())
                .args([
                    "scp",
                    "-O",
                    "-o",
                    "UserKnownHostsFile=/dev/null",
                    "-o",
                    "StrictHostKeyChecking=no",
                    "-P",
                    port.as_str(),
                ])
                .arg(file)
                .arg(destination);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl FileTransfer for ScpCommand {
    async fn push(
        &self,
        target: &Target,
        ssh_port: u16,
        local_file: &Path,
    ) -> Result<TransferOutput, TransportError> {
        trace!(
            "{} -> {}@{}:{} port {}",
            local_file.display(),
            target.username,
            target.host(),
            REMOTE_UPLOAD_DIR,
            ssh_port
        );

        let output = self
            .command(target, ssh_port, local_file)
            .output()
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => TransportError::ToolNotFound {
                    tool: self.tool().to_string(),
                    source: e,
                },
                _ => TransportError::Io(e),
            })?;

        Ok(TransferOutput::from_streams(
            output.status.code(),
            &output.stdout,
            &output.stderr,
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::classify::{classify_transfer, TransferVerdict};
    use std::os::unix::fs::PermissionsExt;

    /// Write an executable stand-in for `sshpass`.
    fn fake_tool(dir: &Path, script: &str) -> String {
        let path = dir.join("fake-sshpass");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn target() -> Target {
        Target::new("10.0.0.1").credentials("admin", "pw")
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let scp = ScpCommand::default().sshpass_path("/nonexistent/sshpass");
        let err = scp
            .push(&target(), 22, Path::new("/tmp/app.tar.gz"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ToolNotFound { .. }));
    }

    #[tokio::test]
    async fn test_arguments_and_password_env() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), r#"echo "$SSHPASS $*""#);
        let scp = ScpCommand::default().sshpass_path(tool);

        let output = scp
            .push(&target(), 2222, Path::new("/tmp/app.tar.gz"))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(
            output.stdout,
            "pw -e scp -O -o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no \
             -P 2222 /tmp/app.tar.gz admin@10.0.0.1:/app_upload"
        );
    }

    #[tokio::test]
    async fn test_ipv6_destination_is_bracketed() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), r#"echo "$*""#);
        let scp = ScpCommand::default().sshpass_path(tool);

        let output = scp
            .push(
                &Target::new("[fe80::1]:8080").credentials("admin", "pw"),
                22,
                Path::new("/tmp/app.tar.gz"),
            )
            .await
            .unwrap();
        assert!(output.stdout.ends_with(" admin@[fe80::1]:/app_upload"));
    }

    #[tokio::test]
    async fn test_lost_connection_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo 'lost connection' >&2; exit 1");
        let scp = ScpCommand::default().sshpass_path(tool);

        let output = scp
            .push(&target(), 22, Path::new("/tmp/app.tar.gz"))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(1));
        assert_eq!(classify_transfer(&output), TransferVerdict::DeliveredAfterDisconnect);
    }
}
