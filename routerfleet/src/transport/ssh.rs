//! Native SCP push over russh.
//!
//! Speaks the sink side of the classic SCP protocol (`scp -t`) directly on an
//! exec channel, so no external `sshpass`/`scp` is needed. The result is
//! reported in the same shape the external tool produces, including the
//! "lost connection" line when the device drops the session.

use std::error::Error as StdError;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, trace, warn};
use russh::client::{self, Handle, Msg};
use russh::keys::PublicKey;
use russh::{Channel, ChannelMsg};

use super::FileTransfer;
use super::config::{HostKeyVerification, REMOTE_UPLOAD_DIR, SshSettings};
use crate::classify::{TransferOutput, LOST_CONNECTION_PHRASE};
use crate::error::TransportError;
use crate::target::Target;

/// Exit status `ssh` uses for connection-level failures.
const SSH_CONNECT_FAILURE: i32 = 255;

const HOST_KEY_FAILED: &str = "Host key verification failed.";

/// [`FileTransfer`] implemented on a russh session.
#[derive(Debug, Clone, Default)]
pub struct SshScp {
    settings: SshSettings,
}

impl SshScp {
    /// Create with the given settings.
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    /// Connect to the device and authenticate with its password.
    async fn connect(&self, target: &Target, port: u16) -> Result<Handle<SshHandler>, TransportError> {
        let host = target.host().to_string();
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: Some(self.settings.timeout),
            ..Default::default()
        });

        let rejection: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));
        let handler = SshHandler {
            known_hosts: KnownHosts {
                host: host.clone(),
                port,
                path: self.settings.known_hosts_path.clone(),
            },
            verification: self.settings.host_key_verification.clone(),
            rejection: rejection.clone(),
        };

        let mut session = tokio::time::timeout(
            self.settings.timeout,
            client::connect(ssh_config, (host.as_str(), port), handler),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.settings.timeout))?
        .map_err(|e| {
            // russh only reports UnknownKey; the handler kept the reason.
            match rejection.lock().ok().and_then(|mut slot| slot.take()) {
                Some(reason) => reason,
                None => TransportError::Ssh(e),
            }
        })?;

        let authenticated = session
            .authenticate_password(target.username.as_str(), target.password())
            .await?
            .success();
        if !authenticated {
            return Err(TransportError::AuthenticationFailed {
                user: target.username.clone(),
            });
        }

        Ok(session)
    }
}

impl FileTransfer for SshScp {
    async fn push(
        &self,
        target: &Target,
        ssh_port: u16,
        local_file: &Path,
    ) -> Result<TransferOutput, TransportError> {
        let contents = tokio::fs::read(local_file).await?;
        let file_name = sink_file_name(local_file);

        let session = match self.connect(target, ssh_port).await {
            Ok(session) => session,
            Err(e) => return Ok(connect_failure(target, ssh_port, &e)),
        };

        let channel = match open_sink_channel(&session).await {
            Ok(channel) => channel,
            Err(e) => {
                debug!("scp channel on {}: {}", target.host(), e);
                let error = if session.is_closed() {
                    TransportError::Disconnected
                } else {
                    TransportError::Ssh(e)
                };
                return Ok(connect_failure(target, ssh_port, &error));
            }
        };

        let mut sink = Sink::new(channel);
        let delivered = sink.deliver(&file_name, &contents).await;
        let output = sink.finish(delivered).await;

        if let Err(e) = session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            trace!("disconnect after push: {}", e);
        }

        Ok(output)
    }
}

async fn open_sink_channel(session: &Handle<SshHandler>) -> Result<Channel<Msg>, russh::Error> {
    let channel = session.channel_open_session().await?;
    channel
        .exec(true, format!("scp -t {}", REMOTE_UPLOAD_DIR))
        .await?;
    Ok(channel)
}

/// Why the sink conversation stopped early.
#[derive(Debug, PartialEq, Eq)]
enum Halt {
    /// Channel closed or session dropped.
    Lost,
    /// Remote `scp -t` answered with a warning or error line.
    Rejected,
}

/// One SCP sink conversation on an exec channel.
struct Sink {
    channel: Channel<Msg>,
    pending: Vec<u8>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
}

impl Sink {
    fn new(channel: Channel<Msg>) -> Self {
        Self {
            channel,
            pending: Vec::new(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: None,
        }
    }

    async fn deliver(&mut self, file_name: &str, contents: &[u8]) -> Result<(), Halt> {
        self.read_ack().await?;
        self.send(sink_header(contents.len(), file_name).as_bytes()).await?;
        self.read_ack().await?;
        self.send(contents).await?;
        self.send(&[0]).await?;
        self.read_ack().await?;
        trace!("sink acknowledged {} bytes", contents.len());
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), Halt> {
        self.channel.data(data).await.map_err(|e| {
            debug!("scp send failed: {}", e);
            Halt::Lost
        })
    }

    async fn read_ack(&mut self) -> Result<(), Halt> {
        loop {
            match take_ack(&mut self.pending) {
                Some(Ok(())) => return Ok(()),
                Some(Err(message)) => {
                    self.stderr.extend_from_slice(&message);
                    self.stderr.push(b'\n');
                    return Err(Halt::Rejected);
                }
                None => {}
            }

            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => self.pending.extend_from_slice(&data),
                Some(ChannelMsg::ExtendedData { data, .. }) => self.stderr.extend_from_slice(&data),
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    self.exit_code = Some(exit_status as i32)
                }
                Some(ChannelMsg::Close) | None => return Err(Halt::Lost),
                Some(_) => {}
            }
        }
    }

    /// Close our side, collect the remote exit status and build the output.
    async fn finish(mut self, delivered: Result<(), Halt>) -> TransferOutput {
        let mut halt = delivered.err();

        if halt.is_none() {
            if let Err(e) = self.channel.eof().await {
                debug!("scp eof failed: {}", e);
                halt = Some(Halt::Lost);
            }
        }

        if halt.is_none() {
            while self.exit_code.is_none() {
                match self.channel.wait().await {
                    Some(ChannelMsg::Data { data }) => self.stdout.extend_from_slice(&data),
                    Some(ChannelMsg::ExtendedData { data, .. }) => {
                        self.stderr.extend_from_slice(&data)
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        self.exit_code = Some(exit_status as i32)
                    }
                    Some(ChannelMsg::Close) | None => {
                        halt = Some(Halt::Lost);
                        break;
                    }
                    Some(_) => {}
                }
            }
        }

        let exit_code = match halt {
            Some(Halt::Lost) => {
                self.stderr.extend_from_slice(LOST_CONNECTION_PHRASE.as_bytes());
                Some(self.exit_code.filter(|c| *c != 0).unwrap_or(1))
            }
            Some(Halt::Rejected) => Some(self.exit_code.filter(|c| *c != 0).unwrap_or(1)),
            None => self.exit_code,
        };

        TransferOutput::from_streams(exit_code, &self.stdout, &self.stderr)
    }
}

/// Pop one SCP acknowledgement from `pending`.
///
/// `\0` is success; `\x01` or `\x02` is followed by a message line. Returns
/// `None` until a complete acknowledgement is buffered.
fn take_ack(pending: &mut Vec<u8>) -> Option<Result<(), Vec<u8>>> {
    let first = *pending.first()?;
    if first == 0 {
        pending.remove(0);
        return Some(Ok(()));
    }
    let end = memchr::memchr(b'\n', pending)?;
    let line: Vec<u8> = pending.drain(..=end).collect();
    let message = if first <= 2 { &line[1..end] } else { &line[..end] };
    Some(Err(message.to_vec()))
}

/// `C` record announcing one regular file.
fn sink_header(len: usize, file_name: &str) -> String {
    format!("C0644 {} {}\n", len, file_name)
}

fn sink_file_name(local_file: &Path) -> String {
    local_file
        .file_name()
        .map(|n| n.to_string_lossy().replace(['\n', '/'], "_"))
        .unwrap_or_else(|| "upload".to_string())
}

/// Report a failed connection the way `ssh` would print it.
fn connect_failure(target: &Target, port: u16, error: &TransportError) -> TransferOutput {
    let stderr = match error {
        TransportError::Timeout(_) => format!(
            "ssh: connect to host {} port {}: Connection timed out",
            target.host(),
            port
        ),
        TransportError::AuthenticationFailed { user } => {
            format!("{}@{}: Permission denied (password).", user, target.host())
        }
        TransportError::HostKeyChanged { line, .. } => format!(
            "@@@ WARNING: REMOTE HOST IDENTIFICATION HAS CHANGED! @@@\n\
             Offending key in known_hosts line {}\n{}",
            line, HOST_KEY_FAILED
        ),
        TransportError::HostKeyUnknown { host, .. } => format!(
            "No host key is known for {} and you have requested strict checking.\n{}",
            host, HOST_KEY_FAILED
        ),
        TransportError::KnownHosts(reason) => format!("{}\n{}", reason, HOST_KEY_FAILED),
        other => format!(
            "ssh: connect to host {} port {}: {}",
            target.host(),
            port,
            error_chain(other)
        ),
    };
    TransferOutput {
        exit_code: Some(SSH_CONNECT_FAILURE),
        stdout: String::new(),
        stderr,
    }
}

fn error_chain(error: &dyn StdError) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(e) = source {
        let next = e.to_string();
        if !text.contains(&next) {
            text.push_str(": ");
            text.push_str(&next);
        }
        source = e.source();
    }
    text
}

/// known_hosts entries for one `host:port`.
#[derive(Debug, Clone)]
struct KnownHosts {
    host: String,
    port: u16,
    /// `None` uses the user's default file.
    path: Option<PathBuf>,
}

impl KnownHosts {
    /// Decide whether `key` may be used under `mode`.
    ///
    /// `AcceptNew` records a first-seen key; a failure to write it is only
    /// logged.
    fn verify(&self, mode: &HostKeyVerification, key: &PublicKey) -> Result<(), TransportError> {
        if matches!(mode, HostKeyVerification::Disabled) {
            return Ok(());
        }

        let recorded = match &self.path {
            Some(path) => russh::keys::check_known_hosts_path(&self.host, self.port, key, path),
            None => russh::keys::check_known_hosts(&self.host, self.port, key),
        }
        .map_err(|e| match e {
            russh::keys::Error::KeyChanged { line } => TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            },
            e => TransportError::KnownHosts(e.to_string()),
        })?;
        if recorded {
            return Ok(());
        }

        match mode {
            HostKeyVerification::AcceptNew => {
                if let Err(e) = self.learn(key) {
                    warn!("Failed to save host key for {}: {}", self.host, e);
                }
                Ok(())
            }
            _ => Err(TransportError::HostKeyUnknown {
                host: self.host.clone(),
                port: self.port,
            }),
        }
    }

    fn learn(&self, key: &PublicKey) -> Result<(), russh::keys::Error> {
        match &self.path {
            Some(path) => {
                russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, key, path)
            }
            None => russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, key),
        }
    }
}

/// russh client handler; only host-key checking is customised.
struct SshHandler {
    known_hosts: KnownHosts,
    verification: HostKeyVerification,
    /// Why the key was refused, for `connect` to report.
    rejection: Arc<Mutex<Option<TransportError>>>,
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        match self.known_hosts.verify(&self.verification, server_public_key) {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!("host key for {} refused: {}", self.known_hosts.host, e);
                if let Ok(mut slot) = self.rejection.lock() {
                    *slot = Some(e);
                }
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify_transfer, FailureKind, TransferVerdict};
    use std::time::Duration;

    #[test]
    fn test_take_ack() {
        let mut pending = vec![0, 0];
        assert_eq!(take_ack(&mut pending), Some(Ok(())));
        assert_eq!(pending, vec![0]);

        let mut pending = b"\x01scp: /app_upload: Permission denied\n".to_vec();
        assert_eq!(
            take_ack(&mut pending),
            Some(Err(b"scp: /app_upload: Permission denied".to_vec()))
        );
        assert!(pending.is_empty());

        // Incomplete error line waits for more data.
        let mut pending = b"\x02partial".to_vec();
        assert_eq!(take_ack(&mut pending), None);
        assert_eq!(take_ack(&mut Vec::new()), None);
    }

    #[test]
    fn test_sink_header() {
        assert_eq!(sink_header(1234, "app.tar.gz"), "C0644 1234 app.tar.gz\n");
        assert_eq!(sink_file_name(Path::new("/tmp/my\napp.tar.gz")), "my_app.tar.gz");
    }

    #[test]
    fn test_connect_failure_shapes() {
        let target = Target::new("10.0.0.1").credentials("admin", "pw");

        let out = connect_failure(&target, 22, &TransportError::Timeout(Duration::from_secs(5)));
        match classify_transfer(&out) {
            TransferVerdict::Failed(f) => assert_eq!(f.kind, FailureKind::TransportTimeout),
            other => panic!("unexpected verdict {:?}", other),
        }

        let out = connect_failure(
            &target,
            22,
            &TransportError::AuthenticationFailed {
                user: "admin".to_string(),
            },
        );
        assert_eq!(out.stderr, "admin@10.0.0.1: Permission denied (password).");
        assert!(!classify_transfer(&out).is_success());
    }

    const DEVICE_KEY: &str = "AAAAC3NzaC1lZDI1NTE5AAAAIJdD7y3aLq454yWBdwLWbieU1ebz9/cu7/QEXn9OIeZJ";
    const OTHER_KEY: &str = "AAAAC3NzaC1lZDI1NTE5AAAAILM+rvN+ot98qgEN796jTiQfZfG1KaT0PtFDJ/XFSqti";

    #[test]
    fn test_known_hosts_modes() {
        let dir = tempfile::tempdir().unwrap();
        let known = KnownHosts {
            host: "10.0.0.1".to_string(),
            port: 2222,
            path: Some(dir.path().join("known_hosts")),
        };
        let key = russh::keys::parse_public_key_base64(DEVICE_KEY).unwrap();
        let other = russh::keys::parse_public_key_base64(OTHER_KEY).unwrap();

        assert!(known.verify(&HostKeyVerification::Disabled, &key).is_ok());
        assert!(matches!(
            known.verify(&HostKeyVerification::Strict, &key),
            Err(TransportError::HostKeyUnknown { port: 2222, .. })
        ));

        // First sight is learned, after which strict checking passes.
        assert!(known.verify(&HostKeyVerification::AcceptNew, &key).is_ok());
        assert!(known.verify(&HostKeyVerification::Strict, &key).is_ok());

        assert!(matches!(
            known.verify(&HostKeyVerification::AcceptNew, &other),
            Err(TransportError::HostKeyChanged { .. })
        ));
        assert!(known.verify(&HostKeyVerification::Disabled, &other).is_ok());
    }

    #[test]
    fn test_host_key_rejection_is_reported_like_ssh() {
        let target = Target::new("10.0.0.1").credentials("admin", "pw");
        let out = connect_failure(
            &target,
            22,
            &TransportError::HostKeyChanged {
                host: "10.0.0.1".to_string(),
                port: 22,
                line: 3,
            },
        );
        assert_eq!(out.exit_code, Some(SSH_CONNECT_FAILURE));
        assert!(out.stderr.contains("known_hosts line 3"));
        assert!(out.stderr.ends_with("Host key verification failed."));
        match classify_transfer(&out) {
            TransferVerdict::Failed(f) => assert_eq!(f.kind, FailureKind::TransportProtocolError),
            other => panic!("unexpected verdict {:?}", other),
        }

        let out = connect_failure(
            &target,
            22,
            &TransportError::HostKeyUnknown {
                host: "10.0.0.1".to_string(),
                port: 22,
            },
        );
        assert!(out.stderr.starts_with("No host key is known for 10.0.0.1"));
    }

    #[tokio::test]
    async fn test_push_to_closed_port() {
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("app.tar.gz");
        std::fs::write(&file, b"payload").unwrap();

        let scp = SshScp::new(SshSettings {
            timeout: Duration::from_secs(5),
            ..Default::default()
        });
        let target = Target::new("127.0.0.1").credentials("admin", "pw");
        let output = scp.push(&target, port, &file).await.unwrap();

        assert_eq!(output.exit_code, Some(SSH_CONNECT_FAILURE));
        assert!(!classify_transfer(&output).is_success());
    }
}
