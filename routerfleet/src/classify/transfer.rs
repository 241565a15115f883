//! Classification of SCP file-transfer results.
//!
//! Cradlepoint's SSH server drops the session right after it has accepted an
//! `/app_upload`, so `scp` prints "lost connection" and exits non-zero even
//! though the push worked. The same phrase also shows up next to genuine
//! network errors when the device is unreachable, so hard-failure phrases are
//! always checked first.

use memchr::memmem;
use serde::Serialize;

use super::{Failure, FailureKind};

/// Phrases that mean the device was not reachable. Checked before
/// [`LOST_CONNECTION_PHRASE`]; the order of the two checks matters.
pub const FAILURE_PHRASES: [&str; 9] = [
    "connection refused",
    "no route to host",
    "network is unreachable",
    "connection timed out",
    "timed out",
    "host is unreachable",
    "connection reset by peer",
    "could not resolve host",
    "name or service not known",
];

/// What `scp` prints when the remote side closes the session.
pub const LOST_CONNECTION_PHRASE: &str = "lost connection";

/// Raw result of one file-transfer attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferOutput {
    /// Exit status of the transfer, if one was reported.
    pub exit_code: Option<i32>,

    /// Standard output, trimmed.
    pub stdout: String,

    /// Standard error, trimmed.
    pub stderr: String,
}

impl TransferOutput {
    /// Build from raw process streams.
    pub fn from_streams(exit_code: Option<i32>, stdout: &[u8], stderr: &[u8]) -> Self {
        Self {
            exit_code,
            stdout: String::from_utf8_lossy(stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }

    /// Combined, lower-cased stdout and stderr.
    pub fn combined_lower(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr).to_lowercase()
    }

    /// Check if the output contains the lost-connection phrase.
    pub fn mentions_lost_connection(&self) -> bool {
        contains(self.combined_lower().as_bytes(), LOST_CONNECTION_PHRASE)
    }

    /// The most useful text to show for a failure.
    pub fn detail(&self) -> &str {
        if !self.stderr.is_empty() {
            &self.stderr
        } else if !self.stdout.is_empty() {
            &self.stdout
        } else {
            "scp failed"
        }
    }
}

/// Verdict for one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferVerdict {
    /// The tool reported success.
    Delivered,
    /// The tool reported a lost connection and nothing worse; counted as success.
    DeliveredAfterDisconnect,
    /// The transfer failed.
    Failed(Failure),
}

impl TransferVerdict {
    /// Check if the verdict counts as success.
    pub fn is_success(&self) -> bool {
        !matches!(self, TransferVerdict::Failed(_))
    }
}

/// Decide whether a transfer succeeded.
///
/// Success if the exit status is zero, or if the output mentions a lost
/// connection without any of the [`FAILURE_PHRASES`].
pub fn classify_transfer(output: &TransferOutput) -> TransferVerdict {
    let combined = output.combined_lower();
    let haystack = combined.as_bytes();

    let failure_phrase = FAILURE_PHRASES
        .iter()
        .copied()
        .find(|phrase| contains(haystack, phrase));
    let lost_connection = contains(haystack, LOST_CONNECTION_PHRASE);

    if output.exit_code == Some(0) {
        return TransferVerdict::Delivered;
    }
    if lost_connection && failure_phrase.is_none() {
        return TransferVerdict::DeliveredAfterDisconnect;
    }

    let kind = match failure_phrase {
        Some(phrase) if phrase.contains("timed out") => FailureKind::TransportTimeout,
        Some(_) => FailureKind::TransportUnreachable,
        None => FailureKind::TransportProtocolError,
    };
    let kind = if lost_connection && kind == FailureKind::TransportUnreachable {
        FailureKind::AmbiguousTransportSignal
    } else {
        kind
    };

    TransferVerdict::Failed(Failure::new(kind, output.detail()))
}

fn contains(haystack: &[u8], needle: &str) -> bool {
    memmem::find(haystack, needle.as_bytes()).is_some()
}
