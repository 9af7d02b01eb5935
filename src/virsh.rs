//! Thin async wrapper around the `virsh` client.
//!
//! Every call is a short-lived child process bounded by
//! [`VIRSH_TIMEOUT`]; stdout comes back trimmed, stderr is kept for
//! classifying failures.

use std::ffi::OsStr;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use tracing::debug;

use crate::child;
use crate::constants::{VIRSH_BIN, VIRSH_TIMEOUT};

#[derive(Debug, thiserror::Error)]
pub enum VirshError {
    #[error("failed to run virsh: {0}")]
    Spawn(#[source] io::Error),

    #[error("virsh did not answer within {0:?}")]
    Timeout(Duration),

    #[error("{stderr}")]
    Failed { stderr: String },
}

impl VirshError {
    fn stderr(&self) -> &str {
        match self {
            VirshError::Failed { stderr, .. } => stderr,
            _ => "",
        }
    }

    /// libvirt's VIR_ERR_NO_DOMAIN, as rendered by virsh.
    pub fn is_no_domain(&self) -> bool {
        let s = self.stderr();
        s.contains("failed to get domain") || s.contains("Domain not found")
    }

    pub fn is_connection(&self) -> bool {
        match self {
            VirshError::Spawn(_) | VirshError::Timeout(_) => true,
            VirshError::Failed { stderr, .. } => stderr.contains("failed to connect to the hypervisor"),
        }
    }

    pub fn is_refused(&self) -> bool {
        let s = self.stderr().to_ascii_lowercase();
        s.contains("connection refused") || s.contains("permission denied")
    }
}

#[derive(Debug, Clone)]
pub struct Virsh {
    uri: Option<String>,
    timeout: Duration,
}

impl Virsh {
    pub fn new(uri: Option<String>) -> Self {
        Self {
            uri,
            timeout: VIRSH_TIMEOUT,
        }
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// Run `virsh [-c URI] -q <args>` and return trimmed stdout.
    pub async fn run<I, S>(&self, args: I) -> Result<String, VirshError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = child::command(VIRSH_BIN);
        if let Some(uri) = &self.uri {
            cmd.arg("-c").arg(uri);
        }
        cmd.arg("-q")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(?cmd, "running virsh");

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| VirshError::Timeout(self.timeout))?
            .map_err(VirshError::Spawn)?;

        if !output.status.success() {
            debug!(status = ?output.status, "virsh failed");
            return Err(VirshError::Failed {
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str) -> VirshError {
        VirshError::Failed {
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn classifies_missing_domain() {
        let e = failed(
            "error: failed to get domain 'vm9'\nerror: Domain not found: no domain with matching name 'vm9'\n",
        );
        assert!(e.is_no_domain());
        assert!(!e.is_connection());
    }

    #[test]
    fn classifies_connection_failures() {
        let e = failed("error: failed to connect to the hypervisor\nerror: Failed to connect socket\n");
        assert!(e.is_connection());
        assert!(!e.is_no_domain());
        assert!(VirshError::Spawn(io::Error::from(io::ErrorKind::NotFound)).is_connection());
        assert!(VirshError::Timeout(Duration::from_secs(1)).is_connection());
    }

    #[test]
    fn classifies_refusal() {
        assert!(failed("error: Unable to connect: Connection refused").is_refused());
        assert!(!failed("error: internal error").is_refused());
    }

    #[test]
    fn message_is_stderr() {
        assert_eq!(failed("error: boom").to_string(), "error: boom");
    }
}
