//! Control-plane calls, shelling out to the `config.sh` that ships inside
//! every materialized runner directory.
//!
//! The registration token is short-lived and supplied once per invocation;
//! retries within a run reuse it, a fresh run needs a fresh token.

use std::path::Path;
use std::process::Output;

use tokio::process::Command;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeregisterOutcome {
    Removed,
    /// The control plane no longer knows the runner. Callers treat this the
    /// same as `Removed`; local cleanup may proceed.
    NotFound,
}

#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync {
    /// One-time registration of a runner with the control plane. Not
    /// idempotent on the remote side; callers gate it behind the on-disk
    /// marker.
    async fn register(&self, dir: &Path, serial: &str, name: &str, labels: &str) -> Result<()>;

    /// Remove a runner's registration. Must complete (Removed or NotFound)
    /// before any local state for the runner is deleted.
    async fn deregister(&self, dir: &Path, serial: &str) -> Result<DeregisterOutcome>;
}

/// Real control plane: the GitHub Actions runner's own `config.sh`.
pub struct ConfigScript {
    github_url: String,
    token: String,
}

impl ConfigScript {
    pub fn new(github_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            github_url: github_url.into(),
            token: token.into(),
        }
    }
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

#[async_trait::async_trait]
impl ControlPlane for ConfigScript {
    async fn register(&self, dir: &Path, serial: &str, name: &str, labels: &str) -> Result<()> {
        let output = Command::new(dir.join("config.sh"))
            .current_dir(dir)
            .args(["--url", &self.github_url])
            .args(["--token", &self.token])
            .args(["--name", name])
            .args(["--labels", labels])
            .args(["--unattended", "--replace"])
            .output()
            .await
            .map_err(|e| Error::registration(serial, format!("config.sh exec failed: {e}")))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(Error::registration(serial, stderr_of(&output)))
        }
    }

    async fn deregister(&self, dir: &Path, serial: &str) -> Result<DeregisterOutcome> {
        let output = Command::new(dir.join("config.sh"))
            .current_dir(dir)
            .arg("remove")
            .args(["--token", &self.token])
            .output()
            .await
            .map_err(|e| Error::deregistration(serial, format!("config.sh exec failed: {e}")))?;

        if output.status.success() {
            return Ok(DeregisterOutcome::Removed);
        }

        let stderr = stderr_of(&output);
        let combined = format!("{stderr} {}", String::from_utf8_lossy(&output.stdout)).to_lowercase();
        if combined.contains("not found") || combined.contains("does not exist") {
            return Ok(DeregisterOutcome::NotFound);
        }
        Err(Error::deregistration(serial, stderr))
    }
}
