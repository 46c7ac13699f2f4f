//! Process supervision for the per-device runner processes.
//!
//! Each materialized runner directory carries a `run.sh` entry point that is
//! spawned as an opaque child process. The controller owns exactly one
//! handle per serial; liveness is probed lazily with `try_wait` at the start
//! of every tick rather than via exit callbacks.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::log;

#[async_trait::async_trait]
pub trait WorkerHandle: Send + std::fmt::Debug {
    fn pid(&self) -> Option<u32>;

    /// Non-blocking liveness probe. False once the process has exited for
    /// any reason.
    async fn is_running(&mut self) -> bool;

    /// Graceful-then-forced termination. Requests termination, waits up to
    /// `grace`, then kills. Always returns within `grace` plus signal
    /// latency; a process that already exited is success, not error.
    async fn stop(&mut self, serial: &str, grace: Duration) -> Result<()>;
}

#[async_trait::async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, dir: &Path, serial: &str) -> Result<Box<dyn WorkerHandle>>;
}

/// Real launcher: runs the runner's `run.sh` with the runner directory as
/// working directory. The runner owns its own logging, so stdout/stderr are
/// dropped instead of interleaving with the controller's event stream.
pub struct RunShLauncher;

#[async_trait::async_trait]
impl WorkerLauncher for RunShLauncher {
    async fn launch(&self, dir: &Path, serial: &str) -> Result<Box<dyn WorkerHandle>> {
        let child = Command::new(dir.join("run.sh"))
            .current_dir(dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::launch(serial, e.to_string()))?;

        log::info(
            "worker_started",
            serde_json::json!({"serial": serial, "pid": child.id()}),
        );
        Ok(Box::new(ChildHandle { child }))
    }
}

#[derive(Debug)]
struct ChildHandle {
    child: Child,
}

#[async_trait::async_trait]
impl WorkerHandle for ChildHandle {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn stop(&mut self, serial: &str, grace: Duration) -> Result<()> {
        if let Ok(Some(_)) = self.child.try_wait() {
            return Ok(());
        }

        if let Some(pid) = self.child.id() {
            let _ = Command::new("kill")
                .args(["-TERM", &pid.to_string()])
                .output()
                .await;
        }

        match timeout(grace, self.child.wait()).await {
            Ok(_) => Ok(()),
            Err(_) => {
                log::warn(
                    "worker_kill_escalated",
                    serde_json::json!({"serial": serial, "pid": self.child.id(), "grace_secs": grace.as_secs()}),
                );
                // kill() also reaps; an exited-in-the-meantime child reads
                // as success inside tokio.
                self.child
                    .kill()
                    .await
                    .map_err(|e| Error::stop(serial, e.to_string()))
            }
        }
    }
}
