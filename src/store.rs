//! On-disk worker directory store.
//!
//! One directory per device serial under the base directory. The `.runner`
//! marker inside a directory is the durable "registered with the control
//! plane" bit; the `template` directory is the copy source and never a
//! worker record.

use std::path::{Path, PathBuf};

use tokio::fs;

use crate::error::Result;
use crate::types::RunnerMarker;

pub const TEMPLATE_DIR: &str = "template";
pub const MARKER_FILE: &str = ".runner";

#[derive(Debug, Clone)]
pub struct WorkerDir {
    pub serial: String,
    pub path: PathBuf,
    pub registered: bool,
}

pub fn runner_dir(base: &Path, serial: &str) -> PathBuf {
    base.join(serial)
}

pub fn template_dir(base: &Path) -> PathBuf {
    base.join(TEMPLATE_DIR)
}

/// Enumerate worker directories. A missing base directory reads as an empty
/// store; the template directory and stray files are skipped.
pub async fn scan(base: &Path) -> Result<Vec<WorkerDir>> {
    let mut dirs = Vec::new();
    let mut entries = match fs::read_dir(base).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name == TEMPLATE_DIR {
            continue;
        }
        let registered = is_registered(&path).await;
        dirs.push(WorkerDir {
            serial: name.to_string(),
            path,
            registered,
        });
    }
    Ok(dirs)
}

/// The registered state is the marker file's presence, not its content: a
/// corrupt marker still means the control plane was told about this runner,
/// so it must still go through deregistration.
pub async fn is_registered(dir: &Path) -> bool {
    fs::try_exists(dir.join(MARKER_FILE)).await.unwrap_or(false)
}

pub async fn read_marker(dir: &Path) -> Option<RunnerMarker> {
    let data = fs::read_to_string(dir.join(MARKER_FILE)).await.ok()?;
    serde_json::from_str(&data).ok()
}

pub async fn write_marker(dir: &Path, marker: &RunnerMarker) -> Result<()> {
    let json = serde_json::to_string_pretty(marker)?;
    fs::write(dir.join(MARKER_FILE), json).await?;
    Ok(())
}

pub async fn remove(dir: &Path) -> Result<()> {
    fs::remove_dir_all(dir).await?;
    Ok(())
}
