//! Device inventory backed by the adb bridge.
//!
//! The controller only ever reads device state; serials are opaque stable
//! tokens assigned by adb and devices are never mutated from here.

use tokio::process::Command;

use crate::error::{Error, Result};
use crate::log;
use crate::types::{sanitize_prop, AbiProbe, DeviceAttrs};

/// Read-only view of the attached-device set.
#[async_trait::async_trait]
pub trait DeviceInventory: Send + Sync {
    /// Serials of all devices currently in the `device` (fully online) state.
    async fn list_online(&self) -> Result<Vec<String>>;

    /// Descriptive attributes for naming and labeling. Individual property
    /// lookups degrade independently; this never fails as a whole.
    async fn attrs(&self, serial: &str) -> DeviceAttrs;
}

pub struct AdbInventory;

async fn run_adb(args: &[&str]) -> std::result::Result<String, String> {
    let output = Command::new("adb")
        .args(args)
        .output()
        .await
        .map_err(|e| format!("adb exec failed: {e}"))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!("adb error: {stderr}"))
    }
}

/// Parse `adb devices` output: one `<serial>\t<state>` line per device after
/// the header, where only state `device` counts as online (`offline`,
/// `unauthorized` etc. are skipped).
pub fn parse_devices_output(output: &str) -> Vec<String> {
    let mut serials = Vec::new();
    for line in output.lines() {
        if line.trim().is_empty() || line == "List of devices attached" {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() == 2 && parts[1] == "device" {
            serials.push(parts[0].to_string());
        }
    }
    serials
}

impl AdbInventory {
    async fn getprop(&self, serial: &str, prop: &str) -> std::result::Result<String, String> {
        run_adb(&["-s", serial, "shell", "getprop", prop]).await
    }

    /// One property lookup, degrading to the literal `"unknown"` on failure
    /// so a flaky device still gets a usable (if generic) runner name.
    async fn prop_or_unknown(&self, serial: &str, prop: &str) -> String {
        match self.getprop(serial, prop).await {
            Ok(raw) => sanitize_prop(&raw),
            Err(e) => {
                log::warn(
                    "getprop_failed",
                    serde_json::json!({"serial": serial, "prop": prop, "error": e}),
                );
                "unknown".to_string()
            }
        }
    }
}

#[async_trait::async_trait]
impl DeviceInventory for AdbInventory {
    async fn list_online(&self) -> Result<Vec<String>> {
        let output = run_adb(&["devices"]).await.map_err(Error::Inventory)?;
        Ok(parse_devices_output(&output))
    }

    async fn attrs(&self, serial: &str) -> DeviceAttrs {
        let model = self.prop_or_unknown(serial, "ro.product.model").await;
        let sdk = self.prop_or_unknown(serial, "ro.build.version.sdk").await;

        let abis = match self.getprop(serial, "ro.product.cpu.abilist").await {
            Ok(raw) => {
                let tags: Vec<String> = raw
                    .trim()
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect();
                if tags.is_empty() {
                    AbiProbe::Empty
                } else {
                    AbiProbe::Tags(tags)
                }
            }
            Err(e) => {
                log::warn(
                    "abi_probe_failed",
                    serde_json::json!({"serial": serial, "error": e}),
                );
                AbiProbe::Failed
            }
        };

        DeviceAttrs { model, sdk, abis }
    }
}
