//! Reconciliation loop: one pass of observe-diff-act per tick.
//!
//! Each tick reads the online-device set and the on-disk runner store, then
//! brings up runners for newly attached devices and tears down runners for
//! departed ones. Per-serial failures are logged and retried next tick;
//! nothing short of startup misconfiguration stops the loop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::adb::DeviceInventory;
use crate::error::Result;
use crate::github::{ControlPlane, DeregisterOutcome};
use crate::log;
use crate::process::{WorkerHandle, WorkerLauncher};
use crate::provision;
use crate::store;
use crate::types::ManagerConfig;

pub struct Manager {
    config: ManagerConfig,
    inventory: Arc<dyn DeviceInventory>,
    control_plane: Arc<dyn ControlPlane>,
    launcher: Arc<dyn WorkerLauncher>,
    /// At most one live handle per serial; only the tick task touches this.
    active: HashMap<String, Box<dyn WorkerHandle>>,
    ticks: u64,
}

struct TickPlan {
    start: Vec<String>,
    stop: Vec<String>,
}

/// Pure diff of one reconciliation snapshot.
///
/// `start` is every online serial without a running worker, which folds the
/// materialized-but-unregistered retry path into the create path (the whole
/// create chain is idempotent). `stop` is every registered or running serial
/// whose device is gone. Sorted so per-tick ordering is deterministic.
fn plan(online: &[String], registered: &HashSet<String>, running: &HashSet<String>) -> TickPlan {
    let online_set: HashSet<&str> = online.iter().map(String::as_str).collect();

    let mut start: Vec<String> = online
        .iter()
        .filter(|s| !running.contains(*s))
        .cloned()
        .collect();
    start.sort();
    start.dedup();

    let mut stop: Vec<String> = registered
        .union(running)
        .filter(|s| !online_set.contains(s.as_str()))
        .cloned()
        .collect();
    stop.sort();
    stop.dedup();

    TickPlan { start, stop }
}

impl Manager {
    pub fn new(
        config: ManagerConfig,
        inventory: Arc<dyn DeviceInventory>,
        control_plane: Arc<dyn ControlPlane>,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Self {
        Self {
            config,
            inventory,
            control_plane,
            launcher,
            active: HashMap::new(),
            ticks: 0,
        }
    }

    /// Serials with a live worker handle, sorted.
    pub fn active_serials(&self) -> Vec<String> {
        let mut serials: Vec<String> = self.active.keys().cloned().collect();
        serials.sort();
        serials
    }

    pub async fn run(&mut self) {
        log::info(
            "manager_started",
            serde_json::json!({
                "github_url": self.config.github_url,
                "base_dir": self.config.base_dir.display().to_string(),
                "poll_interval_secs": self.config.poll_interval.as_secs(),
                "grace_period_secs": self.config.grace_period.as_secs(),
            }),
        );

        loop {
            self.tick().await;
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    log::info("shutdown_requested", serde_json::json!({}));
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        self.drain().await;
    }

    /// Setup mode: a single reconciliation pass, then a clean drain. Shares
    /// the tick algorithm with `run`; only the repetition differs.
    pub async fn run_once(&mut self) {
        log::info(
            "setup_pass_started",
            serde_json::json!({
                "github_url": self.config.github_url,
                "base_dir": self.config.base_dir.display().to_string(),
            }),
        );
        self.tick().await;
        self.drain().await;
    }

    pub async fn tick(&mut self) {
        self.ticks += 1;
        self.reap_exited().await;

        // Steps up to the plan are pure reads; all mutation happens in the
        // start/stop passes below.
        let online = match self.inventory.list_online().await {
            Ok(online) => online,
            Err(e) => {
                log::error(
                    "inventory_error",
                    serde_json::json!({"tick": self.ticks, "error": e.to_string()}),
                );
                return;
            }
        };

        let known = match store::scan(&self.config.base_dir).await {
            Ok(known) => known,
            Err(e) => {
                log::error(
                    "store_scan_error",
                    serde_json::json!({"tick": self.ticks, "error": e.to_string()}),
                );
                return;
            }
        };
        let registered: HashSet<String> = known
            .iter()
            .filter(|d| d.registered)
            .map(|d| d.serial.clone())
            .collect();
        let running: HashSet<String> = self.active.keys().cloned().collect();

        let plan = plan(&online, &registered, &running);

        for serial in &plan.start {
            if let Err(e) = self.bring_up(serial).await {
                log::error(
                    "reconcile_error",
                    serde_json::json!({"serial": serial, "phase": "bring_up", "error": e.to_string()}),
                );
            }
        }

        for serial in &plan.stop {
            if let Err(e) = self.tear_down(serial).await {
                log::error(
                    "reconcile_error",
                    serde_json::json!({"serial": serial, "phase": "tear_down", "error": e.to_string()}),
                );
            }
        }

        log::info(
            "tick",
            serde_json::json!({"tick": self.ticks, "active": self.active_serials()}),
        );
    }

    /// Lazy exit detection: a worker that died on its own is dropped from
    /// tracking here and, if its device is still online, restarted by this
    /// same tick's start pass.
    async fn reap_exited(&mut self) {
        let mut exited = Vec::new();
        for (serial, handle) in self.active.iter_mut() {
            if !handle.is_running().await {
                exited.push(serial.clone());
            }
        }
        for serial in exited {
            log::warn("worker_exited", serde_json::json!({"serial": serial}));
            self.active.remove(&serial);
        }
    }

    /// Create path: materialize, register, start, strictly in that order.
    async fn bring_up(&mut self, serial: &str) -> Result<()> {
        let dir = provision::ensure_materialized(&self.config.base_dir, serial).await?;
        let attrs = self.inventory.attrs(serial).await;
        provision::ensure_registered(self.control_plane.as_ref(), &dir, serial, &attrs).await?;
        let handle = self.launcher.launch(&dir, serial).await?;
        self.active.insert(serial.to_string(), handle);
        Ok(())
    }

    /// Remove path: stop, deregister, delete, strictly in that order. The
    /// directory survives a failed deregistration so the next scan queues
    /// the serial again; it is deleted only once the control plane reports
    /// the runner removed or unknown.
    async fn tear_down(&mut self, serial: &str) -> Result<()> {
        if let Some(mut handle) = self.active.remove(serial) {
            log::info(
                "stopping_worker",
                serde_json::json!({"serial": serial, "pid": handle.pid()}),
            );
            if let Err(e) = handle.stop(serial, self.config.grace_period).await {
                // The handle stays dropped either way: a failed force-kill
                // must not wedge the loop. The orphan is operator-visible.
                log::error(
                    "stop_error",
                    serde_json::json!({"serial": serial, "error": e.to_string()}),
                );
            }
        }

        let dir = store::runner_dir(&self.config.base_dir, serial);
        if store::is_registered(&dir).await {
            match self.control_plane.deregister(&dir, serial).await? {
                DeregisterOutcome::Removed => {
                    log::info("runner_deregistered", serde_json::json!({"serial": serial}));
                }
                DeregisterOutcome::NotFound => {
                    log::warn(
                        "runner_already_absent",
                        serde_json::json!({"serial": serial}),
                    );
                }
            }
            store::remove(&dir).await?;
            log::info(
                "runner_removed",
                serde_json::json!({"serial": serial, "dir": dir.display().to_string()}),
            );
        }
        Ok(())
    }

    async fn drain(&mut self) {
        for (serial, mut handle) in std::mem::take(&mut self.active) {
            log::info(
                "stopping_worker",
                serde_json::json!({"serial": serial, "pid": handle.pid()}),
            );
            if let Err(e) = handle.stop(&serial, self.config.grace_period).await {
                log::error(
                    "stop_error",
                    serde_json::json!({"serial": serial, "error": e.to_string()}),
                );
            }
        }
        log::info("manager_stopped", serde_json::json!({"ticks": self.ticks}));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn vec_of(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn plan_starts_new_devices() {
        let p = plan(&vec_of(&["A", "B"]), &set(&[]), &set(&[]));
        assert_eq!(p.start, vec_of(&["A", "B"]));
        assert!(p.stop.is_empty());
    }

    #[test]
    fn plan_leaves_converged_state_alone() {
        let p = plan(&vec_of(&["A"]), &set(&["A"]), &set(&["A"]));
        assert!(p.start.is_empty());
        assert!(p.stop.is_empty());
    }

    #[test]
    fn plan_requeues_registered_but_not_running() {
        // Provisioned earlier, process not up (e.g. launch failed last tick).
        let p = plan(&vec_of(&["A"]), &set(&["A"]), &set(&[]));
        assert_eq!(p.start, vec_of(&["A"]));
        assert!(p.stop.is_empty());
    }

    #[test]
    fn plan_stops_departed_devices() {
        let p = plan(&vec_of(&[]), &set(&["A"]), &set(&["A", "B"]));
        assert_eq!(p.stop, vec_of(&["A", "B"]));
        assert!(p.start.is_empty());
    }

    #[test]
    fn plan_ignores_unregistered_offline_leftovers() {
        // A materialized dir without a marker for an offline device is
        // neither started nor torn down; it waits for the device to return.
        let p = plan(&vec_of(&["B"]), &set(&[]), &set(&[]));
        assert_eq!(p.start, vec_of(&["B"]));
        assert!(p.stop.is_empty());
    }

    #[test]
    fn plan_output_is_sorted_and_deduped() {
        let p = plan(
            &vec_of(&["C", "A", "C"]),
            &set(&["Z", "Y"]),
            &set(&["Y"]),
        );
        assert_eq!(p.start, vec_of(&["A", "C"]));
        assert_eq!(p.stop, vec_of(&["Y", "Z"]));
    }
}
