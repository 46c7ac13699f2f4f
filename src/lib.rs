//! droidrunnerd: keeps one registered, running GitHub Actions self-hosted
//! runner per adb-attached Android device.
//!
//! The manager polls the device inventory on a fixed interval and converges
//! on-disk runner state and live runner processes toward the online-device
//! set. External collaborators (adb, the runner's config.sh, its run.sh)
//! sit behind traits so the reconciliation logic is testable without
//! hardware.

pub mod adb;
pub mod error;
pub mod github;
pub mod log;
pub mod manager;
pub mod process;
pub mod provision;
pub mod store;
pub mod types;
