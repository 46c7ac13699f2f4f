//! Structured event log: one JSON object per line on stderr, mirrored into
//! a manager.log file under the runner base directory once configured.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::Utc;
use serde::Serialize;

static LOG_FILE: OnceLock<PathBuf> = OnceLock::new();

/// Mirror every event into `path` (append). Set once at startup, before the
/// loop; later calls are ignored.
pub fn set_log_file(path: PathBuf) {
    let _ = LOG_FILE.set(path);
}

#[derive(Debug, Serialize)]
pub struct LogEvent {
    pub ts: String,
    pub level: &'static str,
    pub event: &'static str,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

pub fn emit(level: &'static str, event: &'static str, data: serde_json::Value) {
    let entry = LogEvent {
        ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        level,
        event,
        data,
    };
    if let Ok(json) = serde_json::to_string(&entry) {
        eprintln!("{json}");
        if let Some(path) = LOG_FILE.get() {
            if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
                let _ = writeln!(file, "{json}");
            }
        }
    }
}

pub fn info(event: &'static str, data: serde_json::Value) {
    emit("info", event, data);
}

pub fn warn(event: &'static str, data: serde_json::Value) {
    emit("warn", event, data);
}

pub fn error(event: &'static str, data: serde_json::Value) {
    emit("error", event, data);
}
