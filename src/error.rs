//! Error types for droidrunnerd

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("device inventory query failed: {0}")]
    Inventory(String),

    #[error("device {serial}: materialization failed: {reason}")]
    Materialization { serial: String, reason: String },

    #[error("device {serial}: registration failed: {reason}")]
    Registration { serial: String, reason: String },

    #[error("device {serial}: worker launch failed: {reason}")]
    Launch { serial: String, reason: String },

    #[error("device {serial}: worker stop failed: {reason}")]
    Stop { serial: String, reason: String },

    #[error("device {serial}: deregistration failed: {reason}")]
    Deregistration { serial: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn materialization(serial: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Materialization {
            serial: serial.into(),
            reason: reason.into(),
        }
    }

    pub fn registration(serial: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Registration {
            serial: serial.into(),
            reason: reason.into(),
        }
    }

    pub fn launch(serial: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Launch {
            serial: serial.into(),
            reason: reason.into(),
        }
    }

    pub fn stop(serial: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Stop {
            serial: serial.into(),
            reason: reason.into(),
        }
    }

    pub fn deregistration(serial: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Deregistration {
            serial: serial.into(),
            reason: reason.into(),
        }
    }
}
