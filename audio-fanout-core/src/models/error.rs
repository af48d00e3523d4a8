use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Session-level errors.
///
/// `UnsupportedFormat`, `DeviceNotAvailable` and `ConfigurationFailed` abort
/// `start` before any sink is created. Everything a single output does wrong
/// is a [`SinkError`] instead and never surfaces here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("unsupported source format: {0}")]
    UnsupportedFormat(String),

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("interrupted: {0}")]
    Interrupted(String),

    #[error("resume failed after {attempts} attempts: {reason}")]
    ResumeFailed { attempts: u32, reason: String },

    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Failure of one output. Latched on the sink that produced it and reported
/// in the per-sink results; never propagated across sink boundaries.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SinkError {
    #[error("sink failed to start: {0}")]
    Start(String),

    #[error("sink write failed: {0}")]
    Write(String),

    #[error("sink failed to finalize: {0}")]
    Finalize(String),

    #[error("encoder failed: {0}")]
    Encoder(String),

    #[error("sink timed out: {0}")]
    Timeout(String),

    #[error("failed to discard output: {0}")]
    Discard(String),
}
