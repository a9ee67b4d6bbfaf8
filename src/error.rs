//! Error taxonomy for the detection pipeline.
//!
//! Only `CaptureError::DeviceUnavailable` (at session start) and unexpected
//! loop failures end a session. Everything else is absorbed by the stage that
//! produced it and logged.

use std::path::PathBuf;

use thiserror::Error;

/// Camera-side failures.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device could not be opened or did not report itself as opened.
    #[error("camera {device} unavailable: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    /// A single frame read failed. Retried by the session after a backoff.
    #[error("frame read failed: {0}")]
    ReadFailure(String),

    /// The handle is gone (released or the device vanished). Not retried.
    #[error("camera disconnected: {0}")]
    Disconnected(String),
}

impl CaptureError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CaptureError::ReadFailure(_))
    }
}

/// Failures while writing a clip. A recording that captured zero frames is
/// not an error; it is reported as `Ok(None)` by the recorder.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to open clip writer for {path}: {reason}")]
    WriterOpen { path: PathBuf, reason: String },

    #[error("failed to write frame to {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("clip io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the session's public lifecycle operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    DeviceUnavailable(#[from] CaptureError),

    #[error("detection is already running")]
    AlreadyRunning,

    #[error("previous detection worker has not exited yet")]
    PreviousWorkerAlive,

    #[error("failed to spawn detection worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Per-channel delivery failure. Never propagated past the dispatcher.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{channel}: missing configuration ({what})")]
    NotConfigured {
        channel: &'static str,
        what: &'static str,
    },

    #[error("{channel}: attachment {path} not found")]
    MissingAttachment { channel: &'static str, path: PathBuf },

    #[error("{channel}: transport failed: {source}")]
    Transport {
        channel: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got {value:?}")]
    InvalidValue {
        key: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0}")]
    Invalid(String),
}
