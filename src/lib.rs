//! Motion Watch
//!
//! A single-camera motion monitor. A detection session reads frame pairs,
//! scores them with a fixed pixel-difference pipeline and, on motion, records
//! a short clip, compresses it and fans out alerts before a cooldown.
//!
//! # Module Structure
//!
//! - `capture`: camera handle and frame sources (synthetic, V4L2)
//! - `detect`: motion scoring
//! - `recorder`, `compress`: clip recording and re-encoding
//! - `alert`: notification fan-out (Telegram, email)
//! - `session`: the detection state machine and its worker thread
//! - `command`, `telegram`: operator and remote command surfaces
//! - `supervisor`: watchdog and daily summary threads
//! - `event_log`, `retention`: persisted event log and clip cleanup

pub mod alert;
pub mod capture;
pub mod command;
pub mod compress;
pub mod config;
pub mod cooldown;
pub mod detect;
pub mod error;
pub mod event_log;
pub mod frame;
pub mod recorder;
pub mod retention;
pub mod session;
pub mod supervisor;
pub mod telegram;

pub use alert::{AlertChannel, AlertDispatcher, AlertKind, DeliveryReport, DispatchTicket};
pub use capture::{CameraDevice, CameraHandle, CameraProvider, DeviceCameraProvider, FrameSource};
pub use command::{CommandSurface, StartReply, StopConfirmation, StopReply};
pub use compress::{Compressor, FfmpegCompressor, Passthrough};
pub use config::MonitorConfig;
pub use cooldown::{CooldownOutcome, CooldownTimer};
pub use detect::{MotionClassifier, MotionScore, DEFAULT_MOTION_THRESHOLD};
pub use error::{CaptureError, ConfigError, DeliveryError, RecordError, SessionError};
pub use event_log::EventLog;
pub use frame::Frame;
pub use recorder::{
    ClipRecorder, ClipWriter, ClipWriterFactory, FfmpegClipWriterFactory, RecordSpec,
};
pub use session::{
    DetectionSession, SessionDeps, SessionEvent, SessionSettings, SessionState, SessionStatus,
    StopOutcome, Timings,
};
