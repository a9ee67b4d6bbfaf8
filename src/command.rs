//! Command surface shared by the console front-end and the remote listener.
//!
//! Every entry point is safe to call from any thread. Replies are plain
//! text so both front-ends can show them unchanged.

use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::error::SessionError;
use crate::session::{DetectionSession, SessionState, SessionStatus, StopOutcome};

/// Recent log lines included in an on-demand summary.
const SUMMARY_RECENT: usize = 5;

/// Asked before an operator stop when confirmation is required.
pub trait StopConfirmation: Send + Sync {
    fn confirm(&self) -> bool;
}

/// Confirms every stop.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysConfirm;

impl StopConfirmation for AlwaysConfirm {
    fn confirm(&self) -> bool {
        true
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartReply {
    Started,
    AlreadyRunning,
    /// A previous worker has not exited yet.
    Busy,
    DeviceUnavailable(String),
    Failed(String),
}

impl StartReply {
    pub fn message(&self) -> String {
        match self {
            StartReply::Started => "Motion detection started.".to_string(),
            StartReply::AlreadyRunning => "Motion detection is already running.".to_string(),
            StartReply::Busy => {
                "Previous detection run is still shutting down. Try again shortly.".to_string()
            }
            StartReply::DeviceUnavailable(reason) => {
                format!("Could not start motion detection: {}", reason)
            }
            StartReply::Failed(reason) => format!("Failed to start motion detection: {}", reason),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReply {
    Stopped,
    AlreadyIdle,
    AlreadyStopping,
    Declined,
    Incomplete,
}

impl StopReply {
    pub fn message(&self) -> &'static str {
        match self {
            StopReply::Stopped => "Motion detection stopped.",
            StopReply::AlreadyIdle => "Motion detection is already idle.",
            StopReply::AlreadyStopping => "Motion detection is already stopping.",
            StopReply::Declined => "Stop cancelled.",
            StopReply::Incomplete => concat!(
                "Stop requested, but the detection thread did not exit in time. ",
                "Shutdown may be incomplete."
            ),
        }
    }
}

#[derive(Clone)]
pub struct CommandSurface {
    session: Arc<DetectionSession>,
    confirmation: Arc<dyn StopConfirmation>,
}

impl CommandSurface {
    pub fn new(session: Arc<DetectionSession>, confirmation: Arc<dyn StopConfirmation>) -> Self {
        Self {
            session,
            confirmation,
        }
    }

    pub fn session(&self) -> &Arc<DetectionSession> {
        &self.session
    }

    pub fn start_detection(&self) -> StartReply {
        match self.session.start() {
            Ok(()) => StartReply::Started,
            Err(SessionError::AlreadyRunning) => StartReply::AlreadyRunning,
            Err(SessionError::PreviousWorkerAlive) => StartReply::Busy,
            Err(SessionError::DeviceUnavailable(err)) => {
                StartReply::DeviceUnavailable(err.to_string())
            }
            Err(err) => StartReply::Failed(err.to_string()),
        }
    }

    pub fn stop_detection(&self, require_confirmation: bool) -> StopReply {
        if !self.session.is_worker_alive() {
            return StopReply::AlreadyIdle;
        }
        if self.session.shared().stop_in_progress() {
            return StopReply::AlreadyStopping;
        }
        if require_confirmation && !self.confirmation.confirm() {
            log::info!("command: stop declined");
            return StopReply::Declined;
        }
        match self.session.stop() {
            StopOutcome::Stopped => StopReply::Stopped,
            StopOutcome::AlreadyIdle => StopReply::AlreadyIdle,
            StopOutcome::AlreadyStopping => StopReply::AlreadyStopping,
            StopOutcome::Incomplete => StopReply::Incomplete,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    /// Multi-line status for operators. `listener` is the remote listener's
    /// liveness when one is configured.
    pub fn status_report(&self, now: DateTime<Local>, listener: Option<bool>) -> String {
        format_status(&self.status(), now, listener)
    }

    /// Today's counters plus the most recent logged events.
    pub fn summary_report(&self, now: DateTime<Local>) -> String {
        let status = self.status();
        let mut lines = vec![
            format!("Motion Summary for {}", now.format("%Y-%m-%d")),
            format!("Motion events today: {}", status.events_today),
            last_motion_line(status.last_motion, now),
        ];
        match self.session.event_log() {
            Some(event_log) => match event_log.entries_for(now.date_naive()) {
                Ok(entries) if entries.is_empty() => {
                    lines.push("No logged motion events yet.".to_string())
                }
                Ok(entries) => {
                    lines.push("Recent motion events:".to_string());
                    let start = entries.len().saturating_sub(SUMMARY_RECENT);
                    lines.extend(entries[start..].iter().cloned());
                }
                Err(err) => {
                    log::error!("command: failed to read motion log: {:#}", err);
                    lines.push("Could not read motion log.".to_string());
                }
            },
            None => lines.push("No logged motion events yet.".to_string()),
        }
        lines.join("\n")
    }
}

pub fn format_status(
    status: &SessionStatus,
    now: DateTime<Local>,
    listener: Option<bool>,
) -> String {
    let mut lines = vec!["System Status:".to_string()];
    let detection = match status.state {
        SessionState::Idle => "Detection is idle".to_string(),
        SessionState::Cooldown => {
            format!("Detection in cooldown ({}s left)", status.cooldown_remaining)
        }
        SessionState::Detecting => "Detection running".to_string(),
        SessionState::Recording => "Detection running (recording clip)".to_string(),
        SessionState::ShuttingDown => "Detection shutting down".to_string(),
    };
    lines.push(detection);
    if status.shutdown_incomplete {
        lines.push("Warning: last shutdown may be incomplete".to_string());
    }
    if let Some(err) = &status.last_error {
        lines.push(format!("Last error: {}", err));
    }
    match listener {
        Some(true) => lines.push("Remote listener running".to_string()),
        Some(false) => lines.push("Remote listener is stopped".to_string()),
        None => {}
    }
    lines.push(last_motion_line(status.last_motion, now));
    lines.push(format!("Motion events today: {}", status.events_today));
    lines.join("\n")
}

fn last_motion_line(last: Option<DateTime<Local>>, now: DateTime<Local>) -> String {
    match last {
        Some(at) => format!(
            "Last motion detected at: {} ({})",
            at.format("%Y-%m-%d %H:%M:%S"),
            format_ago((now - at).num_seconds())
        ),
        None => "No motion detected yet".to_string(),
    }
}

fn format_ago(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let (minutes, seconds) = (seconds / 60, seconds % 60);
    if minutes > 0 {
        format!("{}m {}s ago", minutes, seconds)
    } else {
        format!("{}s ago", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn status(state: SessionState) -> SessionStatus {
        SessionStatus {
            state,
            last_motion: None,
            events_today: 0,
            cooldown_remaining: 0,
            last_error: None,
            shutdown_incomplete: false,
        }
    }

    #[test]
    fn ago_formatting() {
        assert_eq!(format_ago(5), "5s ago");
        assert_eq!(format_ago(125), "2m 5s ago");
        assert_eq!(format_ago(-3), "0s ago");
    }

    #[test]
    fn status_mentions_cooldown_and_motion() {
        let now = Local::now();
        let mut s = status(SessionState::Cooldown);
        s.cooldown_remaining = 12;
        s.events_today = 3;
        s.last_motion = Some(now - Duration::seconds(61));

        let text = format_status(&s, now, Some(true));

        assert!(text.contains("Detection in cooldown (12s left)"));
        assert!(text.contains("(1m 1s ago)"));
        assert!(text.contains("Motion events today: 3"));
        assert!(text.contains("Remote listener running"));
    }

    #[test]
    fn idle_status_reports_incomplete_shutdown() {
        let mut s = status(SessionState::Idle);
        s.shutdown_incomplete = true;
        let text = format_status(&s, Local::now(), None);
        assert!(text.contains("Detection is idle"));
        assert!(text.contains("shutdown may be incomplete"));
        assert!(text.contains("No motion detected yet"));
        assert!(!text.contains("Remote listener"));
    }

    #[test]
    fn reply_texts() {
        assert_eq!(
            StartReply::AlreadyRunning.message(),
            "Motion detection is already running."
        );
        assert_eq!(StopReply::AlreadyIdle.message(), "Motion detection is already idle.");
    }
}
