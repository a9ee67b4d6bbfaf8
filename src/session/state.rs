use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};

use crate::frame::Frame;

/// Lifecycle state of the detection session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Detecting,
    Recording,
    Cooldown,
    ShuttingDown,
}

impl SessionState {
    fn as_u8(self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::Detecting => 1,
            SessionState::Recording => 2,
            SessionState::Cooldown => 3,
            SessionState::ShuttingDown => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Detecting,
            2 => SessionState::Recording,
            3 => SessionState::Cooldown,
            4 => SessionState::ShuttingDown,
            _ => SessionState::Idle,
        }
    }

    /// Detecting, Recording or Cooldown.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            SessionState::Detecting | SessionState::Recording | SessionState::Cooldown
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Detecting => "detecting",
            SessionState::Recording => "recording",
            SessionState::Cooldown => "cooldown",
            SessionState::ShuttingDown => "shutting down",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The session-wide "active" flag polled by the worker at every checkpoint.
#[derive(Clone, Debug, Default)]
pub struct ActiveFlag(Arc<AtomicBool>);

impl ActiveFlag {
    pub fn new(initial: bool) -> Self {
        Self(Arc::new(AtomicBool::new(initial)))
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Events published by the session to front-ends.
#[derive(Clone, Debug)]
pub enum SessionEvent {
    StateChanged(SessionState),
    CooldownTick { remaining: u32 },
    CooldownFinished,
    Preview(Frame),
    MotionRecorded { clip: PathBuf },
    RecordingEmpty,
    Terminated { unexpected: bool, reason: Option<String> },
    ShutdownIncomplete,
}

/// Fan-out of session events to any number of subscribers.
#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
}

impl EventHub {
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    /// Deliver to every live subscriber, dropping the ones that hung up.
    pub fn publish(&self, event: SessionEvent) {
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    pub fn has_subscribers(&self) -> bool {
        self.subscribers
            .lock()
            .map(|subs| !subs.is_empty())
            .unwrap_or(false)
    }
}

/// Snapshot returned by the command surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub last_motion: Option<DateTime<Local>>,
    pub events_today: u64,
    pub cooldown_remaining: u32,
    pub last_error: Option<String>,
    pub shutdown_incomplete: bool,
}

/// State shared between the worker thread and control threads.
///
/// Everything here is either atomic or behind a short-lived mutex; the
/// camera handle is deliberately not part of it.
#[derive(Debug, Default)]
pub struct SessionShared {
    pub active: ActiveFlag,
    state: AtomicU8,
    cooldown_remaining: Arc<AtomicU32>,
    manual_stop: AtomicBool,
    stop_in_progress: AtomicBool,
    shutdown_incomplete: AtomicBool,
    events_today: AtomicU64,
    last_motion: Mutex<Option<DateTime<Local>>>,
    last_error: Mutex<Option<String>>,
    last_run_unexpected: AtomicBool,
}

impl SessionShared {
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Store the new state; returns the previous one.
    pub(crate) fn set_state(&self, state: SessionState) -> SessionState {
        SessionState::from_u8(self.state.swap(state.as_u8(), Ordering::SeqCst))
    }

    pub fn cooldown_counter(&self) -> Arc<AtomicU32> {
        self.cooldown_remaining.clone()
    }

    pub fn cooldown_remaining(&self) -> u32 {
        self.cooldown_remaining.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_manual_stop(&self) {
        self.manual_stop.store(true, Ordering::SeqCst);
    }

    pub fn manual_stop_requested(&self) -> bool {
        self.manual_stop.load(Ordering::SeqCst)
    }

    /// Claim the stop slot. Returns false when another stop holds it.
    pub(crate) fn begin_stop(&self) -> bool {
        self.stop_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn end_stop(&self) {
        self.stop_in_progress.store(false, Ordering::SeqCst);
    }

    pub fn stop_in_progress(&self) -> bool {
        self.stop_in_progress.load(Ordering::SeqCst)
    }

    pub(crate) fn set_shutdown_incomplete(&self, value: bool) {
        self.shutdown_incomplete.store(value, Ordering::SeqCst);
    }

    pub(crate) fn record_motion(&self, at: DateTime<Local>) -> u64 {
        if let Ok(mut last) = self.last_motion.lock() {
            *last = Some(at);
        }
        self.events_today.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reset the daily counter; returns the count it had.
    pub fn reset_daily_count(&self) -> u64 {
        self.events_today.swap(0, Ordering::SeqCst)
    }

    pub fn events_today(&self) -> u64 {
        self.events_today.load(Ordering::SeqCst)
    }

    pub fn last_motion(&self) -> Option<DateTime<Local>> {
        self.last_motion.lock().ok().and_then(|last| *last)
    }

    pub(crate) fn set_last_error(&self, error: Option<String>) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = error;
        }
    }

    pub(crate) fn set_last_run_unexpected(&self, value: bool) {
        self.last_run_unexpected.store(value, Ordering::SeqCst);
    }

    /// Whether the most recent run ended without a stop request.
    pub fn last_run_unexpected(&self) -> bool {
        self.last_run_unexpected.load(Ordering::SeqCst)
    }

    /// Per-run flags cleared after a worker has been joined.
    pub(crate) fn reset_run_flags(&self) {
        self.manual_stop.store(false, Ordering::SeqCst);
        self.cooldown_remaining.store(0, Ordering::SeqCst);
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state(),
            last_motion: self.last_motion(),
            events_today: self.events_today(),
            cooldown_remaining: self.cooldown_remaining(),
            last_error: self.last_error.lock().ok().and_then(|e| e.clone()),
            shutdown_incomplete: self.shutdown_incomplete.load(Ordering::SeqCst),
        }
    }
}
