//! Detection session: one worker thread running the
//! detect → record → cooldown state machine.
//!
//! Control threads talk to the worker only through `SessionShared` (atomic
//! flags and counters) and the `start`/`stop` entry points below. The worker
//! slot mutex is held across the stop join, so a start issued during a stop
//! waits for the previous worker to exit before a second camera can open.

mod state;
mod worker;

pub use state::{
    ActiveFlag, EventHub, SessionEvent, SessionShared, SessionState, SessionStatus,
};

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crate::alert::AlertDispatcher;
use crate::capture::{CameraDevice, CameraHandle, CameraProvider};
use crate::compress::Compressor;
use crate::detect::MotionClassifier;
use crate::error::SessionError;
use crate::event_log::EventLog;
use crate::recorder::{ClipRecorder, RecordSpec};

/// Sleep and timeout intervals used by the worker. Tests shrink these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timings {
    /// Gap between the two reads of a frame pair.
    pub pair_gap: Duration,
    /// Backoff after a transient read failure.
    pub read_retry_backoff: Duration,
    pub cooldown_tick: Duration,
    /// How long `stop` waits for the worker before reporting it wedged.
    pub join_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            pair_gap: Duration::from_millis(50),
            read_retry_backoff: Duration::from_secs(1),
            cooldown_tick: Duration::from_secs(1),
            join_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub cooldown_seconds: u32,
    pub record: RecordSpec,
    pub timings: Timings,
    pub motion_message: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cooldown_seconds: 30,
            record: RecordSpec::default(),
            timings: Timings::default(),
            motion_message: "Motion detected!".to_string(),
        }
    }
}

/// Collaborators injected at construction.
pub struct SessionDeps {
    pub provider: Arc<dyn CameraProvider>,
    pub device: CameraDevice,
    pub classifier: MotionClassifier,
    pub recorder: ClipRecorder,
    pub compressor: Arc<dyn Compressor>,
    pub alerts: AlertDispatcher,
    pub event_log: Option<Arc<EventLog>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// Worker joined; the session is Idle.
    Stopped,
    /// Nothing was running.
    AlreadyIdle,
    /// Another stop is being processed.
    AlreadyStopping,
    /// The worker did not exit within the join timeout.
    Incomplete,
}

pub(crate) struct SessionInner {
    pub(crate) shared: SessionShared,
    pub(crate) hub: EventHub,
    pub(crate) deps: SessionDeps,
    pub(crate) settings: SessionSettings,
}

impl SessionInner {
    /// Store `state`, publishing a change event when it differs.
    pub(crate) fn transition(&self, state: SessionState) {
        let previous = self.shared.set_state(state);
        if previous != state {
            log::debug!("session: {} -> {}", previous, state);
            self.hub.publish(SessionEvent::StateChanged(state));
        }
    }
}

pub struct DetectionSession {
    inner: Arc<SessionInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DetectionSession {
    pub fn new(deps: SessionDeps, settings: SessionSettings) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                shared: SessionShared::default(),
                hub: EventHub::default(),
                deps,
                settings,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn shared(&self) -> &SessionShared {
        &self.inner.shared
    }

    pub fn state(&self) -> SessionState {
        self.inner.shared.state()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.shared.status()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn alerts(&self) -> &AlertDispatcher {
        &self.inner.deps.alerts
    }

    pub fn event_log(&self) -> Option<&EventLog> {
        self.inner.deps.event_log.as_deref()
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.inner.hub.subscribe()
    }

    /// Identity of the current (or last) worker thread.
    pub fn worker_id(&self) -> Option<ThreadId> {
        self.worker_slot().as_ref().map(|h| h.thread().id())
    }

    pub fn is_worker_alive(&self) -> bool {
        self.worker_slot()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the camera and spawn the worker.
    ///
    /// Fails with `AlreadyRunning` (and changes nothing) when a worker is
    /// active, and with `DeviceUnavailable` when the camera cannot be opened,
    /// in which case the session stays Idle.
    pub fn start(&self) -> Result<(), SessionError> {
        let shared = &self.inner.shared;
        let mut slot = self.worker_slot();

        if let Some(handle) = slot.take() {
            if !handle.is_finished() {
                let err = if shared.active.is_set() {
                    SessionError::AlreadyRunning
                } else {
                    SessionError::PreviousWorkerAlive
                };
                *slot = Some(handle);
                return Err(err);
            }
            if handle.join().is_err() {
                log::error!("session: previous worker panicked outside its guard");
            }
            shared.set_shutdown_incomplete(false);
        }
        shared.reset_run_flags();

        let deps = &self.inner.deps;
        let camera = match CameraHandle::open(deps.provider.as_ref(), &deps.device) {
            Ok(camera) => camera,
            Err(err) => {
                log::error!("session: {}", err);
                shared.set_last_error(Some(err.to_string()));
                self.inner.transition(SessionState::Idle);
                return Err(err.into());
            }
        };
        log::info!("session: camera {} opened", camera.device());

        shared.set_last_error(None);
        shared.set_last_run_unexpected(false);
        shared.active.set();
        self.inner.transition(SessionState::Detecting);

        let inner = self.inner.clone();
        let spawned = std::thread::Builder::new()
            .name("detection".to_string())
            .spawn(move || worker::run(inner, camera));
        match spawned {
            Ok(handle) => {
                *slot = Some(handle);
                log::info!("session: detection started");
                Ok(())
            }
            Err(err) => {
                shared.active.clear();
                self.inner.transition(SessionState::Idle);
                Err(SessionError::Spawn(err))
            }
        }
    }

    /// Request a cooperative stop and wait (bounded) for the worker to exit.
    /// Suppresses the failure alert for this run.
    pub fn stop(&self) -> StopOutcome {
        let shared = &self.inner.shared;
        if !shared.begin_stop() {
            log::info!("session: stop already in progress");
            return StopOutcome::AlreadyStopping;
        }
        let outcome = self.stop_worker();
        shared.end_stop();
        outcome
    }

    fn stop_worker(&self) -> StopOutcome {
        let shared = &self.inner.shared;
        let mut slot = self.worker_slot();
        let handle = match slot.take() {
            Some(handle) => handle,
            None => return StopOutcome::AlreadyIdle,
        };
        if handle.is_finished() {
            // Ended on its own; reap it.
            let _ = handle.join();
            shared.reset_run_flags();
            self.inner.transition(SessionState::Idle);
            return StopOutcome::AlreadyIdle;
        }

        log::info!("session: stopping detection");
        shared.mark_manual_stop();
        shared.active.clear();
        self.inner.transition(SessionState::ShuttingDown);

        match join_with_timeout(handle, self.inner.settings.timings.join_timeout) {
            Ok(joined) => {
                if joined.is_err() {
                    log::error!("session: worker panicked outside its guard");
                }
                shared.set_shutdown_incomplete(false);
                shared.reset_run_flags();
                self.inner.transition(SessionState::Idle);
                log::info!("session: detection stopped");
                StopOutcome::Stopped
            }
            Err(handle) => {
                log::warn!(
                    "session: worker did not exit within {:?}; shutdown may be incomplete",
                    self.inner.settings.timings.join_timeout
                );
                shared.set_shutdown_incomplete(true);
                self.inner.hub.publish(SessionEvent::ShutdownIncomplete);
                *slot = Some(handle);
                StopOutcome::Incomplete
            }
        }
    }
}

impl Drop for DetectionSession {
    fn drop(&mut self) {
        if self.is_worker_alive() {
            self.stop();
        }
    }
}

/// Join `handle`, giving up after `timeout`. On timeout the handle is
/// returned so the caller can keep tracking the thread.
fn join_with_timeout(
    handle: JoinHandle<()>,
    timeout: Duration,
) -> Result<std::thread::Result<()>, JoinHandle<()>> {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return Err(handle);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    Ok(handle.join())
}
