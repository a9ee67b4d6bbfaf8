//! Background supervision threads: the watchdog and the daily summary.
//!
//! Both threads sleep on a stop channel with `recv_timeout`, so `stop()`
//! wakes them immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveTime};

use crate::event_log::summary_text;
use crate::session::{DetectionSession, SessionState};

/// Handle to a supervision thread.
#[derive(Debug)]
pub struct SupervisorHandle {
    name: &'static str,
    stop_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl SupervisorHandle {
    pub fn stop(mut self) -> Result<()> {
        let _ = self.stop_tx.send(());
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("{} thread panicked", self.name)),
            None => Ok(()),
        }
    }
}

fn spawn_supervisor(
    name: &'static str,
    body: impl FnOnce(mpsc::Receiver<()>) + Send + 'static,
) -> Result<SupervisorHandle> {
    let (stop_tx, stop_rx) = mpsc::channel();
    let join = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || body(stop_rx))?;
    Ok(SupervisorHandle {
        name,
        stop_tx,
        join: Some(join),
    })
}

// ----------------------------------------------------------------------------
// Watchdog
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct WatchdogConfig {
    pub interval: Duration,
    pub auto_restart: bool,
    pub max_restarts: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            auto_restart: false,
            max_restarts: 3,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WatchdogCheck {
    pub listener_down: bool,
    pub restarted: bool,
    pub restart_failed: bool,
    pub restart_limit_reached: bool,
}

pub struct Watchdog {
    session: Arc<DetectionSession>,
    listener: Option<Arc<AtomicBool>>,
    config: WatchdogConfig,
    restarts: u32,
}

impl Watchdog {
    /// `listener` is the remote listener's liveness flag, when one runs.
    pub fn new(
        session: Arc<DetectionSession>,
        listener: Option<Arc<AtomicBool>>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            session,
            listener,
            config,
            restarts: 0,
        }
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn check(&mut self) -> WatchdogCheck {
        let mut check = WatchdogCheck::default();
        if let Some(listener) = &self.listener {
            if !listener.load(Ordering::SeqCst) {
                log::warn!("watchdog: remote listener is not running");
                check.listener_down = true;
            }
        }

        let shared = self.session.shared();
        let crashed = shared.state() == SessionState::Idle
            && shared.last_run_unexpected()
            && !self.session.is_worker_alive();
        if !crashed {
            return check;
        }
        if !self.config.auto_restart {
            log::warn!("watchdog: detection ended unexpectedly; auto-restart disabled");
            return check;
        }
        if self.restarts >= self.config.max_restarts {
            log::warn!(
                "watchdog: detection down, restart limit ({}) reached",
                self.config.max_restarts
            );
            check.restart_limit_reached = true;
            return check;
        }

        self.restarts += 1;
        match self.session.start() {
            Ok(()) => {
                log::info!("watchdog: detection restarted (attempt {})", self.restarts);
                check.restarted = true;
            }
            Err(err) => {
                log::error!("watchdog: restart attempt {} failed: {}", self.restarts, err);
                check.restart_failed = true;
            }
        }
        check
    }

    pub fn spawn(mut self) -> Result<SupervisorHandle> {
        let interval = self.config.interval;
        spawn_supervisor("watchdog", move |stop_rx| loop {
            match stop_rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    self.check();
                }
                _ => break,
            }
        })
    }
}

// ----------------------------------------------------------------------------
// Daily summary
// ----------------------------------------------------------------------------

/// Default local time for the end-of-day summary.
pub fn default_summary_time() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN)
}

/// The next occurrence of `at` strictly after `now`.
pub fn next_run_after(now: DateTime<Local>, at: NaiveTime) -> DateTime<Local> {
    let mut date = now.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = date.and_time(at).and_local_timezone(Local).earliest() {
            if candidate > now {
                return candidate;
            }
        }
        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    now + chrono::Duration::days(1)
}

/// Build the summary for `date`, reset the daily counter and send it.
pub fn send_daily_summary(session: &DetectionSession, date: NaiveDate) -> String {
    let text = match session.event_log() {
        Some(event_log) => event_log.daily_summary(date).unwrap_or_else(|err| {
            log::error!("summary: failed to read motion log: {:#}", err);
            summary_text(date, &[])
        }),
        None => summary_text(date, &[]),
    };
    let count = session.shared().reset_daily_count();
    log::info!("summary: {} events on {}, counter reset", count, date);
    session.alerts().notify_summary(&text);
    text
}

pub fn spawn_daily_summary(
    session: Arc<DetectionSession>,
    at: NaiveTime,
) -> Result<SupervisorHandle> {
    spawn_supervisor("daily-summary", move |stop_rx| loop {
        let now = Local::now();
        let next = next_run_after(now, at);
        log::info!("summary: next daily summary at {}", next.format("%Y-%m-%d %H:%M:%S"));
        let delay = (next - now).to_std().unwrap_or(Duration::from_secs(60));
        match stop_rx.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => {
                send_daily_summary(&session, next.date_naive());
            }
            _ => break,
        }
    })
}
