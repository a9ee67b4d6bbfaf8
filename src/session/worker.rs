use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Local;

use super::{SessionEvent, SessionInner, SessionState};
use crate::capture::CameraHandle;
use crate::cooldown::{CooldownOutcome, CooldownTimer};
use crate::error::CaptureError;
use crate::frame::Frame;
use crate::recorder::PreviewThrottle;

/// Worker thread body. Owns the camera until teardown releases it.
pub(super) fn run(inner: Arc<SessionInner>, mut camera: CameraHandle) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| detection_loop(&inner, &mut camera)));
    let reason = match result {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(format!("{:#}", err)),
        Err(payload) => Some(panic_message(payload.as_ref())),
    };
    teardown(&inner, &mut camera, reason);
}

fn detection_loop(inner: &SessionInner, camera: &mut CameraHandle) -> Result<()> {
    let shared = &inner.shared;
    let timings = inner.settings.timings;
    let classifier = &inner.deps.classifier;
    let cooldown = CooldownTimer::new(timings.cooldown_tick, shared.cooldown_counter());
    let mut preview = PreviewThrottle::new(inner.deps.recorder.preview_interval());

    inner.transition(SessionState::Detecting);
    log::info!(
        "session: detecting (threshold {}, cooldown {}s)",
        classifier.threshold(),
        inner.settings.cooldown_seconds
    );

    while shared.active.is_set() {
        let (first, second) = match read_pair(inner, camera) {
            Ok(pair) => pair,
            Err(_) if !shared.active.is_set() => break,
            Err(err) if err.is_transient() => {
                log::warn!("session: {}; retrying in {:?}", err, timings.read_retry_backoff);
                std::thread::sleep(timings.read_retry_backoff);
                continue;
            }
            Err(err) => return Err(err.into()),
        };
        if !shared.active.is_set() {
            break;
        }

        let score = classifier.score(&first, &second);
        if inner.hub.has_subscribers() && preview.should_emit(Instant::now()) {
            inner.hub.publish(SessionEvent::Preview(second));
        }
        if !score.exceeds(classifier.threshold()) {
            continue;
        }
        log::info!("session: motion detected (score {})", score);

        record_event(inner, camera);
        if !shared.active.is_set() {
            break;
        }
        run_cooldown(inner, &cooldown);
        if shared.active.is_set() {
            inner.transition(SessionState::Detecting);
        }
    }
    Ok(())
}

fn read_pair(
    inner: &SessionInner,
    camera: &mut CameraHandle,
) -> Result<(Frame, Frame), CaptureError> {
    let first = camera.read_frame()?;
    std::thread::sleep(inner.settings.timings.pair_gap);
    let second = camera.read_frame()?;
    Ok((first, second))
}

/// Record, compress, log and alert. Every outcome is followed by cooldown.
fn record_event(inner: &SessionInner, camera: &mut CameraHandle) {
    let shared = &inner.shared;
    inner.transition(SessionState::Recording);

    let hub = &inner.hub;
    let mut preview = |frame: &Frame| {
        if hub.has_subscribers() {
            hub.publish(SessionEvent::Preview(frame.clone()));
        }
    };
    let recorded = inner.deps.recorder.record(
        camera,
        inner.settings.record,
        &shared.active,
        &mut preview,
    );

    let clip = match recorded {
        Ok(Some(clip)) => clip,
        Ok(None) => {
            log::warn!("session: recording captured no frames, skipping alert");
            hub.publish(SessionEvent::RecordingEmpty);
            return;
        }
        Err(err) => {
            log::error!("session: recording failed: {}", err);
            shared.set_last_error(Some(err.to_string()));
            hub.publish(SessionEvent::RecordingEmpty);
            return;
        }
    };

    let path = inner.deps.compressor.compress(&clip.path);
    let now = Local::now();
    let count = shared.record_motion(now);
    if let Some(event_log) = &inner.deps.event_log {
        if let Err(err) = event_log.append(now, &path) {
            log::warn!("session: event log append failed: {:#}", err);
        }
    }
    let ticket = inner.deps.alerts.notify(Some(&path), &inner.settings.motion_message);
    log::info!(
        "session: motion event #{} today, clip {} dispatched to {} channel(s)",
        count,
        path.display(),
        ticket.len()
    );
    hub.publish(SessionEvent::MotionRecorded { clip: path });
}

fn run_cooldown(inner: &SessionInner, cooldown: &CooldownTimer) {
    inner.transition(SessionState::Cooldown);
    let hub = &inner.hub;
    let outcome = cooldown.run(inner.settings.cooldown_seconds, &inner.shared.active, |remaining| {
        hub.publish(SessionEvent::CooldownTick { remaining })
    });
    match outcome {
        CooldownOutcome::Completed => hub.publish(SessionEvent::CooldownFinished),
        CooldownOutcome::Cancelled { remaining } => {
            log::info!("session: cooldown cut short with {}s left", remaining)
        }
    }
}

fn teardown(inner: &SessionInner, camera: &mut CameraHandle, reason: Option<String>) {
    let shared = &inner.shared;
    inner.transition(SessionState::ShuttingDown);
    camera.release();
    shared.active.clear();

    let unexpected = !shared.manual_stop_requested();
    shared.set_last_run_unexpected(unexpected);
    if let Some(reason) = &reason {
        log::error!("session: detection loop failed: {}", reason);
        shared.set_last_error(Some(reason.clone()));
    }
    if unexpected {
        let message = match &reason {
            Some(reason) => format!("Motion detection stopped unexpectedly: {}", reason),
            None => "Motion detection stopped unexpectedly.".to_string(),
        };
        log::warn!("session: {}", message);
        inner.deps.alerts.notify_failure(&message);
    }

    inner.hub.publish(SessionEvent::Terminated { unexpected, reason });
    shared.reset_run_flags();
    inner.transition(SessionState::Idle);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        format!("panic: {}", text)
    } else if let Some(text) = payload.downcast_ref::<String>() {
        format!("panic: {}", text)
    } else {
        "panic in detection loop".to_string()
    }
}
