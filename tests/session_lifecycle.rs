use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use motion_watch::command::{AlwaysConfirm, CommandSurface};
use motion_watch::{
    AlertChannel, AlertDispatcher, AlertKind, CameraDevice, CameraProvider, CaptureError,
    ClipRecorder, ClipWriter, ClipWriterFactory, Compressor, DeliveryError, DetectionSession,
    EventLog, Frame, FrameSource, MotionClassifier, RecordError, RecordSpec, SessionDeps,
    SessionError, SessionEvent, SessionSettings, SessionState, StartReply, StopOutcome, StopReply,
    Timings,
};

const WAIT: Duration = Duration::from_secs(5);

fn dark() -> Frame {
    Frame::filled(64, 48, [0, 0, 0])
}

fn bright() -> Frame {
    Frame::filled(64, 48, [255, 255, 255])
}

type Script = Arc<Mutex<VecDeque<Result<Frame, CaptureError>>>>;

/// Plays scripted reads, then a still scene forever. Reads block while
/// `held` is set.
struct ScriptedSource {
    script: Script,
    held: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        std::thread::sleep(Duration::from_millis(1));
        while self.held.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(2));
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(dark()))
    }
    fn is_opened(&self) -> bool {
        true
    }
    fn frame_size(&self) -> (u32, u32) {
        (64, 48)
    }
    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeCamera {
    script: Script,
    held: Arc<AtomicBool>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    unplugged: bool,
}

impl FakeCamera {
    fn with_script(reads: Vec<Result<Frame, CaptureError>>) -> Arc<Self> {
        let camera = Self::default();
        camera.script.lock().unwrap().extend(reads);
        Arc::new(camera)
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl CameraProvider for FakeCamera {
    fn open(&self, device: &CameraDevice) -> Result<Box<dyn FrameSource>, CaptureError> {
        if self.unplugged {
            return Err(CaptureError::DeviceUnavailable {
                device: device.node_path(),
                reason: "no such device".to_string(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSource {
            script: self.script.clone(),
            held: self.held.clone(),
            closes: self.closes.clone(),
        }))
    }
}

struct FileWriter(File);

impl ClipWriter for FileWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), RecordError> {
        std::io::Write::write_all(&mut self.0, &frame.pixels()[..16])?;
        Ok(())
    }
    fn finish(self: Box<Self>) -> Result<(), RecordError> {
        Ok(())
    }
}

struct FileWriterFactory;

impl ClipWriterFactory for FileWriterFactory {
    fn open(
        &self,
        path: &Path,
        _width: u32,
        _height: u32,
        _fps: u32,
    ) -> Result<Box<dyn ClipWriter>, RecordError> {
        Ok(Box::new(FileWriter(File::create(path)?)))
    }
}

/// Copies the raw clip to an `.mp4` sibling.
struct CopyToMp4;

impl Compressor for CopyToMp4 {
    fn compress(&self, raw: &Path) -> PathBuf {
        let out = raw.with_extension("mp4");
        match std::fs::copy(raw, &out) {
            Ok(_) => out,
            Err(_) => raw.to_path_buf(),
        }
    }
}

type Sent = Arc<Mutex<Vec<(AlertKind, String, Option<PathBuf>)>>>;

struct RecordingChannel {
    name: &'static str,
    kinds: Vec<AlertKind>,
    sent: Sent,
}

impl RecordingChannel {
    fn new(name: &'static str, kinds: Vec<AlertKind>) -> (Arc<Self>, Sent) {
        let sent: Sent = Arc::default();
        let channel = Arc::new(Self {
            name,
            kinds,
            sent: sent.clone(),
        });
        (channel, sent)
    }
}

impl AlertChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        self.name
    }
    fn max_attachment_bytes(&self) -> u64 {
        50 * 1024 * 1024
    }
    fn accepts(&self, kind: AlertKind) -> bool {
        self.kinds.contains(&kind)
    }
    fn send(
        &self,
        kind: AlertKind,
        message: &str,
        attachment: Option<&Path>,
    ) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push((
            kind,
            message.to_string(),
            attachment.map(Path::to_path_buf),
        ));
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    camera: Arc<FakeCamera>,
    chat: Sent,
    mail: Sent,
    session: Arc<DetectionSession>,
}

fn quick_timings() -> Timings {
    Timings {
        pair_gap: Duration::from_millis(1),
        read_retry_backoff: Duration::from_millis(5),
        cooldown_tick: Duration::from_millis(20),
        join_timeout: Duration::from_secs(5),
    }
}

fn harness(camera: Arc<FakeCamera>, cooldown_seconds: u32) -> Harness {
    harness_with(camera, cooldown_seconds, quick_timings(), Duration::from_millis(80))
}

fn harness_with(
    camera: Arc<FakeCamera>,
    cooldown_seconds: u32,
    timings: Timings,
    preview_interval: Duration,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let (chat_channel, chat) = RecordingChannel::new(
        "chat",
        vec![AlertKind::Motion, AlertKind::Failure, AlertKind::Summary],
    );
    let (mail_channel, mail) = RecordingChannel::new("mail", vec![AlertKind::Motion]);
    let alerts = AlertDispatcher::new(vec![chat_channel, mail_channel]);

    let deps = SessionDeps {
        provider: camera.clone(),
        device: CameraDevice::Index(0),
        classifier: MotionClassifier::default(),
        recorder: ClipRecorder::new(dir.path().join("clips"), Arc::new(FileWriterFactory))
            .with_preview_interval(preview_interval),
        compressor: Arc::new(CopyToMp4),
        alerts,
        event_log: Some(Arc::new(EventLog::new(dir.path().join("motion_log.txt")))),
    };
    let settings = SessionSettings {
        cooldown_seconds,
        record: RecordSpec {
            duration: Duration::from_millis(100),
            fps: 20,
        },
        timings,
        ..SessionSettings::default()
    };
    Harness {
        _dir: dir,
        camera,
        chat,
        mail,
        session: Arc::new(DetectionSession::new(deps, settings)),
    }
}

/// Collect events until `done` matches one. Previews are skipped.
fn wait_for(
    events: &Receiver<SessionEvent>,
    mut done: impl FnMut(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        let event = events
            .recv_timeout(left)
            .unwrap_or_else(|_| panic!("timed out waiting for event; saw {:?}", seen));
        if matches!(event, SessionEvent::Preview(_)) {
            continue;
        }
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn motion_then_still() -> Arc<FakeCamera> {
    FakeCamera::with_script(vec![Ok(dark()), Ok(bright())])
}

#[test]
fn motion_event_records_alerts_and_returns_to_detecting() {
    let h = harness(motion_then_still(), 3);
    let events = h.session.subscribe();

    h.session.start().unwrap();
    let seen = wait_for(&events, |e| matches!(e, SessionEvent::CooldownFinished));
    wait_for(&events, |e| {
        matches!(e, SessionEvent::StateChanged(SessionState::Detecting))
    });

    let clip = seen
        .iter()
        .find_map(|e| match e {
            SessionEvent::MotionRecorded { clip } => Some(clip.clone()),
            _ => None,
        })
        .expect("motion recorded");
    assert_eq!(clip.extension().and_then(|e| e.to_str()), Some("mp4"));
    assert!(clip.exists());

    let ticks: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            SessionEvent::CooldownTick { remaining } => Some(*remaining),
            _ => None,
        })
        .collect();
    assert_eq!(ticks, vec![3, 2, 1]);

    let states: Vec<SessionState> = seen
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            SessionState::Detecting,
            SessionState::Recording,
            SessionState::Cooldown
        ]
    );

    wait_until(|| h.chat.lock().unwrap().len() == 1 && h.mail.lock().unwrap().len() == 1);
    for sent in [&h.chat, &h.mail] {
        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].0, AlertKind::Motion);
        assert_eq!(sent[0].1, "Motion detected!");
        assert_eq!(sent[0].2.as_deref(), Some(clip.as_path()));
    }

    let status = h.session.status();
    assert_eq!(status.events_today, 1);
    assert!(status.last_motion.is_some());

    let today = chrono::Local::now().date_naive();
    let logged = h.session.event_log().unwrap().entries_for(today).unwrap();
    assert_eq!(logged.len(), 1);
    assert!(logged[0].ends_with(&format!("Motion detected (clip: {})", clip.display())));

    assert_eq!(h.session.stop(), StopOutcome::Stopped);
    assert_eq!(h.camera.closes(), 1);
}

#[test]
fn empty_recording_still_enters_cooldown() {
    let camera = FakeCamera::with_script(vec![
        Ok(dark()),
        Ok(bright()),
        Err(CaptureError::ReadFailure("timeout".into())),
    ]);
    let h = harness(camera, 2);
    let events = h.session.subscribe();

    h.session.start().unwrap();
    let seen = wait_for(&events, |e| matches!(e, SessionEvent::CooldownFinished));

    let empty = seen
        .iter()
        .position(|e| matches!(e, SessionEvent::RecordingEmpty))
        .expect("recording reported empty");
    let cooldown = seen
        .iter()
        .position(|e| matches!(e, SessionEvent::StateChanged(SessionState::Cooldown)))
        .expect("cooldown entered");
    assert!(empty < cooldown);
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SessionEvent::MotionRecorded { .. })));
    assert_eq!(h.session.status().events_today, 0);

    assert_eq!(h.session.stop(), StopOutcome::Stopped);
    assert!(h.chat.lock().unwrap().is_empty());
    assert!(h.mail.lock().unwrap().is_empty());
}

#[test]
fn second_start_is_rejected_without_reopening_camera() {
    let h = harness(Arc::new(FakeCamera::default()), 1);

    h.session.start().unwrap();
    let first = h.session.worker_id();
    assert!(matches!(h.session.start(), Err(SessionError::AlreadyRunning)));
    assert_eq!(h.camera.opens(), 1);
    assert_eq!(h.session.worker_id(), first);

    let surface = CommandSurface::new(h.session.clone(), Arc::new(AlwaysConfirm));
    assert_eq!(surface.start_detection(), StartReply::AlreadyRunning);
    assert_eq!(h.camera.opens(), 1);

    assert_eq!(surface.stop_detection(true), StopReply::Stopped);
    assert_eq!(h.camera.closes(), 1);
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[test]
fn stop_when_idle_is_a_no_op() {
    let h = harness(Arc::new(FakeCamera::default()), 1);
    assert_eq!(h.session.stop(), StopOutcome::AlreadyIdle);

    let surface = CommandSurface::new(h.session.clone(), Arc::new(AlwaysConfirm));
    assert_eq!(surface.stop_detection(true), StopReply::AlreadyIdle);
    assert_eq!(h.camera.opens(), 0);
    assert_eq!(h.session.state(), SessionState::Idle);
}

#[test]
fn stop_during_cooldown_releases_camera_once() {
    let h = harness(motion_then_still(), 500);
    let events = h.session.subscribe();

    h.session.start().unwrap();
    wait_for(&events, |e| matches!(e, SessionEvent::CooldownTick { .. }));
    assert_eq!(h.session.state(), SessionState::Cooldown);

    let started = Instant::now();
    assert_eq!(h.session.stop(), StopOutcome::Stopped);
    assert!(started.elapsed() < Duration::from_secs(2));

    let seen = wait_for(&events, |e| {
        matches!(e, SessionEvent::StateChanged(SessionState::Idle))
    });
    assert!(seen.iter().any(|e| matches!(
        e,
        SessionEvent::Terminated {
            unexpected: false,
            ..
        }
    )));
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SessionEvent::CooldownFinished)));

    let status = h.session.status();
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.cooldown_remaining, 0);
    assert!(!h.session.is_worker_alive());
    assert_eq!(h.camera.closes(), 1);

    // A manual stop never raises a failure alert.
    wait_until(|| h.chat.lock().unwrap().len() == 1);
    std::thread::sleep(Duration::from_millis(50));
    assert!(h
        .chat
        .lock()
        .unwrap()
        .iter()
        .all(|(kind, _, _)| *kind == AlertKind::Motion));
}

#[test]
fn unexpected_termination_sends_failure_alert() {
    let camera = FakeCamera::with_script(vec![Err(CaptureError::Disconnected(
        "device unplugged".into(),
    ))]);
    let h = harness(camera, 1);
    let events = h.session.subscribe();

    h.session.start().unwrap();
    let seen = wait_for(&events, |e| {
        matches!(e, SessionEvent::StateChanged(SessionState::Idle))
    });
    let reason = seen
        .iter()
        .find_map(|e| match e {
            SessionEvent::Terminated {
                unexpected: true,
                reason,
            } => reason.clone(),
            _ => None,
        })
        .expect("unexpected termination");
    assert!(reason.contains("device unplugged"));

    wait_until(|| !h.chat.lock().unwrap().is_empty());
    let chat = h.chat.lock().unwrap().clone();
    assert_eq!(chat.len(), 1);
    assert_eq!(chat[0].0, AlertKind::Failure);
    assert!(chat[0].1.starts_with("[ERROR] "));
    assert!(chat[0].1.contains("stopped unexpectedly"));
    assert!(h.mail.lock().unwrap().is_empty());

    let status = h.session.status();
    assert_eq!(status.state, SessionState::Idle);
    assert!(status.last_error.unwrap().contains("device unplugged"));
    assert!(h.session.shared().last_run_unexpected());
    assert_eq!(h.camera.closes(), 1);

    // The dead worker is reaped and detection can be started again.
    wait_until(|| !h.session.is_worker_alive());
    h.session.start().unwrap();
    assert_eq!(h.camera.opens(), 2);
    assert_eq!(h.session.stop(), StopOutcome::Stopped);
}

#[test]
fn unavailable_device_leaves_session_idle() {
    let camera = Arc::new(FakeCamera {
        unplugged: true,
        ..FakeCamera::default()
    });
    let h = harness(camera, 1);

    let err = h.session.start().unwrap_err();
    assert!(matches!(err, SessionError::DeviceUnavailable(_)));
    assert_eq!(h.session.state(), SessionState::Idle);
    assert!(!h.session.is_worker_alive());
    assert!(h.session.status().last_error.is_some());

    let surface = CommandSurface::new(h.session.clone(), Arc::new(AlwaysConfirm));
    assert!(matches!(
        surface.start_detection(),
        StartReply::DeviceUnavailable(_)
    ));
    assert_eq!(h.camera.opens(), 0);
}

#[test]
fn transient_read_failure_is_retried() {
    let camera = FakeCamera::with_script(vec![
        Err(CaptureError::ReadFailure("select timeout".into())),
        Ok(dark()),
        Ok(dark()),
        Ok(dark()),
        Ok(bright()),
    ]);
    let h = harness(camera, 1);
    let events = h.session.subscribe();

    h.session.start().unwrap();
    let seen = wait_for(&events, |e| matches!(e, SessionEvent::MotionRecorded { .. }));

    let states: Vec<SessionState> = seen
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![SessionState::Detecting, SessionState::Recording]);
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SessionEvent::Terminated { .. })));
    assert!(h.session.status().last_error.is_none());
    assert_eq!(h.camera.opens(), 1);

    assert_eq!(h.session.stop(), StopOutcome::Stopped);
}

#[test]
fn wedged_worker_blocks_restart_until_it_exits() {
    let camera = Arc::new(FakeCamera::default());
    camera.held.store(true, Ordering::SeqCst);
    let timings = Timings {
        join_timeout: Duration::from_millis(200),
        ..quick_timings()
    };
    let h = harness_with(camera, 1, timings, Duration::from_millis(80));
    let events = h.session.subscribe();

    h.session.start().unwrap();
    assert_eq!(h.session.stop(), StopOutcome::Incomplete);
    wait_for(&events, |e| matches!(e, SessionEvent::ShutdownIncomplete));

    let status = h.session.status();
    assert_eq!(status.state, SessionState::ShuttingDown);
    assert!(status.shutdown_incomplete);
    assert!(h.session.is_worker_alive());
    assert!(matches!(
        h.session.start(),
        Err(SessionError::PreviousWorkerAlive)
    ));
    assert_eq!(h.camera.opens(), 1);
    assert_eq!(h.camera.closes(), 0);

    h.camera.held.store(false, Ordering::SeqCst);
    wait_until(|| !h.session.is_worker_alive());
    assert_eq!(h.camera.closes(), 1);
    assert_eq!(h.session.state(), SessionState::Idle);

    h.session.start().unwrap();
    assert_eq!(h.camera.opens(), 2);
    assert!(!h.session.status().shutdown_incomplete);
    assert_eq!(h.session.stop(), StopOutcome::Stopped);
    assert_eq!(h.camera.closes(), 2);
}

#[test]
fn detection_previews_follow_recorder_interval() {
    let h = harness_with(
        Arc::new(FakeCamera::default()),
        1,
        quick_timings(),
        Duration::from_secs(60),
    );
    let events = h.session.subscribe();

    h.session.start().unwrap();
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(h.session.stop(), StopOutcome::Stopped);

    let previews = events
        .try_iter()
        .filter(|e| matches!(e, SessionEvent::Preview(_)))
        .count();
    assert_eq!(previews, 1);
}
