//! Motion clip recording.
//!
//! The recorder borrows the session's camera for the length of one clip. The
//! writer is a scoped resource: it is finalized on every exit path, including
//! an early stop. A clip with zero frames is deleted and reported as `None`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;

use crate::capture::CameraHandle;
use crate::error::RecordError;
use crate::frame::Frame;
use crate::session::ActiveFlag;

/// Minimum gap between two preview frames.
pub const DEFAULT_PREVIEW_INTERVAL: Duration = Duration::from_millis(80);

/// An open video container.
pub trait ClipWriter: Send {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), RecordError>;

    /// Flush and close the container.
    fn finish(self: Box<Self>) -> Result<(), RecordError>;
}

/// Creates clip writers. The file must exist (empty) once `open` returns.
pub trait ClipWriterFactory: Send + Sync {
    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn ClipWriter>, RecordError>;

    /// Container extension for raw clips.
    fn extension(&self) -> &'static str {
        "avi"
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordSpec {
    pub duration: Duration,
    pub fps: u32,
}

impl Default for RecordSpec {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(5),
            fps: 20,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedClip {
    pub path: PathBuf,
    pub frames: u64,
}

/// Rate limiter for preview frames.
#[derive(Debug)]
pub struct PreviewThrottle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl PreviewThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    pub fn should_emit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

pub struct ClipRecorder {
    clips_dir: PathBuf,
    factory: Arc<dyn ClipWriterFactory>,
    preview_interval: Duration,
}

impl ClipRecorder {
    pub fn new(clips_dir: impl Into<PathBuf>, factory: Arc<dyn ClipWriterFactory>) -> Self {
        Self {
            clips_dir: clips_dir.into(),
            factory,
            preview_interval: DEFAULT_PREVIEW_INTERVAL,
        }
    }

    pub fn with_preview_interval(mut self, interval: Duration) -> Self {
        self.preview_interval = interval;
        self
    }

    pub fn clips_dir(&self) -> &Path {
        &self.clips_dir
    }

    /// Gap between previews, shared by detection and recording.
    pub fn preview_interval(&self) -> Duration {
        self.preview_interval
    }

    /// Record up to `spec.duration` from `camera`, stopping early when `active`
    /// clears or a read fails. Each captured frame is offered to `preview`,
    /// rate limited.
    pub fn record(
        &self,
        camera: &mut CameraHandle,
        spec: RecordSpec,
        active: &ActiveFlag,
        preview: &mut dyn FnMut(&Frame),
    ) -> Result<Option<RecordedClip>, RecordError> {
        let (width, height) = camera.frame_size().ok_or_else(|| RecordError::WriterOpen {
            path: self.clips_dir.clone(),
            reason: "camera is not open".to_string(),
        })?;
        std::fs::create_dir_all(&self.clips_dir)?;
        let path = self.next_clip_path();
        let fps = spec.fps.max(1);

        let mut writer = ScopedWriter::new(self.factory.open(&path, width, height, fps)?);
        let mut throttle = PreviewThrottle::new(self.preview_interval);
        let interval = Duration::from_secs(1) / fps;
        let start = Instant::now();
        let mut frames = 0u64;

        while start.elapsed() < spec.duration {
            if !active.is_set() {
                log::info!("recorder: stop requested, closing {}", path.display());
                break;
            }
            let frame = match camera.read_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    log::warn!("recorder: read failed after {} frames: {}", frames, err);
                    break;
                }
            };
            if frame.width() != width || frame.height() != height {
                log::warn!(
                    "recorder: dropping {}x{} frame in {}x{} clip",
                    frame.width(),
                    frame.height(),
                    width,
                    height
                );
                continue;
            }
            if let Err(err) = writer.write_frame(&frame) {
                log::warn!("recorder: {}", err);
                break;
            }
            frames += 1;

            if throttle.should_emit(Instant::now()) {
                preview(&frame);
            }

            let due = interval * frames as u32;
            let elapsed = start.elapsed();
            if elapsed < due && due < spec.duration {
                std::thread::sleep(due - elapsed);
            }
        }

        let finished = writer.finish();
        if frames == 0 {
            if let Err(err) = finished {
                log::debug!("recorder: writer close after empty clip: {}", err);
            }
            remove_if_exists(&path);
            log::error!("recorder: clip save failed (0 frames recorded)");
            return Ok(None);
        }
        finished?;

        log::info!(
            "recorder: saved motion clip with {} frames to {}",
            frames,
            path.display()
        );
        Ok(Some(RecordedClip { path, frames }))
    }

    fn next_clip_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let ext = self.factory.extension();
        let mut path = self.clips_dir.join(format!("motion_{}.{}", stamp, ext));
        let mut n = 1;
        while path.exists() {
            path = self.clips_dir.join(format!("motion_{}_{}.{}", stamp, n, ext));
            n += 1;
        }
        path
    }
}

/// Finalizes the wrapped writer exactly once, on `finish` or on drop.
struct ScopedWriter {
    inner: Option<Box<dyn ClipWriter>>,
}

impl ScopedWriter {
    fn new(inner: Box<dyn ClipWriter>) -> Self {
        Self { inner: Some(inner) }
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), RecordError> {
        match self.inner.as_mut() {
            Some(writer) => writer.write_frame(frame),
            None => Ok(()),
        }
    }

    fn finish(mut self) -> Result<(), RecordError> {
        match self.inner.take() {
            Some(writer) => writer.finish(),
            None => Ok(()),
        }
    }
}

impl Drop for ScopedWriter {
    fn drop(&mut self) {
        if let Some(writer) = self.inner.take() {
            if let Err(err) = writer.finish() {
                log::warn!("recorder: writer close failed: {}", err);
            }
        }
    }
}

fn remove_if_exists(path: &Path) {
    if path.exists() {
        if let Err(err) = std::fs::remove_file(path) {
            log::warn!("recorder: failed to remove {}: {}", path.display(), err);
        }
    }
}

// ----------------------------------------------------------------------------
// ffmpeg-backed writer
// ----------------------------------------------------------------------------

/// Pipes raw RGB24 frames into an `ffmpeg` child producing an MPEG-4 AVI.
#[derive(Clone, Debug)]
pub struct FfmpegClipWriterFactory {
    ffmpeg: PathBuf,
}

impl FfmpegClipWriterFactory {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }
}

impl ClipWriterFactory for FfmpegClipWriterFactory {
    fn open(
        &self,
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn ClipWriter>, RecordError> {
        let open_err = |reason: String| RecordError::WriterOpen {
            path: path.to_path_buf(),
            reason,
        };
        std::fs::File::create(path).map_err(|e| open_err(e.to_string()))?;

        let mut child = Command::new(&self.ffmpeg)
            .args(["-y", "-loglevel", "error", "-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", width, height)])
            .args(["-r", &fps.to_string()])
            .args(["-i", "-", "-c:v", "mpeg4", "-vtag", "DIVX", "-q:v", "5"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| open_err(format!("spawn {}: {}", self.ffmpeg.display(), e)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| open_err("ffmpeg stdin unavailable".to_string()))?;

        Ok(Box::new(FfmpegClipWriter {
            path: path.to_path_buf(),
            child: Some(child),
            stdin: Some(stdin),
        }))
    }
}

struct FfmpegClipWriter {
    path: PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl ClipWriter for FfmpegClipWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), RecordError> {
        let stdin = self.stdin.as_mut().ok_or_else(|| RecordError::Write {
            path: self.path.clone(),
            reason: "writer already closed".to_string(),
        })?;
        stdin
            .write_all(frame.pixels())
            .map_err(|e| RecordError::Write {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    fn finish(mut self: Box<Self>) -> Result<(), RecordError> {
        drop(self.stdin.take());
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait()?;
        if !status.success() {
            return Err(RecordError::Write {
                path: self.path.clone(),
                reason: format!("ffmpeg exited with {}", status),
            });
        }
        Ok(())
    }
}

impl Drop for FfmpegClipWriter {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
