use std::time::{Duration, Instant};

use super::FrameSource;
use crate::error::CaptureError;
use crate::frame::Frame;

/// Configuration for a synthetic camera.
#[derive(Clone, Debug)]
pub struct StubCameraConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Frames are paced to this rate. Zero disables pacing.
    pub target_fps: u32,
    /// A moving object crosses the scene once every `motion_period` frames.
    pub motion_period: u64,
    /// How many frames each crossing lasts.
    pub motion_frames: u64,
}

impl Default for StubCameraConfig {
    fn default() -> Self {
        Self {
            name: "stub://camera".to_string(),
            width: 320,
            height: 240,
            target_fps: 20,
            motion_period: 600,
            motion_frames: 40,
        }
    }
}

/// Synthetic camera.
///
/// Produces a static gradient background and, periodically, a bright block
/// sliding across it, so the classifier sees quiet stretches and bursts of
/// motion.
pub struct StubCamera {
    config: StubCameraConfig,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    open: bool,
}

impl StubCamera {
    pub fn new(config: StubCameraConfig) -> Self {
        log::info!("StubCamera: connected to {} (synthetic)", config.name);
        Self {
            config,
            frame_count: 0,
            last_frame_at: None,
            open: true,
        }
    }

    fn pace(&mut self) {
        if self.config.target_fps == 0 {
            return;
        }
        let interval = Duration::from_millis(1000 / self.config.target_fps as u64);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn render(&self) -> Frame {
        let (width, height) = (self.config.width, self.config.height);
        let mut frame = Frame::filled(width, height, [0, 0, 0]);
        let pixels = frame.pixels_mut();
        for y in 0..height as usize {
            for x in 0..width as usize {
                let idx = (y * width as usize + x) * 3;
                let shade = ((x + y) % 64) as u8 + 40;
                pixels[idx] = shade;
                pixels[idx + 1] = shade;
                pixels[idx + 2] = shade;
            }
        }

        let period = self.config.motion_period.max(1);
        let phase = self.frame_count % period;
        if phase < self.config.motion_frames {
            let block = (width.min(height) / 4).max(1) as usize;
            let travel = (width as usize).saturating_sub(block).max(1);
            let offset = (phase as usize * 8) % travel;
            let top = (height as usize).saturating_sub(block) / 2;
            for y in top..(top + block).min(height as usize) {
                for x in offset..(offset + block).min(width as usize) {
                    let idx = (y * width as usize + x) * 3;
                    pixels[idx] = 250;
                    pixels[idx + 1] = 240;
                    pixels[idx + 2] = 220;
                }
            }
        }
        frame
    }
}

impl FrameSource for StubCamera {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        if !self.open {
            return Err(CaptureError::Disconnected(format!(
                "{} closed",
                self.config.name
            )));
        }
        self.pace();
        self.frame_count += 1;
        Ok(self.render())
    }

    fn is_opened(&self) -> bool {
        self.open
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn close(&mut self) {
        self.open = false;
    }
}
