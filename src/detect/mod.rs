//! Frame-differencing motion classifier.
//!
//! `detect` is a pure function of two frames: absolute difference, grayscale,
//! fixed 5x5 Gaussian blur, binary threshold at intensity 20, then the sum of
//! the thresholded image compared against the sensitivity threshold. There is
//! no background model.

mod pipeline;

pub use pipeline::{absdiff, blur_5x5, binary_threshold, to_grayscale, GrayImage};

use crate::frame::Frame;

/// Per-pixel intensity cutoff applied after blurring.
pub const PIXEL_CUTOFF: u8 = 20;

/// Value written for pixels above the cutoff.
pub const THRESHOLD_HIGH: u8 = 255;

/// Default sensitivity: sum of thresholded pixels that counts as motion.
pub const DEFAULT_MOTION_THRESHOLD: u64 = 200_000;

/// Sum of thresholded pixel intensities between two frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct MotionScore(pub u64);

impl MotionScore {
    /// Strictly greater than the threshold counts as motion.
    pub fn exceeds(self, threshold: u64) -> bool {
        self.0 > threshold
    }

    /// Number of pixels that survived the binary threshold.
    pub fn changed_pixels(self) -> u64 {
        self.0 / THRESHOLD_HIGH as u64
    }
}

impl std::fmt::Display for MotionScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stateless motion classifier.
#[derive(Clone, Copy, Debug)]
pub struct MotionClassifier {
    threshold: u64,
}

impl Default for MotionClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_MOTION_THRESHOLD)
    }
}

impl MotionClassifier {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Motion score for a frame pair. Frames of different sizes score zero
    /// (the camera changed mode between reads).
    pub fn score(&self, first: &Frame, second: &Frame) -> MotionScore {
        if !first.same_dimensions(second) {
            log::debug!(
                "detect: frame size changed {}x{} -> {}x{}, skipping pair",
                first.width(),
                first.height(),
                second.width(),
                second.height()
            );
            return MotionScore(0);
        }
        let diff = absdiff(first, second);
        let gray = to_grayscale(&diff, first.width(), first.height());
        let blurred = blur_5x5(&gray);
        let mask = binary_threshold(&blurred, PIXEL_CUTOFF);
        MotionScore(mask.sum())
    }

    pub fn detect(&self, first: &Frame, second: &Frame) -> bool {
        self.score(first, second).exceeds(self.threshold)
    }
}
