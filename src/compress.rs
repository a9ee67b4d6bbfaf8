//! Clip compression.
//!
//! Compression never fails the event: on any error the raw clip is kept and
//! returned so it can still be delivered.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};

pub trait Compressor: Send + Sync {
    /// Returns the compressed clip, or `raw` when compression was skipped or failed.
    fn compress(&self, raw: &Path) -> PathBuf;
}

/// Keeps clips as recorded.
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

impl Compressor for Passthrough {
    fn compress(&self, raw: &Path) -> PathBuf {
        raw.to_path_buf()
    }
}

/// Re-encodes clips to H.265 MP4 sized for a target file size.
#[derive(Clone, Debug)]
pub struct FfmpegCompressor {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub target_size_mb: u32,
}

impl Default for FfmpegCompressor {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            target_size_mb: 10,
        }
    }
}

impl FfmpegCompressor {
    fn media_duration(&self, input: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error", "-select_streams", "v:0"])
            .args(["-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(input)
            .stderr(Stdio::null())
            .output()
            .with_context(|| format!("run {}", self.ffprobe.display()))?;
        if !output.status.success() {
            return Err(anyhow!("ffprobe exited with {}", output.status));
        }
        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }

    fn encode(&self, input: &Path, output: &Path, bitrate_kbps: u64) -> Result<()> {
        let status = Command::new(&self.ffmpeg)
            .args(["-y", "-i"])
            .arg(input)
            .args(["-c:v", "libx265", "-tag:v", "hvc1"])
            .args(["-b:v", &format!("{}k", bitrate_kbps)])
            .args(["-c:a", "aac", "-preset", "medium"])
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("run {}", self.ffmpeg.display()))?;
        if !status.success() {
            return Err(anyhow!("ffmpeg exited with {}", status));
        }
        Ok(())
    }

    /// Ok(false) when the clip has no duration to compress.
    fn try_compress(&self, raw: &Path, output: &Path) -> Result<bool> {
        let duration = self.media_duration(raw)?;
        if duration <= 0.0 {
            return Ok(false);
        }
        self.encode(raw, output, target_bitrate_kbps(self.target_size_mb, duration))?;
        if !output.exists() {
            return Err(anyhow!("ffmpeg produced no output"));
        }
        Ok(true)
    }
}

impl Compressor for FfmpegCompressor {
    fn compress(&self, raw: &Path) -> PathBuf {
        if !raw.exists() {
            log::warn!("compress: input {} is missing", raw.display());
            return raw.to_path_buf();
        }
        let output = raw.with_extension("mp4");
        if output == raw {
            return raw.to_path_buf();
        }

        match self.try_compress(raw, &output) {
            Ok(true) => {
                if let Err(err) = std::fs::remove_file(raw) {
                    log::warn!("compress: failed to remove raw clip {}: {}", raw.display(), err);
                }
                log::info!("compress: converted to mp4 (h265): {}", output.display());
                output
            }
            Ok(false) => {
                log::warn!("compress: video duration is zero, keeping {}", raw.display());
                raw.to_path_buf()
            }
            Err(err) => {
                log::error!("compress: failed: {:#}. retaining original video", err);
                if output.exists() {
                    let _ = std::fs::remove_file(&output);
                }
                raw.to_path_buf()
            }
        }
    }
}

fn parse_duration(text: &str) -> Result<f64> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| anyhow!("unparseable duration {:?}", text.trim()))
}

/// Bitrate that lands a clip of `duration_s` near `target_mb`.
fn target_bitrate_kbps(target_mb: u32, duration_s: f64) -> u64 {
    ((target_mb as f64 * 8.0 * 1024.0) / duration_s).max(1.0) as u64
}
