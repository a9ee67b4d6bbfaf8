use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::alert::EmailConfig;
use crate::capture::CameraDevice;
use crate::detect::DEFAULT_MOTION_THRESHOLD;
use crate::error::ConfigError;
use crate::recorder::RecordSpec;

const DEFAULT_COOLDOWN_SECS: u32 = 30;
const DEFAULT_CAMERA_INDEX: u32 = 0;
const DEFAULT_RETENTION_DAYS: u32 = 7;
const DEFAULT_CLIPS_DIR: &str = "clips";
const DEFAULT_MOTION_LOG: &str = "motion_log.txt";
const DEFAULT_CLIP_SECONDS: u32 = 5;
const DEFAULT_CLIP_FPS: u32 = 20;
const DEFAULT_SENDMAIL: &str = "/usr/sbin/sendmail";
const DEFAULT_FFMPEG: &str = "ffmpeg";
const DEFAULT_FFPROBE: &str = "ffprobe";
const DEFAULT_COMPRESS_TARGET_MB: u32 = 10;

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    detection: Option<DetectionConfigFile>,
    camera: Option<CameraConfigFile>,
    clips: Option<ClipsConfigFile>,
    compress: Option<CompressConfigFile>,
    telegram: Option<TelegramConfigFile>,
    email: Option<EmailConfigFile>,
    features: Option<FeaturesConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    motion_score: Option<u64>,
    cooldown_seconds: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<u32>,
    url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ClipsConfigFile {
    dir: Option<PathBuf>,
    seconds: Option<u32>,
    fps: Option<u32>,
    retention_days: Option<u32>,
    motion_log: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct CompressConfigFile {
    ffmpeg: Option<PathBuf>,
    ffprobe: Option<PathBuf>,
    target_mb: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TelegramConfigFile {
    token: Option<String>,
    chat_id: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct EmailConfigFile {
    from: Option<String>,
    recipient: Option<String>,
    sendmail: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct FeaturesConfigFile {
    autostart: Option<bool>,
    daily_summary: Option<bool>,
    watchdog_auto_restart: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub motion_threshold: u64,
    pub cooldown_seconds: u32,
    pub camera: CameraSettings,
    pub clips: ClipSettings,
    pub compress: CompressSettings,
    pub telegram: TelegramSettings,
    pub email: EmailSettings,
    pub autostart: bool,
    pub daily_summary: bool,
    pub watchdog_auto_restart: bool,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device_index: u32,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClipSettings {
    pub dir: PathBuf,
    pub seconds: u32,
    pub fps: u32,
    pub retention_days: u32,
    pub motion_log: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CompressSettings {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub target_mb: u32,
}

#[derive(Clone, Default)]
pub struct TelegramSettings {
    pub token: Option<String>,
    pub chat_id: Option<i64>,
}

impl std::fmt::Debug for TelegramSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramSettings")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub from: Option<String>,
    pub recipient: Option<String>,
    pub sendmail: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_file(MonitorConfigFile::default())
    }
}

impl MonitorConfig {
    /// Defaults, then the file named by `MOTION_CONFIG`, then environment
    /// overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MOTION_CONFIG").ok();
        let file_cfg = match config_path.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let detection = file.detection.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let clips = file.clips.unwrap_or_default();
        let compress = file.compress.unwrap_or_default();
        let telegram = file.telegram.unwrap_or_default();
        let email = file.email.unwrap_or_default();
        let features = file.features.unwrap_or_default();
        Self {
            motion_threshold: detection.motion_score.unwrap_or(DEFAULT_MOTION_THRESHOLD),
            cooldown_seconds: detection.cooldown_seconds.unwrap_or(DEFAULT_COOLDOWN_SECS),
            camera: CameraSettings {
                device_index: camera.device.unwrap_or(DEFAULT_CAMERA_INDEX),
                url: non_empty(camera.url),
            },
            clips: ClipSettings {
                dir: clips.dir.unwrap_or_else(|| PathBuf::from(DEFAULT_CLIPS_DIR)),
                seconds: clips.seconds.unwrap_or(DEFAULT_CLIP_SECONDS),
                fps: clips.fps.unwrap_or(DEFAULT_CLIP_FPS),
                retention_days: clips.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS),
                motion_log: clips
                    .motion_log
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MOTION_LOG)),
            },
            compress: CompressSettings {
                ffmpeg: compress.ffmpeg.unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG)),
                ffprobe: compress.ffprobe.unwrap_or_else(|| PathBuf::from(DEFAULT_FFPROBE)),
                target_mb: compress.target_mb.unwrap_or(DEFAULT_COMPRESS_TARGET_MB),
            },
            telegram: TelegramSettings {
                token: non_empty(telegram.token),
                chat_id: telegram.chat_id,
            },
            email: EmailSettings {
                from: non_empty(email.from),
                recipient: non_empty(email.recipient),
                sendmail: email
                    .sendmail
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_SENDMAIL)),
            },
            autostart: features.autostart.unwrap_or(false),
            daily_summary: features.daily_summary.unwrap_or(true),
            watchdog_auto_restart: features.watchdog_auto_restart.unwrap_or(false),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(score) = env_parse("MOTION_SCORE", "a positive integer")? {
            self.motion_threshold = score;
        }
        if let Some(seconds) = env_parse("COOLDOWN_SECONDS", "an integer number of seconds")? {
            self.cooldown_seconds = seconds;
        }
        if let Some(index) = env_parse("CAMERA_DEVICE", "a device index")? {
            self.camera.device_index = index;
        }
        if let Some(url) = env_string("CAMERA_URL") {
            self.camera.url = Some(url);
        }
        if let Some(days) = env_parse("CLIP_RETENTION_DAYS", "an integer number of days")? {
            self.clips.retention_days = days;
        }
        if let Some(dir) = env_string("CLIPS_DIR") {
            self.clips.dir = PathBuf::from(dir);
        }
        if let Some(path) = env_string("MOTION_LOG") {
            self.clips.motion_log = PathBuf::from(path);
        }
        if let Some(seconds) = env_parse("CLIP_SECONDS", "an integer number of seconds")? {
            self.clips.seconds = seconds;
        }
        if let Some(fps) = env_parse("CLIP_FPS", "an integer frame rate")? {
            self.clips.fps = fps;
        }
        if let Some(token) = env_string("TELEGRAM_TOKEN") {
            self.telegram.token = Some(token);
        }
        if let Some(chat_id) = env_parse("TELEGRAM_CHAT_ID", "an integer chat id")? {
            self.telegram.chat_id = Some(chat_id);
        }
        if let Some(from) = env_string("EMAIL_FROM") {
            self.email.from = Some(from);
        }
        if let Some(recipient) = env_string("EMAIL_RECIPIENT") {
            self.email.recipient = Some(recipient);
        }
        if let Some(path) = env_string("SENDMAIL_PATH") {
            self.email.sendmail = PathBuf::from(path);
        }
        if let Some(enabled) = env_bool("AUTOSTART_ENABLED")? {
            self.autostart = enabled;
        }
        if let Some(enabled) = env_bool("DAILY_SUMMARY_ENABLED")? {
            self.daily_summary = enabled;
        }
        if let Some(enabled) = env_bool("WATCHDOG_AUTO_RESTART")? {
            self.watchdog_auto_restart = enabled;
        }
        if let Some(path) = env_string("FFMPEG_PATH") {
            self.compress.ffmpeg = PathBuf::from(path);
        }
        if let Some(path) = env_string("FFPROBE_PATH") {
            self.compress.ffprobe = PathBuf::from(path);
        }
        if let Some(mb) = env_parse("COMPRESS_TARGET_MB", "an integer size in MB")? {
            self.compress.target_mb = mb;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let checks = [
            (self.motion_threshold == 0, "motion score threshold"),
            (self.clips.fps == 0, "clip fps"),
            (self.clips.seconds == 0, "clip length"),
            (self.clips.retention_days == 0, "retention"),
            (self.compress.target_mb == 0, "compression target"),
        ];
        for (invalid, what) in checks {
            if invalid {
                let reason = format!("{} must be greater than zero", what);
                return Err(ConfigError::Invalid(reason).into());
            }
        }
        Ok(())
    }

    pub fn camera_device(&self) -> CameraDevice {
        CameraDevice::resolve(self.camera.device_index, self.camera.url.as_deref())
    }

    pub fn record_spec(&self) -> RecordSpec {
        RecordSpec {
            duration: Duration::from_secs(u64::from(self.clips.seconds)),
            fps: self.clips.fps,
        }
    }

    pub fn email_config(&self) -> EmailConfig {
        EmailConfig {
            from: self.email.from.clone(),
            recipient: self.email.recipient.clone(),
            sendmail: self.email.sendmail.clone(),
        }
    }

    /// Remote commands need both a token and an allow-listed chat.
    pub fn telegram_enabled(&self) -> bool {
        self.telegram.token.is_some() && self.telegram.chat_id.is_some()
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    non_empty(std::env::var(key).ok())
}

fn env_parse<T: FromStr>(key: &'static str, expected: &'static str) -> Result<Option<T>> {
    let Some(value) = env_string(key) else {
        return Ok(None);
    };
    let parsed = value.trim().parse::<T>();
    match parsed {
        Ok(parsed) => Ok(Some(parsed)),
        Err(_) => Err(ConfigError::InvalidValue {
            key,
            expected,
            value,
        }
        .into()),
    }
}

fn env_bool(key: &'static str) -> Result<Option<bool>> {
    let Some(value) = env_string(key) else {
        return Ok(None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            key,
            expected: "a boolean",
            value,
        }
        .into()),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
