//! Telegram Bot API client and alert channel.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{AlertChannel, AlertKind};
use crate::error::DeliveryError;

/// Bot API upload ceiling for `sendVideo`.
pub const TELEGRAM_MAX_BYTES: u64 = 50 * 1024 * 1024;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const VIDEO_CAPTION: &str = "Motion detected!";

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Chat {
    pub id: i64,
}

/// Thin blocking client over the Bot API.
pub struct TelegramClient {
    http: Client,
    api_base: String,
    token: String,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("api_base", &self.api_base)
            .field("token", &if self.token.is_empty() { "<unset>" } else { "<redacted>" })
            .finish()
    }
}

impl TelegramClient {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    pub fn with_api_base(token: impl Into<String>, api_base: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(90))
            .no_proxy()
            .build()
            .context("build telegram http client")?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub fn has_token(&self) -> bool {
        !self.token.trim().is_empty()
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    pub fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .form(&[("chat_id", chat_id.to_string().as_str()), ("text", text)])
            .send()
            .context("telegram sendMessage")?;
        parse_response::<serde_json::Value>(response).map(|_| ())
    }

    /// Upload a clip as `multipart/form-data`.
    pub fn send_video(&self, chat_id: i64, path: &Path, caption: &str) -> Result<()> {
        let bytes =
            std::fs::read(path).with_context(|| format!("open clip {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "motion.mp4".to_string());
        let video = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(video_mime(path))?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("video", video);
        let response = self
            .http
            .post(self.method_url("sendVideo"))
            .multipart(form)
            .send()
            .context("telegram sendVideo")?;
        parse_response::<serde_json::Value>(response).map(|_| ())
    }

    /// Long-poll for updates after `offset`.
    pub fn get_updates(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<Update>> {
        let mut query = vec![("timeout", timeout_secs.to_string())];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }
        let response = self
            .http
            .get(self.method_url("getUpdates"))
            .query(&query)
            .send()
            .context("telegram getUpdates")?;
        Ok(parse_response::<Vec<Update>>(response)?.unwrap_or_default())
    }
}

/// Error replies carry a JSON body too, so the status is only reported when
/// the body does not decode.
fn parse_response<T: DeserializeOwned>(response: Response) -> Result<Option<T>> {
    let status = response.status();
    let parsed: ApiResponse<T> = response
        .json()
        .with_context(|| format!("decode telegram response (http {})", status))?;
    decode_api(parsed)
}

fn video_mime(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("avi") => "video/x-msvideo",
        _ => "video/mp4",
    }
}

fn decode_api<T>(parsed: ApiResponse<T>) -> Result<Option<T>> {
    if !parsed.ok {
        return Err(anyhow!(
            "telegram api error: {}",
            parsed.description.unwrap_or_else(|| "unknown".to_string())
        ));
    }
    Ok(parsed.result)
}

/// Alert channel that posts to a single chat.
#[derive(Debug)]
pub struct TelegramChannel {
    client: Arc<TelegramClient>,
    chat_id: Option<i64>,
}

impl TelegramChannel {
    pub fn new(client: Arc<TelegramClient>, chat_id: Option<i64>) -> Self {
        Self { client, chat_id }
    }

    fn transport(err: anyhow::Error) -> DeliveryError {
        DeliveryError::Transport {
            channel: "telegram",
            source: err,
        }
    }
}

impl AlertChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn max_attachment_bytes(&self) -> u64 {
        TELEGRAM_MAX_BYTES
    }

    fn accepts(&self, _kind: AlertKind) -> bool {
        true
    }

    fn send(
        &self,
        _kind: AlertKind,
        message: &str,
        attachment: Option<&Path>,
    ) -> Result<(), DeliveryError> {
        if !self.client.has_token() {
            return Err(DeliveryError::NotConfigured {
                channel: "telegram",
                what: "bot token",
            });
        }
        let chat_id = self.chat_id.ok_or(DeliveryError::NotConfigured {
            channel: "telegram",
            what: "chat id",
        })?;

        self.client
            .send_message(chat_id, message)
            .map_err(Self::transport)?;
        if let Some(path) = attachment {
            if !path.exists() {
                return Err(DeliveryError::MissingAttachment {
                    channel: "telegram",
                    path: path.to_path_buf(),
                });
            }
            self.client
                .send_video(chat_id, path, VIDEO_CAPTION)
                .map_err(Self::transport)?;
        }
        Ok(())
    }
}
