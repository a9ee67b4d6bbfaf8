//! Email alerts, handed to the local sendmail binary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::{Message, SendmailTransport, Transport};

use super::{AlertChannel, AlertKind};
use crate::error::DeliveryError;

/// Attachment ceiling for mail relays.
pub const EMAIL_MAX_BYTES: u64 = 20 * 1024 * 1024;

const SUBJECT: &str = "Motion Alert: Activity Detected";
const BODY_WITH_CLIP: &str = "Motion was detected. See attached video clip.";
const BODY_WITHOUT_CLIP: &str = "Motion was detected. The video clip could not be attached.";

#[derive(Clone, Debug)]
pub struct EmailConfig {
    pub from: Option<String>,
    pub recipient: Option<String>,
    pub sendmail: PathBuf,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            from: None,
            recipient: None,
            sendmail: PathBuf::from("/usr/sbin/sendmail"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EmailChannel {
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn transport(err: anyhow::Error) -> DeliveryError {
        DeliveryError::Transport {
            channel: "email",
            source: err,
        }
    }
}

impl AlertChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    fn max_attachment_bytes(&self) -> u64 {
        EMAIL_MAX_BYTES
    }

    fn send(
        &self,
        _kind: AlertKind,
        _message: &str,
        attachment: Option<&Path>,
    ) -> Result<(), DeliveryError> {
        let recipient = self
            .config
            .recipient
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .ok_or(DeliveryError::NotConfigured {
                channel: "email",
                what: "recipient",
            })?;
        let from = self
            .config
            .from
            .as_deref()
            .filter(|f| !f.trim().is_empty())
            .ok_or(DeliveryError::NotConfigured {
                channel: "email",
                what: "sender",
            })?;

        let clip = match attachment {
            Some(path) => {
                let bytes = std::fs::read(path).map_err(|_| DeliveryError::MissingAttachment {
                    channel: "email",
                    path: path.to_path_buf(),
                })?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "motion.mp4".to_string());
                Some((name, bytes))
            }
            None => None,
        };

        let email = build_message(from, recipient, clip).map_err(Self::transport)?;
        SendmailTransport::new_with_command(&self.config.sendmail)
            .send(&email)
            .with_context(|| format!("deliver via {}", self.config.sendmail.display()))
            .map_err(Self::transport)
    }
}

fn build_message(from: &str, to: &str, clip: Option<(String, Vec<u8>)>) -> Result<Message> {
    let from: Mailbox = from.parse().with_context(|| format!("sender address {:?}", from))?;
    let to: Mailbox = to.parse().with_context(|| format!("recipient address {:?}", to))?;
    let builder = Message::builder().from(from).to(to).subject(SUBJECT);

    let message = match clip {
        Some((name, bytes)) => {
            let video = Attachment::new(name).body(bytes, ContentType::parse("video/mp4")?);
            builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(BODY_WITH_CLIP.to_string()))
                    .singlepart(video),
            )?
        }
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(BODY_WITHOUT_CLIP.to_string())?,
    };
    Ok(message)
}
