//! Alert fan-out.
//!
//! `AlertDispatcher::notify` returns as soon as one delivery thread per
//! channel has been spawned. Channels are isolated from each other: a size
//! limit, a network error or missing credentials on one never affects the
//! others, and never reaches the detection loop.

pub mod email;
pub mod telegram;

pub use email::{EmailChannel, EmailConfig, EMAIL_MAX_BYTES};
pub use telegram::{TelegramChannel, TelegramClient, TELEGRAM_MAX_BYTES};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::DeliveryError;

/// What an alert is about. Channels choose which kinds they carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertKind {
    Motion,
    /// Detection stopped without being asked to.
    Failure,
    Summary,
}

/// A delivery channel (chat service, email, ...).
pub trait AlertChannel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attachments above this size are dropped and the alert goes out as text.
    fn max_attachment_bytes(&self) -> u64;

    fn accepts(&self, kind: AlertKind) -> bool {
        kind == AlertKind::Motion
    }

    fn send(
        &self,
        kind: AlertKind,
        message: &str,
        attachment: Option<&Path>,
    ) -> Result<(), DeliveryError>;
}

/// Outcome of one channel's delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryReport {
    pub channel: &'static str,
    pub attached: bool,
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Handles to in-flight deliveries. Dropping it detaches them.
#[derive(Debug, Default)]
pub struct DispatchTicket {
    handles: Vec<JoinHandle<DeliveryReport>>,
}

impl DispatchTicket {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Block until every channel has finished.
    pub fn wait(self) -> Vec<DeliveryReport> {
        self.handles
            .into_iter()
            .filter_map(|handle| match handle.join() {
                Ok(report) => Some(report),
                Err(_) => {
                    log::error!("alert: delivery thread panicked");
                    None
                }
            })
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct AlertDispatcher {
    channels: Vec<Arc<dyn AlertChannel>>,
}

impl AlertDispatcher {
    pub fn new(channels: Vec<Arc<dyn AlertChannel>>) -> Self {
        Self { channels }
    }

    pub fn with_channel(mut self, channel: Arc<dyn AlertChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    /// Motion alert with an optional clip.
    pub fn notify(&self, clip: Option<&Path>, message: &str) -> DispatchTicket {
        self.dispatch(AlertKind::Motion, message, clip)
    }

    /// Detection died unexpectedly.
    pub fn notify_failure(&self, message: &str) -> DispatchTicket {
        self.dispatch(AlertKind::Failure, &format!("[ERROR] {}", message), None)
    }

    pub fn notify_summary(&self, message: &str) -> DispatchTicket {
        self.dispatch(AlertKind::Summary, message, None)
    }

    fn dispatch(&self, kind: AlertKind, message: &str, clip: Option<&Path>) -> DispatchTicket {
        let mut ticket = DispatchTicket::default();
        for channel in self.channels.iter().filter(|c| c.accepts(kind)) {
            let channel = channel.clone();
            let message = message.to_string();
            let clip = clip.map(Path::to_path_buf);
            let spawned = std::thread::Builder::new()
                .name(format!("alert-{}", channel.name()))
                .spawn(move || deliver(channel.as_ref(), kind, &message, clip));
            match spawned {
                Ok(handle) => ticket.handles.push(handle),
                Err(err) => log::error!("alert: failed to spawn delivery thread: {}", err),
            }
        }
        ticket
    }
}

fn deliver(
    channel: &dyn AlertChannel,
    kind: AlertKind,
    message: &str,
    clip: Option<PathBuf>,
) -> DeliveryReport {
    let attachment = clip.and_then(|path| check_attachment(channel, path));
    let result = channel.send(kind, message, attachment.as_deref());
    match result {
        Ok(()) => {
            log::info!(
                "alert: {} delivered ({})",
                channel.name(),
                if attachment.is_some() { "with clip" } else { "text only" }
            );
            DeliveryReport {
                channel: channel.name(),
                attached: attachment.is_some(),
                error: None,
            }
        }
        Err(err) => {
            log::error!("alert: {}", err);
            DeliveryReport {
                channel: channel.name(),
                attached: false,
                error: Some(err.to_string()),
            }
        }
    }
}

/// Keep the attachment only if it exists and fits the channel's ceiling.
fn check_attachment(channel: &dyn AlertChannel, path: PathBuf) -> Option<PathBuf> {
    let size = match std::fs::metadata(&path) {
        Ok(meta) => meta.len(),
        Err(err) => {
            log::warn!(
                "alert: {}: clip {} unreadable ({}), sending text only",
                channel.name(),
                path.display(),
                err
            );
            return None;
        }
    };
    if size > channel.max_attachment_bytes() {
        log::warn!(
            "alert: {}: clip {} is {:.2} MB, exceeds limit; sending text only",
            channel.name(),
            path.display(),
            size as f64 / 1024.0 / 1024.0
        );
        return None;
    }
    Some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Sent = Arc<Mutex<Vec<(AlertKind, String, Option<PathBuf>)>>>;

    struct FakeChannel {
        name: &'static str,
        limit: u64,
        fail: bool,
        kinds: Vec<AlertKind>,
        sent: Sent,
    }

    impl FakeChannel {
        fn new(name: &'static str, limit: u64) -> (Arc<Self>, Sent) {
            let sent: Sent = Arc::default();
            let channel = Arc::new(Self {
                name,
                limit,
                fail: false,
                kinds: vec![AlertKind::Motion],
                sent: sent.clone(),
            });
            (channel, sent)
        }
    }

    impl AlertChannel for FakeChannel {
        fn name(&self) -> &'static str {
            self.name
        }
        fn max_attachment_bytes(&self) -> u64 {
            self.limit
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
            if self.fail {
                return Err(DeliveryError::NotConfigured {
                    channel: self.name,
                    what: "credentials",
                });
            }
            self.sent.lock().unwrap().push((
                kind,
                message.to_string(),
                attachment.map(Path::to_path_buf),
            ));
            Ok(())
        }
    }

    fn clip_of(bytes: usize) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("motion.mp4");
        std::fs::write(&path, vec![0u8; bytes]).unwrap();
        (dir, path)
    }

    #[test]
    fn each_channel_gets_one_delivery() {
        let (_dir, clip) = clip_of(10);
        let (chat, chat_sent) = FakeChannel::new("chat", 100);
        let (mail, mail_sent) = FakeChannel::new("mail", 100);
        let dispatcher = AlertDispatcher::new(vec![chat, mail]);

        let reports = dispatcher.notify(Some(&clip), "Motion detected!").wait();

        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.succeeded() && r.attached));
        assert_eq!(chat_sent.lock().unwrap().len(), 1);
        assert_eq!(mail_sent.lock().unwrap()[0].2.as_deref(), Some(clip.as_path()));
    }

    #[test]
    fn oversized_clip_falls_back_to_text_per_channel() {
        let (_dir, clip) = clip_of(50);
        let (big, big_sent) = FakeChannel::new("big", 100);
        let (small, small_sent) = FakeChannel::new("small", 20);
        let dispatcher = AlertDispatcher::new(vec![big, small]);

        dispatcher.notify(Some(&clip), "Motion detected!").wait();

        assert!(big_sent.lock().unwrap()[0].2.is_some());
        assert!(small_sent.lock().unwrap()[0].2.is_none());
        assert_eq!(small_sent.lock().unwrap()[0].1, "Motion detected!");
    }

    #[test]
    fn failing_channel_does_not_block_sibling() {
        let (_dir, clip) = clip_of(10);
        let broken = Arc::new(FakeChannel {
            name: "broken",
            limit: 100,
            fail: true,
            kinds: vec![AlertKind::Motion],
            sent: Arc::default(),
        });
        let (ok, ok_sent) = FakeChannel::new("ok", 100);
        let dispatcher = AlertDispatcher::new(vec![broken, ok]);

        let reports = dispatcher.notify(Some(&clip), "Motion detected!").wait();

        assert_eq!(reports.iter().filter(|r| r.succeeded()).count(), 1);
        assert_eq!(ok_sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn failure_alerts_only_reach_accepting_channels() {
        let (mail, mail_sent) = FakeChannel::new("mail", 100);
        let chat_sent: Sent = Arc::default();
        let chat = Arc::new(FakeChannel {
            name: "chat",
            limit: 100,
            fail: false,
            kinds: vec![AlertKind::Motion, AlertKind::Failure],
            sent: chat_sent.clone(),
        });
        let dispatcher = AlertDispatcher::new(vec![mail, chat]);

        let ticket = dispatcher.notify_failure("detection exited");
        assert_eq!(ticket.len(), 1);
        ticket.wait();

        assert!(mail_sent.lock().unwrap().is_empty());
        let sent = chat_sent.lock().unwrap();
        assert_eq!(sent[0].0, AlertKind::Failure);
        assert_eq!(sent[0].1, "[ERROR] detection exited");
    }

    #[test]
    fn missing_clip_still_sends_text() {
        let (chat, sent) = FakeChannel::new("chat", 100);
        let dispatcher = AlertDispatcher::new(vec![chat]);
        dispatcher
            .notify(Some(Path::new("/nonexistent/motion.mp4")), "Motion detected!")
            .wait();
        assert!(sent.lock().unwrap()[0].2.is_none());
    }
}
