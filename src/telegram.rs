//! Remote command listener over the Telegram Bot API.
//!
//! Long-polls `getUpdates` on its own thread and maps chat commands onto the
//! command surface. Only the configured chat id may issue commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::Local;

use crate::alert::telegram::{TelegramClient, Update};
use crate::command::CommandSurface;

/// Minimal bot API surface the listener needs.
pub trait BotApi: Send + Sync {
    fn poll(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<Update>>;
    fn reply(&self, chat_id: i64, text: &str) -> Result<()>;
}

impl BotApi for TelegramClient {
    fn poll(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<Update>> {
        self.get_updates(offset, timeout.as_secs())
    }

    fn reply(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send_message(chat_id, text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteCommand {
    StartDetector,
    StopDetector,
    Status,
    Summary,
}

impl RemoteCommand {
    /// Parse `/command` or `/command@botname`, ignoring trailing arguments.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let command = word.strip_prefix('/')?;
        let command = command.split('@').next().unwrap_or(command);
        match command {
            "start_detector" => Some(RemoteCommand::StartDetector),
            "stop_detector" => Some(RemoteCommand::StopDetector),
            "status" => Some(RemoteCommand::Status),
            "summary" => Some(RemoteCommand::Summary),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ListenerConfig {
    pub allowed_chat_id: i64,
    pub poll_timeout: Duration,
    pub error_backoff: Duration,
}

impl ListenerConfig {
    pub fn new(allowed_chat_id: i64) -> Self {
        Self {
            allowed_chat_id,
            poll_timeout: Duration::from_secs(30),
            error_backoff: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
pub struct ListenerHandle {
    shutdown: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Liveness flag for the watchdog.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Signal shutdown and wait up to `timeout`. A listener blocked in a long
    /// poll is detached rather than waited for.
    pub fn stop(mut self, timeout: Duration) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        let Some(join) = self.join.take() else {
            return Ok(());
        };
        let deadline = Instant::now() + timeout;
        while !join.is_finished() {
            if Instant::now() >= deadline {
                log::warn!("telegram: listener still polling, detaching");
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        join.join().map_err(|_| anyhow!("telegram listener thread panicked"))
    }
}

pub fn spawn_listener(
    api: Arc<dyn BotApi>,
    surface: CommandSurface,
    config: ListenerConfig,
) -> Result<ListenerHandle> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let running = Arc::new(AtomicBool::new(true));
    let thread_shutdown = shutdown.clone();
    let thread_running = running.clone();
    let join = std::thread::Builder::new()
        .name("telegram-listener".to_string())
        .spawn(move || {
            let listener = Listener {
                api,
                surface,
                config,
            };
            listener.run(&thread_shutdown);
            thread_running.store(false, Ordering::SeqCst);
        })?;
    log::info!("telegram: listener started");
    Ok(ListenerHandle {
        shutdown,
        running,
        join: Some(join),
    })
}

struct Listener {
    api: Arc<dyn BotApi>,
    surface: CommandSurface,
    config: ListenerConfig,
}

impl Listener {
    fn run(&self, shutdown: &AtomicBool) {
        let mut offset = None;
        while !shutdown.load(Ordering::SeqCst) {
            let updates = match self.api.poll(offset, self.config.poll_timeout) {
                Ok(updates) => updates,
                Err(err) => {
                    log::warn!("telegram: poll failed: {:#}", err);
                    sleep_unless(shutdown, self.config.error_backoff);
                    continue;
                }
            };
            for update in updates {
                let next = update.update_id + 1;
                offset = Some(offset.map_or(next, |o: i64| o.max(next)));
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                self.handle(&update);
            }
        }
        log::info!("telegram: listener stopped");
    }

    fn handle(&self, update: &Update) {
        let Some(message) = &update.message else {
            return;
        };
        let Some(command) = message.text.as_deref().and_then(RemoteCommand::parse) else {
            return;
        };
        let chat_id = message.chat.id;
        let reply = if chat_id != self.config.allowed_chat_id {
            log::warn!("telegram: unauthorized {:?} from chat id {}", command, chat_id);
            format!("Unauthorized access. Your chat ID ({}) is being logged.", chat_id)
        } else {
            log::info!("telegram: {:?} from chat id {}", command, chat_id);
            self.execute(command)
        };
        if let Err(err) = self.api.reply(chat_id, &reply) {
            log::warn!("telegram: reply failed: {:#}", err);
        }
    }

    fn execute(&self, command: RemoteCommand) -> String {
        match command {
            RemoteCommand::StartDetector => self.surface.start_detection().message(),
            RemoteCommand::StopDetector => self.surface.stop_detection(false).message().to_string(),
            RemoteCommand::Status => self.surface.status_report(Local::now(), Some(true)),
            RemoteCommand::Summary => self.surface.summary_report(Local::now()),
        }
    }
}

fn sleep_unless(flag: &AtomicBool, total: Duration) {
    let step = Duration::from_millis(100);
    let deadline = Instant::now() + total;
    while !flag.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(step.min(deadline.saturating_duration_since(Instant::now())));
    }
}
