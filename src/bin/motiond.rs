//! motiond - motion detection daemon
//!
//! This daemon:
//! 1. Cleans clips past the retention window
//! 2. Runs the detection session (on demand, or at launch with autostart)
//! 3. Serves console and Telegram commands
//! 4. Supervises detection and sends the daily summary

use anyhow::{anyhow, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use motion_watch::alert::{EmailChannel, TelegramChannel, TelegramClient};
use motion_watch::command::{CommandSurface, StopConfirmation};
use motion_watch::config::MonitorConfig;
use motion_watch::retention::clean_old_clips;
use motion_watch::supervisor::{self, Watchdog, WatchdogConfig};
use motion_watch::telegram::{spawn_listener, ListenerConfig};
use motion_watch::{
    AlertDispatcher, ClipRecorder, DetectionSession, DeviceCameraProvider, EventLog,
    FfmpegClipWriterFactory, FfmpegCompressor, MotionClassifier, SessionDeps, SessionEvent,
    SessionSettings,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the monitor (default).
    Run {
        /// Start detection immediately.
        #[arg(long)]
        autostart: bool,
        /// Do not read commands from stdin.
        #[arg(long)]
        no_console: bool,
    },
    /// Delete clips older than the retention window.
    Clean {
        /// Clip directory (defaults to CLIPS_DIR).
        #[arg(long)]
        dir: Option<PathBuf>,
        /// Retention in days (defaults to CLIP_RETENTION_DAYS).
        #[arg(long)]
        days: Option<u32>,
    },
    /// Print today's motion summary.
    Summary {
        /// Also send it to the chat channel.
        #[arg(long)]
        send: bool,
        /// Clear the motion log afterwards.
        #[arg(long)]
        clear_log: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = MonitorConfig::load()?;
    match args.command.unwrap_or(Command::Run {
        autostart: false,
        no_console: false,
    }) {
        Command::Run {
            autostart,
            no_console,
        } => run(config, autostart, no_console),
        Command::Clean { dir, days } => {
            let dir = dir.unwrap_or_else(|| config.clips.dir.clone());
            let days = days.unwrap_or(config.clips.retention_days);
            if days == 0 {
                return Err(anyhow!("--days must be greater than zero"));
            }
            let report = clean_old_clips(&dir, days)?;
            println!(
                "deleted {} clip(s), kept {}, {} failure(s)",
                report.deleted, report.kept, report.failed
            );
            Ok(())
        }
        Command::Summary { send, clear_log } => {
            let event_log = EventLog::new(&config.clips.motion_log);
            let today = Local::now().date_naive();
            let text = event_log.daily_summary(today)?;
            println!("{}", text);
            if send {
                let (alerts, _) = build_alerts(&config)?;
                for report in alerts.notify_summary(&text).wait() {
                    match report.error {
                        Some(err) => log::error!("summary: {} failed: {}", report.channel, err),
                        None => log::info!("summary: sent via {}", report.channel),
                    }
                }
            }
            if clear_log {
                event_log.clear()?;
                log::info!("summary: cleared {}", event_log.path().display());
            }
            Ok(())
        }
    }
}

fn run(config: MonitorConfig, autostart: bool, no_console: bool) -> Result<()> {
    log::info!(
        "motiond {} starting (camera {}, threshold {}, cooldown {}s)",
        env!("CARGO_PKG_VERSION"),
        config.camera_device(),
        config.motion_threshold,
        config.cooldown_seconds
    );
    if let Err(err) = clean_old_clips(&config.clips.dir, config.clips.retention_days) {
        log::warn!("retention: startup cleanup failed: {:#}", err);
    }

    let (alerts, telegram) = build_alerts(&config)?;
    let session = Arc::new(build_session(&config, alerts));
    let surface = CommandSurface::new(session.clone(), Arc::new(ConsoleConfirmation));
    spawn_event_logger(session.subscribe())?;

    let listener = match (telegram, config.telegram.chat_id) {
        (Some(client), Some(chat_id)) => {
            Some(spawn_listener(client, surface.clone(), ListenerConfig::new(chat_id))?)
        }
        _ => {
            log::info!("telegram: remote commands disabled (token or chat id not set)");
            None
        }
    };

    let watchdog = Watchdog::new(
        session.clone(),
        listener.as_ref().map(|l| l.running_flag()),
        WatchdogConfig {
            auto_restart: config.watchdog_auto_restart,
            ..WatchdogConfig::default()
        },
    )
    .spawn()?;
    let summary = if config.daily_summary {
        Some(supervisor::spawn_daily_summary(
            session.clone(),
            supervisor::default_summary_time(),
        )?)
    } else {
        log::info!("summary: daily summary disabled");
        None
    };

    if autostart || config.autostart {
        log::info!("autostart: {}", surface.start_detection().message());
    }

    let (tx, rx) = mpsc::channel();
    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    if no_console {
        log::info!("motiond waiting for shutdown signal (Ctrl-C)...");
    } else {
        spawn_console(surface.clone(), listener.as_ref().map(|l| l.running_flag()), tx)?;
        log::info!("console ready: start | stop | status | summary | clear-log | quit");
    }
    let _ = rx.recv();

    log::info!("shutdown requested, stopping...");
    if let Some(listener) = listener {
        listener.stop(Duration::from_secs(2))?;
    }
    watchdog.stop()?;
    if let Some(summary) = summary {
        summary.stop()?;
    }
    log::info!("{}", surface.stop_detection(false).message());
    Ok(())
}

fn build_alerts(
    config: &MonitorConfig,
) -> Result<(AlertDispatcher, Option<Arc<TelegramClient>>)> {
    let mut alerts = AlertDispatcher::default();
    let telegram = match &config.telegram.token {
        Some(token) => Some(Arc::new(TelegramClient::new(token.clone())?)),
        None => None,
    };
    match &telegram {
        Some(client) => {
            alerts = alerts.with_channel(Arc::new(TelegramChannel::new(
                client.clone(),
                config.telegram.chat_id,
            )));
        }
        None => log::warn!("alert: telegram disabled (TELEGRAM_TOKEN not set)"),
    }
    if config.email.recipient.is_some() {
        alerts = alerts.with_channel(Arc::new(EmailChannel::new(config.email_config())));
    } else {
        log::info!("alert: email disabled (EMAIL_RECIPIENT not set)");
    }
    Ok((alerts, telegram))
}

fn build_session(config: &MonitorConfig, alerts: AlertDispatcher) -> DetectionSession {
    let recorder = ClipRecorder::new(
        config.clips.dir.clone(),
        Arc::new(FfmpegClipWriterFactory::new(config.compress.ffmpeg.clone())),
    );
    let compressor = FfmpegCompressor {
        ffmpeg: config.compress.ffmpeg.clone(),
        ffprobe: config.compress.ffprobe.clone(),
        target_size_mb: config.compress.target_mb,
    };
    let deps = SessionDeps {
        provider: Arc::new(DeviceCameraProvider::new(config.clips.fps)),
        device: config.camera_device(),
        classifier: MotionClassifier::new(config.motion_threshold),
        recorder,
        compressor: Arc::new(compressor),
        alerts,
        event_log: Some(Arc::new(EventLog::new(config.clips.motion_log.clone()))),
    };
    let settings = SessionSettings {
        cooldown_seconds: config.cooldown_seconds,
        record: config.record_spec(),
        ..SessionSettings::default()
    };
    DetectionSession::new(deps, settings)
}

fn spawn_event_logger(events: Receiver<SessionEvent>) -> Result<()> {
    std::thread::Builder::new()
        .name("session-events".to_string())
        .spawn(move || {
            for event in events {
                match event {
                    SessionEvent::Preview(_) => {}
                    SessionEvent::StateChanged(state) => log::info!("state: {}", state),
                    SessionEvent::CooldownTick { remaining } => {
                        log::debug!("cooldown: {}s", remaining)
                    }
                    SessionEvent::CooldownFinished => log::info!("cooldown: finished"),
                    SessionEvent::MotionRecorded { clip } => {
                        log::info!("motion: clip saved to {}", clip.display())
                    }
                    SessionEvent::RecordingEmpty => {
                        log::warn!("motion: recording produced no clip")
                    }
                    SessionEvent::Terminated { unexpected, reason } => {
                        if unexpected {
                            log::error!(
                                "detection terminated unexpectedly: {}",
                                reason.as_deref().unwrap_or("no reason given")
                            );
                        } else {
                            log::info!("detection terminated");
                        }
                    }
                    SessionEvent::ShutdownIncomplete => {
                        log::warn!("detection shutdown may be incomplete")
                    }
                }
            }
        })?;
    Ok(())
}

fn spawn_console(
    surface: CommandSurface,
    listener: Option<Arc<std::sync::atomic::AtomicBool>>,
    quit: Sender<()>,
) -> Result<()> {
    std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) => {
                        log::info!("console: stdin closed, console disabled");
                        return;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        log::warn!("console: read failed: {}", err);
                        return;
                    }
                }
                let reply = match line.trim() {
                    "" => continue,
                    "start" => surface.start_detection().message(),
                    "stop" => surface.stop_detection(true).message().to_string(),
                    "status" => surface.status_report(
                        Local::now(),
                        listener
                            .as_ref()
                            .map(|l| l.load(std::sync::atomic::Ordering::SeqCst)),
                    ),
                    "summary" => surface.summary_report(Local::now()),
                    "clear-log" => match surface.session().event_log() {
                        Some(event_log) => match event_log.clear() {
                            Ok(()) => "Motion log cleared.".to_string(),
                            Err(err) => format!("Failed to clear motion log: {:#}", err),
                        },
                        None => "No motion log configured.".to_string(),
                    },
                    "quit" | "exit" => {
                        let _ = quit.send(());
                        return;
                    }
                    other => format!(
                        "unknown command {:?} (start | stop | status | summary | clear-log | quit)",
                        other
                    ),
                };
                println!("{}", reply);
            }
        })?;
    Ok(())
}

/// Asks on the terminal before an operator stop.
struct ConsoleConfirmation;

impl StopConfirmation for ConsoleConfirmation {
    fn confirm(&self) -> bool {
        eprint!("Stop motion detection? [y/N] ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        match std::io::stdin().lock().read_line(&mut answer) {
            Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}
