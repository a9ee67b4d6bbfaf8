//! Append-only motion event log.
//!
//! One line per recorded event:
//! `YYYY-MM-DD HH:MM:SS - Motion detected (clip: <path>)`.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate};

const MARKER: &str = "Motion detected";
/// Events listed in the end-of-day summary.
pub const SUMMARY_EVENTS: usize = 10;

#[derive(Debug)]
pub struct EventLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, at: DateTime<Local>, clip: &Path) -> Result<()> {
        let _guard = self.write_lock.lock().ok();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        writeln!(file, "{}", format_entry(at, clip))
            .with_context(|| format!("append to {}", self.path.display()))?;
        Ok(())
    }

    /// Motion lines logged on `date`, oldest first. A missing log is empty.
    pub fn entries_for(&self, date: NaiveDate) -> Result<Vec<String>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("open {}", self.path.display()))
            }
        };
        let prefix = date.format("%Y-%m-%d").to_string();
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| format!("read {}", self.path.display()))?;
            if line.starts_with(&prefix) && line.contains(MARKER) {
                entries.push(line);
            }
        }
        Ok(entries)
    }

    /// Truncate the log.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().ok();
        if !self.path.exists() {
            return Ok(());
        }
        File::create(&self.path)
            .map(|_| ())
            .with_context(|| format!("clear {}", self.path.display()))
    }

    /// End-of-day text: the last few events, or a "no motion" line.
    pub fn daily_summary(&self, date: NaiveDate) -> Result<String> {
        let entries = self.entries_for(date)?;
        Ok(summary_text(date, &entries))
    }
}

pub fn format_entry(at: DateTime<Local>, clip: &Path) -> String {
    format!(
        "{} - {} (clip: {})",
        at.format("%Y-%m-%d %H:%M:%S"),
        MARKER,
        clip.display()
    )
}

pub fn summary_text(date: NaiveDate, entries: &[String]) -> String {
    let day = date.format("%Y-%m-%d");
    if entries.is_empty() {
        return format!("No motion detected on {}.", day);
    }
    let start = entries.len().saturating_sub(SUMMARY_EVENTS);
    let mut text = format!("Motion Summary for {} (Last {} Events):", day, SUMMARY_EVENTS);
    for entry in &entries[start..] {
        text.push('\n');
        text.push_str(entry);
    }
    text
}
