//! Age-based clip cleanup.

use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub failed: usize,
    pub kept: usize,
}

/// Delete regular files in `dir` last modified more than `days` days ago.
///
/// A missing directory is not an error. Per-file failures are logged and
/// counted; they do not stop the sweep.
pub fn clean_old_clips(dir: &Path, days: u32) -> Result<CleanupReport> {
    clean_older_than(dir, SystemTime::now(), Duration::from_secs(u64::from(days) * 86_400))
}

pub(crate) fn clean_older_than(
    dir: &Path,
    now: SystemTime,
    max_age: Duration,
) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();
    if !dir.exists() {
        log::info!("retention: clip folder {} does not exist, skipping", dir.display());
        return Ok(report);
    }
    let cutoff = now.checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);
    log::info!(
        "retention: removing clips older than {} days from {}",
        max_age.as_secs() / 86_400,
        dir.display()
    );

    let entries = std::fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))?;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("retention: unreadable entry in {}: {}", dir.display(), err);
                report.failed += 1;
                continue;
            }
        };
        let path = entry.path();
        let modified = match entry.metadata().and_then(|m| {
            if m.is_file() {
                m.modified().map(Some)
            } else {
                Ok(None)
            }
        }) {
            Ok(Some(modified)) => modified,
            Ok(None) => continue,
            Err(err) => {
                log::warn!("retention: stat {} failed: {}", path.display(), err);
                report.failed += 1;
                continue;
            }
        };
        if modified >= cutoff {
            report.kept += 1;
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                log::info!("retention: deleted old clip {}", path.display());
                report.deleted += 1;
            }
            Err(err) => {
                log::warn!("retention: failed to delete {}: {}", path.display(), err);
                report.failed += 1;
            }
        }
    }
    Ok(report)
}
