// src/retriever/sweep.rs

//! Pruning of stale cache files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use anyhow::anyhow;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::errors::{Result, TaskfeedError};

/// Grace period applied when none is configured.
pub const DEFAULT_GRACE_PERIOD_DAYS: i64 = 60;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// What a sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub files_removed: usize,
    pub dirs_removed: usize,
    /// Entries that could not be inspected or removed.
    pub errors: usize,
    /// The sweep was stopped before visiting every target.
    pub interrupted: bool,
}

/// Delete files under `targets` not modified for more than
/// `grace_period_days` days, then remove directories left empty.
///
/// Each target is walked bottom-up. Problems with individual entries are
/// logged and skipped; only an invalid grace period fails the call. The
/// targets themselves are never removed. Setting `stop` ends the walk early.
pub fn remove_old_cached_data(
    grace_period_days: i64,
    targets: &[PathBuf],
    stop: &AtomicBool,
) -> Result<SweepReport> {
    let max_age = grace_period(grace_period_days)?;
    let now = SystemTime::now();
    let mut report = SweepReport::default();

    info!(grace_period_days, targets = targets.len(), "sweeping cached data");

    for target in targets {
        if !target.is_dir() {
            debug!(target = ?target, "cache folder does not exist; skipping");
            continue;
        }

        for entry in WalkDir::new(target).min_depth(1).contents_first(true) {
            if stop.load(Ordering::Relaxed) {
                info!("cache sweep interrupted");
                report.interrupted = true;
                return Ok(report);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable cache entry");
                    report.errors += 1;
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                remove_if_empty(entry.path(), &mut report);
            } else {
                remove_if_expired(&entry, now, max_age, &mut report);
            }
        }
    }

    info!(
        files = report.files_removed,
        dirs = report.dirs_removed,
        errors = report.errors,
        "cache sweep finished"
    );
    Ok(report)
}

fn grace_period(days: i64) -> Result<Duration> {
    if days < 1 {
        return Err(TaskfeedError::InvalidGracePeriod(days));
    }
    Ok(Duration::from_secs((days as u64).saturating_mul(SECONDS_PER_DAY)))
}

fn remove_if_expired(entry: &DirEntry, now: SystemTime, max_age: Duration, report: &mut SweepReport) {
    let modified = entry
        .metadata()
        .map_err(std::io::Error::from)
        .and_then(|meta| meta.modified());
    let modified = match modified {
        Ok(modified) => modified,
        Err(err) => {
            warn!(path = ?entry.path(), error = %err, "cannot read modification time");
            report.errors += 1;
            return;
        }
    };

    // Files dated in the future count as fresh.
    let age = now.duration_since(modified).unwrap_or_default();
    if age <= max_age {
        return;
    }

    match fs::remove_file(entry.path()) {
        Ok(()) => {
            debug!(path = ?entry.path(), age_secs = age.as_secs(), "removed stale cache file");
            report.files_removed += 1;
        }
        Err(err) => {
            warn!(path = ?entry.path(), error = %err, "failed to remove stale cache file");
            report.errors += 1;
        }
    }
}

fn remove_if_empty(dir: &Path, report: &mut SweepReport) {
    let is_empty = match fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(err) => {
            warn!(path = ?dir, error = %err, "cannot list cache folder");
            report.errors += 1;
            return;
        }
    };
    if !is_empty {
        return;
    }

    match fs::remove_dir(dir) {
        Ok(()) => {
            debug!(path = ?dir, "removed empty cache folder");
            report.dirs_removed += 1;
        }
        Err(err) => {
            warn!(path = ?dir, error = %err, "failed to remove empty cache folder");
            report.errors += 1;
        }
    }
}

/// A sweep running on the blocking pool.
pub struct CleanupHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Result<SweepReport>>,
}

impl CleanupHandle {
    /// Validate the grace period and start sweeping `targets` in the
    /// background. Must be called from within a Tokio runtime.
    pub fn spawn(grace_period_days: i64, targets: Vec<PathBuf>) -> Result<Self> {
        grace_period(grace_period_days)?;

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = tokio::task::spawn_blocking(move || {
            remove_old_cached_data(grace_period_days, &targets, &flag)
        });

        Ok(Self { stop, handle })
    }

    /// Flag that ends the sweep early when set.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the sweep to finish on its own.
    pub async fn join(self) -> Result<SweepReport> {
        self.handle
            .await
            .map_err(|err| TaskfeedError::Other(anyhow!("cache sweep task failed: {err}")))?
    }

    /// Ask the sweep to stop and wait for it.
    pub async fn stop(self) -> Result<SweepReport> {
        self.stop.store(true, Ordering::Relaxed);
        self.join().await
    }
}
