//! Per-track status board
//!
//! Jobs live behind a single mutex; every status update and every snapshot
//! takes it. A ticker task redraws the board on stderr while anything changed.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use stemcap_common::human_time::{format_bytes, format_duration};
use stemcap_common::models::format_key_offset;
use stemcap_common::{Error, JobKey, Result, TrackJob, TrackStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Narrow progress interface used by the pipeline
pub trait ProgressSink: Send + Sync {
    fn register_track(&self, job: TrackJob);

    /// Move a job to `status`; illegal transitions are rejected
    fn update_track_status(&self, key: &JobKey, status: TrackStatus, error: Option<String>) -> Result<()>;

    fn update_progress(&self, key: &JobKey, progress: u8);

    fn update_bytes(&self, key: &JobKey, bytes: u64);

    /// Consistent copy of all jobs
    fn snapshot(&self) -> Vec<TrackJob>;
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn register_track(&self, _job: TrackJob) {}

    fn update_track_status(&self, _key: &JobKey, _status: TrackStatus, _error: Option<String>) -> Result<()> {
        Ok(())
    }

    fn update_progress(&self, _key: &JobKey, _progress: u8) {}

    fn update_bytes(&self, _key: &JobKey, _bytes: u64) {}

    fn snapshot(&self) -> Vec<TrackJob> {
        Vec::new()
    }
}

#[derive(Debug, Default)]
pub struct ProgressTracker {
    jobs: Mutex<Vec<TrackJob>>,
    /// Bumped on every mutation so the ticker only redraws on change
    version: AtomicU64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TrackJob>> {
        // A panicked writer leaves plain data behind; keep using it
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_job<F>(&self, key: &JobKey, f: F) -> Result<()>
    where
        F: FnOnce(&mut TrackJob) -> Result<()>,
    {
        let mut jobs = self.lock();
        let job = jobs
            .iter_mut()
            .find(|j| &j.key() == key)
            .ok_or_else(|| Error::InvalidInput(format!("unknown job {}", key)))?;
        f(job)?;
        self.version.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    /// Redraw the board every `tick` until `cancel` fires, then draw once more
    pub fn spawn_ticker(self: Arc<Self>, tick: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            let mut drawn_version = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let version = self.version();
                        if drawn_version != Some(version) {
                            eprint!("{}", render_board(&self.snapshot()));
                            drawn_version = Some(version);
                        }
                    }
                }
            }
            if drawn_version != Some(self.version()) {
                eprint!("{}", render_board(&self.snapshot()));
            }
        })
    }
}

impl ProgressSink for ProgressTracker {
    fn register_track(&self, job: TrackJob) {
        let mut jobs = self.lock();
        let key = job.key();
        if jobs.iter().any(|j| j.key() == key) {
            warn!(job = %key, "Job registered twice, keeping the first");
            return;
        }
        jobs.push(job);
        self.version.fetch_add(1, Ordering::Relaxed);
    }

    fn update_track_status(&self, key: &JobKey, status: TrackStatus, error: Option<String>) -> Result<()> {
        self.with_job(key, |job| {
            job.transition(status, Utc::now())?;
            if error.is_some() {
                job.error = error;
            }
            Ok(())
        })
    }

    fn update_progress(&self, key: &JobKey, progress: u8) {
        let result = self.with_job(key, |job| {
            if !job.status.is_terminal() {
                job.progress = job.progress.max(progress.min(100));
            }
            Ok(())
        });
        if let Err(e) = result {
            warn!("Progress update ignored: {}", e);
        }
    }

    fn update_bytes(&self, key: &JobKey, bytes: u64) {
        let result = self.with_job(key, |job| {
            job.bytes = bytes;
            Ok(())
        });
        if let Err(e) = result {
            warn!("Byte count update ignored: {}", e);
        }
    }

    fn snapshot(&self) -> Vec<TrackJob> {
        self.lock().clone()
    }
}

fn status_icon(status: TrackStatus) -> &'static str {
    match status {
        TrackStatus::Pending => "·",
        TrackStatus::Verifying | TrackStatus::Downloading | TrackStatus::Processing => "⏳",
        TrackStatus::Completed => "✅",
        TrackStatus::Failed => "❌",
    }
}

/// Textual board, one line per job, grouped by song
pub fn render_board(jobs: &[TrackJob]) -> String {
    let mut out = String::new();
    let mut current_song: Option<JobKey> = None;

    for job in jobs {
        let key = job.key();
        if !current_song.as_ref().map(|k| k.same_song(&key)).unwrap_or(false) {
            match format_key_offset(job.song.key_adjustment) {
                Some(offset) => {
                    let _ = writeln!(out, "{} ({})", job.song.display_name, offset);
                }
                None => {
                    let _ = writeln!(out, "{}", job.song.display_name);
                }
            }
            current_song = Some(key);
        }

        let _ = write!(
            out,
            "  {} {:<28} {:>3}% {:<11}",
            status_icon(job.status),
            job.track.name,
            job.progress,
            job.status.as_str()
        );
        if job.status != TrackStatus::Pending {
            let elapsed = job.elapsed().to_std().unwrap_or_default();
            let _ = write!(out, " {}", format_duration(elapsed));
        }
        if job.bytes > 0 {
            let _ = write!(out, " {}", format_bytes(job.bytes));
        }
        if let Some(error) = &job.error {
            let _ = write!(out, " ({})", error);
        }
        out.push('\n');
    }
    out
}
