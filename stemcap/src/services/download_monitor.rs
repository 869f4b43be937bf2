//! Download monitor
//!
//! Watches one per-song folder for the file produced by a download click.
//! Runs as its own tokio task that only reads the filesystem; the pipeline
//! joins it before touching the folder or the mixer again.
//!
//! **Phase A (wait-for-start):** poll until a file looks like a karaoke
//! download (audio or partial, with the site's marker or a verbose name).
//!
//! **Phase B (wait-for-completion):** after a fixed server render wait, poll
//! at a rate that follows the download's progress:
//!
//! | State        | Entered when                         | Poll      |
//! |--------------|--------------------------------------|-----------|
//! | WaitServer   | initial wait elapsed                 | default   |
//! | Active       | a partial file appears               | active    |
//! | Imminent     | the partial file disappears          | imminent  |
//!
//! Files present when monitoring began are ignored unless they still carry
//! the site's marker, so a download that finished before the monitor woke
//! is still claimed.

use std::path::{Path, PathBuf};
use std::time::Duration;
use stemcap_common::{DownloadOutcome, TimeoutPhase};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

use crate::services::fs_scan::{
    has_partial_sibling, is_audio_name, is_in_progress_name, FileInfo, FileSnapshot, FsScanner,
};
use crate::services::name_cleaner::needs_cleaning;
use crate::timings::Timings;

/// Names longer than this pass the start heuristic without the marker
const VERBOSE_NAME_LEN: usize = 20;

/// Observable monitor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    WaitingStart,
    /// Download seen; fixed server render wait
    Started,
    WaitServer,
    Active,
    Imminent,
    Finished,
}

/// Whether a file name passes the download-start heuristic
pub fn looks_like_download(name: &str, snapshot: &FileSnapshot) -> bool {
    if !is_audio_name(name) && !is_in_progress_name(name) {
        return false;
    }
    let marked = needs_cleaning(name);
    if !marked && name.chars().count() <= VERBOSE_NAME_LEN {
        return false;
    }
    !snapshot.contains(name) || marked
}

/// Finalized audio files the current download may have produced
pub fn finalized_audio(files: &[FileInfo], snapshot: &FileSnapshot, recent_window: Duration) -> Vec<FileInfo> {
    let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
    files
        .iter()
        .filter(|f| is_audio_name(&f.name))
        .filter(|f| !has_partial_sibling(&f.name, names.iter().copied()))
        .filter(|f| {
            if snapshot.contains(&f.name) {
                needs_cleaning(&f.name)
            } else {
                f.age < recent_window
            }
        })
        .cloned()
        .collect()
}

/// Monitor for a single track's download
pub struct DownloadMonitor {
    folder: PathBuf,
    timings: Timings,
    snapshot: FileSnapshot,
    scanner: FsScanner,
    label: String,
}

impl DownloadMonitor {
    /// Snapshot `folder` now; the snapshot never changes afterwards
    pub fn new(folder: &Path, timings: &Timings, label: impl Into<String>) -> Self {
        let scanner = FsScanner::new(timings.scan_ttl);
        let snapshot = scanner.snapshot(folder);
        Self {
            folder: folder.to_path_buf(),
            timings: timings.clone(),
            snapshot,
            scanner,
            label: label.into(),
        }
    }

    pub fn snapshot(&self) -> &FileSnapshot {
        &self.snapshot
    }

    /// Snapshot the folder and run the monitor on its own task
    pub fn start(folder: &Path, timings: &Timings, label: impl Into<String>) -> MonitorHandle {
        let monitor = Self::new(folder, timings, label);
        debug!(
            folder = %folder.display(),
            snapshot_len = monitor.snapshot.len(),
            "Download monitor started"
        );

        let (phase_tx, phase_rx) = watch::channel(MonitorPhase::WaitingStart);
        let join = tokio::spawn(async move { monitor.run(phase_tx).await });
        MonitorHandle { join, phase_rx }
    }

    /// Both phases; never runs longer than the two timeouts combined
    pub async fn run(self, phase_tx: watch::Sender<MonitorPhase>) -> DownloadOutcome {
        let outcome = match self.wait_for_start().await {
            Some(first) => {
                info!(monitor = %self.label, file = %first, "Download started");
                phase_tx.send_replace(MonitorPhase::Started);
                self.wait_for_completion(&phase_tx).await
            }
            None => {
                info!(
                    monitor = %self.label,
                    timeout_secs = self.timings.start_timeout.as_secs_f64(),
                    "No download detected"
                );
                DownloadOutcome::Timeout(TimeoutPhase::Start)
            }
        };

        phase_tx.send_replace(MonitorPhase::Finished);
        outcome
    }

    async fn wait_for_start(&self) -> Option<String> {
        let deadline = Instant::now() + self.timings.start_timeout;
        loop {
            let files = self.scanner.scan(&self.folder, None);
            if let Some(file) = files.iter().find(|f| looks_like_download(&f.name, &self.snapshot)) {
                return Some(file.name.clone());
            }

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            sleep(self.timings.start_poll.min(deadline - now)).await;
        }
    }

    async fn wait_for_completion(&self, phase_tx: &watch::Sender<MonitorPhase>) -> DownloadOutcome {
        let deadline = Instant::now() + self.timings.completion_timeout;

        // Fast renders may already be finished
        if let Some(outcome) = self.completed_outcome() {
            return outcome;
        }

        sleep(self.timings.initial_wait.min(self.timings.completion_timeout)).await;

        let mut phase = MonitorPhase::WaitServer;
        let mut poll = self.timings.default_poll;
        phase_tx.send_replace(phase);
        debug!(monitor = %self.label, "Waiting for server render");

        loop {
            let files = self.scanner.scan(&self.folder, None);
            let in_progress = files.iter().any(|f| is_in_progress_name(&f.name));

            if in_progress && phase == MonitorPhase::WaitServer {
                phase = MonitorPhase::Active;
                poll = self.timings.active_poll;
                phase_tx.send_replace(phase);
                info!(monitor = %self.label, "Download in progress");
            } else if phase == MonitorPhase::Active && !in_progress {
                phase = MonitorPhase::Imminent;
                poll = self.timings.imminent_poll;
                phase_tx.send_replace(phase);
                info!(monitor = %self.label, "Completion imminent");
            }

            if let Some(outcome) = self.outcome_from(&files) {
                return outcome;
            }

            let now = Instant::now();
            if now >= deadline {
                info!(
                    monitor = %self.label,
                    phase = ?phase,
                    timeout_secs = self.timings.completion_timeout.as_secs_f64(),
                    "Download did not complete in time"
                );
                return DownloadOutcome::Timeout(TimeoutPhase::Completion);
            }
            sleep(poll.min(deadline - now)).await;
        }
    }

    fn completed_outcome(&self) -> Option<DownloadOutcome> {
        let files = self.scanner.scan(&self.folder, None);
        self.outcome_from(&files)
    }

    fn outcome_from(&self, files: &[FileInfo]) -> Option<DownloadOutcome> {
        let finished = finalized_audio(files, &self.snapshot, self.timings.recent_window);
        if finished.is_empty() {
            return None;
        }

        let total_bytes = finished.iter().map(|f| f.size).sum();
        info!(
            monitor = %self.label,
            files = finished.len(),
            total_bytes,
            "Download complete"
        );
        Some(DownloadOutcome::Completed {
            file_paths: finished.into_iter().map(|f| f.path).collect(),
            total_bytes,
        })
    }
}

/// Running monitor task
pub struct MonitorHandle {
    join: JoinHandle<DownloadOutcome>,
    phase_rx: watch::Receiver<MonitorPhase>,
}

impl MonitorHandle {
    pub fn subscribe(&self) -> watch::Receiver<MonitorPhase> {
        self.phase_rx.clone()
    }

    /// Wait for the task; a panicked or cancelled task becomes `MonitorError`
    pub async fn join(self) -> DownloadOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Download monitor task failed: {}", e);
                DownloadOutcome::MonitorError(e.to_string())
            }
        }
    }

    /// Stop the task without waiting for an outcome
    pub fn abort(self) {
        self.join.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_heuristic() {
        let empty = FileSnapshot::default();
        assert!(looks_like_download("Demo(Bass_Custom_Backing_Track).mp3", &empty));
        assert!(looks_like_download("Demo(Bass_Custom_Backing_Track).mp3.crdownload", &empty));
        assert!(looks_like_download("a_rather_long_download_name.mp3", &empty));
        assert!(!looks_like_download("Bass.mp3", &empty));
        assert!(!looks_like_download("a_rather_long_download_name.txt", &empty));

        let snapshot = FileSnapshot::from_names(["Demo(Bass_Custom_Backing_Track).mp3", "a_rather_long_old_name.mp3"]);
        assert!(looks_like_download("Demo(Bass_Custom_Backing_Track).mp3", &snapshot));
        assert!(!looks_like_download("a_rather_long_old_name.mp3", &snapshot));
    }

    fn info(name: &str, age_secs: u64) -> FileInfo {
        FileInfo {
            path: PathBuf::from("/music").join(name),
            name: name.to_string(),
            exists: true,
            is_file: true,
            size: 10,
            mtime: None,
            age: Duration::from_secs(age_secs),
        }
    }

    #[test]
    fn test_finalized_audio_rules() {
        let window = Duration::from_secs(300);
        let snapshot = FileSnapshot::from_names(["Guitar.mp3", "Old(Custom_Backing_Track).mp3"]);
        let files = vec![
            info("Guitar.mp3", 1000),
            info("Old(Custom_Backing_Track).mp3", 1000),
            info("Fresh.mp3", 3),
            info("Stale.mp3", 900),
            info("Writing(Custom_Backing_Track).mp3", 1),
            info("Writing(Custom_Backing_Track).mp3.crdownload", 1),
            info("notes.txt", 1),
        ];

        let names: Vec<String> = finalized_audio(&files, &snapshot, window)
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["Old(Custom_Backing_Track).mp3", "Fresh.mp3"]);
    }
}
