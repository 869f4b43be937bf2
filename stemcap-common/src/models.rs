//! Data model shared by the capture pipeline and its collaborators
//!
//! **Lifecycle:**
//! - `Song` and `Track` are immutable once loaded/discovered
//! - `TrackJob` is created when its song starts and is mutated only through
//!   [`TrackJob::transition`], which enforces the status graph
//! - `DownloadOutcome` is the value the pipeline reports for each track

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::{Error, Result};

/// Characters that are invalid in file names on at least one supported platform
pub const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Maximum length (in characters) of a sanitized folder or file base name
pub const MAX_NAME_LEN: usize = 100;

/// Supported key adjustment range in semitones
pub const KEY_RANGE: std::ops::RangeInclusive<i8> = -12..=12;

/// Replace filesystem-invalid characters with `_` and clamp to [`MAX_NAME_LEN`]
///
/// Apostrophes and spaces are preserved. Leading/trailing whitespace is trimmed.
pub fn sanitize_name(name: &str) -> String {
    let replaced: String = name
        .trim()
        .chars()
        .map(|c| {
            if INVALID_FILENAME_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let clamped: String = replaced.chars().take(MAX_NAME_LEN).collect();
    clamped.trim_end().to_string()
}

/// Format a key adjustment as it appears in file names (`+2`, `-1`)
///
/// Returns `None` for zero.
pub fn format_key_offset(key: i8) -> Option<String> {
    match key {
        0 => None,
        k if k > 0 => Some(format!("+{}", k)),
        k => Some(k.to_string()),
    }
}

/// One configured song
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub url: String,
    pub display_name: String,
    /// Semitone offset in [-12, +12]
    pub key_adjustment: i8,
    /// Sanitized `display_name`, used as the per-song folder name
    pub folder_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Song {
    /// Create a song, deriving `folder_name` from `display_name`
    pub fn new(url: impl Into<String>, display_name: impl Into<String>, key_adjustment: i8) -> Result<Self> {
        if !KEY_RANGE.contains(&key_adjustment) {
            return Err(Error::InvalidInput(format!(
                "key adjustment {} outside [-12, +12]",
                key_adjustment
            )));
        }

        let display_name = display_name.into();
        let folder_name = sanitize_name(&display_name);
        if folder_name.is_empty() {
            return Err(Error::InvalidInput("song name is empty".to_string()));
        }

        Ok(Self {
            url: url.into(),
            display_name,
            key_adjustment,
            folder_name,
            description: None,
        })
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }
}

/// One mixer row on a song page
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Track {
    /// Stable DOM identifier of the mixer row
    pub index: String,
    /// Human caption
    pub name: String,
}

impl Track {
    pub fn new(index: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            name: name.into(),
        }
    }

    /// Click/metronome tracks are never key-adjusted
    pub fn is_click(&self) -> bool {
        self.name.to_lowercase().contains("click")
    }
}

/// Identifies a job across the whole session
///
/// Track indexes repeat between songs, and one song may be listed several
/// times at different keys, so the key adjustment and URL are part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub song: String,
    pub key_adjustment: i8,
    pub url: String,
    pub index: String,
}

impl JobKey {
    pub fn new(song: &Song, track: &Track) -> Self {
        Self {
            song: song.folder_name.clone(),
            key_adjustment: song.key_adjustment,
            url: song.url.clone(),
            index: track.index.clone(),
        }
    }

    /// Whether both keys belong to the same song entry
    pub fn same_song(&self, other: &JobKey) -> bool {
        self.song == other.song && self.key_adjustment == other.key_adjustment && self.url == other.url
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match format_key_offset(self.key_adjustment) {
            Some(offset) => write!(f, "{} ({})#{}", self.song, offset, self.index),
            None => write!(f, "{}#{}", self.song, self.index),
        }
    }
}

/// Per-track job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    Pending,
    Verifying,
    Downloading,
    Processing,
    Completed,
    Failed,
}

impl TrackStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TrackStatus::Completed | TrackStatus::Failed)
    }

    /// Whether the job is actively being worked on
    pub fn is_active(self) -> bool {
        !self.is_terminal() && self != TrackStatus::Pending
    }

    /// Allowed forward transitions
    ///
    /// Any non-terminal status may fail; success moves strictly forward one step.
    pub fn can_transition_to(self, next: TrackStatus) -> bool {
        use TrackStatus::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Pending, Verifying) => true,
            (Verifying, Downloading) => true,
            (Downloading, Processing) => true,
            (Processing, Completed) => true,
            _ => false,
        }
    }

    /// Default progress percentage on entering this status
    pub fn base_progress(self) -> u8 {
        match self {
            TrackStatus::Pending => 0,
            TrackStatus::Verifying => 10,
            TrackStatus::Downloading => 30,
            TrackStatus::Processing => 85,
            TrackStatus::Completed => 100,
            TrackStatus::Failed => 100,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrackStatus::Pending => "pending",
            TrackStatus::Verifying => "verifying",
            TrackStatus::Downloading => "downloading",
            TrackStatus::Processing => "processing",
            TrackStatus::Completed => "completed",
            TrackStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping record for one track of one song
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackJob {
    pub song: Song,
    pub track: Track,
    pub status: TrackStatus,
    /// 0-100
    pub progress: u8,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub bytes: u64,
    pub error: Option<String>,
}

impl TrackJob {
    /// New pending job; `started_at` is the song start time until work begins
    pub fn new(song: Song, track: Track) -> Self {
        Self {
            song,
            track,
            status: TrackStatus::Pending,
            progress: 0,
            started_at: Utc::now(),
            ended_at: None,
            bytes: 0,
            error: None,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::new(&self.song, &self.track)
    }

    /// Move to `next`, enforcing the status graph and the timestamp invariants
    pub fn transition(&mut self, next: TrackStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "{}: illegal transition {} -> {}",
                self.key(),
                self.status,
                next
            )));
        }

        if self.status == TrackStatus::Pending && next != TrackStatus::Failed {
            self.started_at = now;
        }
        if next.is_terminal() {
            self.ended_at = Some(now.max(self.started_at));
        }

        self.status = next;
        self.progress = self.progress.max(next.base_progress());
        Ok(())
    }

    /// Wall time spent on the job so far (or in total once terminal)
    pub fn elapsed(&self) -> chrono::Duration {
        self.ended_at.unwrap_or_else(Utc::now) - self.started_at
    }
}

/// Which wait phase of the download monitor expired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPhase {
    /// No download appeared in the folder
    Start,
    /// A download appeared but never finalized
    Completion,
}

/// Result of one isolate-and-capture attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed {
        file_paths: Vec<PathBuf>,
        total_bytes: u64,
    },
    Timeout(TimeoutPhase),
    NotPurchased,
    ButtonMissing,
    SoloVerificationFailed,
    MonitorError(String),
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadOutcome::Completed { .. })
    }

    /// Failure classification, `None` on success
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            DownloadOutcome::Completed { .. } => None,
            DownloadOutcome::Timeout(TimeoutPhase::Start) => Some(FailureKind::DownloadNotDetected),
            DownloadOutcome::Timeout(TimeoutPhase::Completion) => Some(FailureKind::CompletionTimeout),
            DownloadOutcome::NotPurchased => Some(FailureKind::NotPurchased),
            DownloadOutcome::ButtonMissing => Some(FailureKind::ButtonMissing),
            DownloadOutcome::SoloVerificationFailed => Some(FailureKind::SoloVerificationFailed),
            DownloadOutcome::MonitorError(_) => Some(FailureKind::MonitorError),
        }
    }

    /// Human-readable failure reason, `None` on success
    pub fn error_message(&self) -> Option<String> {
        match self {
            DownloadOutcome::Completed { .. } => None,
            DownloadOutcome::MonitorError(msg) => Some(format!("monitor error: {}", msg)),
            other => other.failure_kind().map(|k| k.description().to_string()),
        }
    }
}

/// Error kinds surfaced per track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SoloVerificationFailed,
    ButtonMissing,
    NotPurchased,
    DownloadNotDetected,
    CompletionTimeout,
    MonitorError,
    RenameError,
    InvalidAudio,
    /// Song key could not be transposed; its tracks are not captured
    KeyNotApplied,
    /// Track never attempted because an earlier track ended the song
    Skipped,
}

impl FailureKind {
    pub fn code(self) -> &'static str {
        match self {
            FailureKind::SoloVerificationFailed => "solo_verification_failed",
            FailureKind::ButtonMissing => "button_missing",
            FailureKind::NotPurchased => "not_purchased",
            FailureKind::DownloadNotDetected => "download_not_detected",
            FailureKind::CompletionTimeout => "completion_timeout",
            FailureKind::MonitorError => "monitor_error",
            FailureKind::RenameError => "rename_error",
            FailureKind::InvalidAudio => "invalid_audio",
            FailureKind::KeyNotApplied => "key_not_applied",
            FailureKind::Skipped => "skipped",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            FailureKind::SoloVerificationFailed => "solo verification failed",
            FailureKind::ButtonMissing => "download button not found",
            FailureKind::NotPurchased => "song not purchased",
            FailureKind::DownloadNotDetected => "download never started",
            FailureKind::CompletionTimeout => "download did not complete in time",
            FailureKind::MonitorError => "download monitor failed",
            FailureKind::RenameError => "could not rename downloaded file",
            FailureKind::InvalidAudio => "downloaded file is not valid audio",
            FailureKind::KeyNotApplied => "key adjustment not applied",
            FailureKind::Skipped => "skipped: song not purchased",
        }
    }

    /// Whether this failure ends processing of the enclosing song
    pub fn is_song_fatal(self) -> bool {
        self == FailureKind::NotPurchased
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
