//! Session statistics
//!
//! Append-only record of every track outcome. Owned by the session and only
//! ever written from the pipeline's task, so it takes `&mut self` and no lock.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stemcap_common::human_time::{format_bytes, format_duration};
use stemcap_common::{FailureKind, Result, Song, Track};
use tracing::info;
use uuid::Uuid;

/// Number of error messages listed in the summary
pub const TOP_ERRORS: usize = 5;

/// Outcome of one track as recorded for the report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackRecord {
    pub index: String,
    pub name: String,
    pub success: bool,
    #[serde(serialize_with = "serialize_secs", rename = "elapsed_secs")]
    pub elapsed: Duration,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Problems that did not fail the track
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<TrackWarning>,
}

/// Non-fatal problem attached to a track record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackWarning {
    pub kind: FailureKind,
    pub message: String,
}

impl TrackRecord {
    pub fn success(track: &Track, elapsed: Duration, bytes: u64) -> Self {
        Self {
            index: track.index.clone(),
            name: track.name.clone(),
            success: true,
            elapsed,
            bytes,
            failure: None,
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn failure(track: &Track, elapsed: Duration, kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            index: track.index.clone(),
            name: track.name.clone(),
            success: false,
            elapsed,
            bytes: 0,
            failure: Some(kind),
            error: Some(error.into()),
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<TrackWarning>) -> Self {
        self.warnings = warnings;
        self
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Narrow stats interface used by the pipeline and session
pub trait StatsSink: Send {
    fn song_started(&mut self, song: &Song, track_count: usize);

    fn record_track(&mut self, song: &Song, record: TrackRecord);

    fn song_finished(&mut self, song: &Song);

    /// Stamp the session end
    fn finish(&mut self);

    /// Human summary, `None` when nothing is recorded
    fn summary(&self) -> Option<String> {
        None
    }

    /// Write the structured report to `path`
    fn write_report(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStats;

impl StatsSink for NullStats {
    fn song_started(&mut self, _song: &Song, _track_count: usize) {}
    fn record_track(&mut self, _song: &Song, _record: TrackRecord) {}
    fn song_finished(&mut self, _song: &Song) {}
    fn finish(&mut self) {}
}

#[derive(Debug, Clone, Serialize)]
pub struct SongStats {
    pub name: String,
    pub url: String,
    pub folder: String,
    pub key_adjustment: i8,
    pub track_count: usize,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub tracks: Vec<TrackRecord>,
}

impl SongStats {
    pub fn attempted(&self) -> usize {
        self.tracks.len()
    }

    pub fn completed(&self) -> usize {
        self.tracks.iter().filter(|t| t.success).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.completed()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub song: String,
    pub track: String,
    pub kind: Option<FailureKind>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct SessionMetadata {
    session_id: Uuid,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    duration: f64,
    attempted: usize,
    completed: usize,
    failed: usize,
    success_rate: f64,
    total_download_time: f64,
}

#[derive(Debug, Serialize)]
struct SongReport<'a> {
    #[serde(flatten)]
    song: &'a SongStats,
    attempted: usize,
    completed: usize,
    failed: usize,
}

#[derive(Debug, Serialize)]
struct StatsReport<'a> {
    session_metadata: SessionMetadata,
    songs: Vec<SongReport<'a>>,
    errors: &'a [ErrorRecord],
}

/// Session-wide statistics accumulator
#[derive(Debug)]
pub struct StatsRecorder {
    session_id: Uuid,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    songs: Vec<SongStats>,
    errors: Vec<ErrorRecord>,
}

impl Default for StatsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            start: Utc::now(),
            end: None,
            songs: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn songs(&self) -> &[SongStats] {
        &self.songs
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    fn song_mut(&mut self, song: &Song) -> &mut SongStats {
        // Tracks recorded for a song that was never started still get a row
        let position = self.songs.iter().rposition(|s| {
            s.folder == song.folder_name && s.key_adjustment == song.key_adjustment && s.url == song.url
        });
        let position = match position {
            Some(p) => p,
            None => {
                self.songs.push(new_song_stats(song, 0));
                self.songs.len() - 1
            }
        };
        &mut self.songs[position]
    }

    fn tracks(&self) -> impl Iterator<Item = &TrackRecord> {
        self.songs.iter().flat_map(|s| s.tracks.iter())
    }

    pub fn attempted(&self) -> usize {
        self.tracks().count()
    }

    pub fn completed(&self) -> usize {
        self.tracks().filter(|t| t.success).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.completed()
    }

    /// Completed / attempted, 0.0 when nothing was attempted
    pub fn success_rate(&self) -> f64 {
        match self.attempted() {
            0 => 0.0,
            n => self.completed() as f64 / n as f64,
        }
    }

    /// Sum of the time spent on completed tracks
    pub fn total_download_time(&self) -> Duration {
        self.tracks().filter(|t| t.success).map(|t| t.elapsed).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.tracks().map(|t| t.bytes).sum()
    }

    pub fn fastest(&self) -> Option<&TrackRecord> {
        self.tracks().filter(|t| t.success).min_by_key(|t| t.elapsed)
    }

    pub fn slowest(&self) -> Option<&TrackRecord> {
        self.tracks().filter(|t| t.success).max_by_key(|t| t.elapsed)
    }

    /// Error messages by frequency, most common first (ties by message)
    pub fn error_histogram(&self) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for error in &self.errors {
            *counts.entry(error.message.as_str()).or_insert(0) += 1;
        }
        let mut histogram: Vec<(String, usize)> = counts.into_iter().map(|(m, c)| (m.to_string(), c)).collect();
        histogram.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        histogram
    }

    fn duration(&self) -> Duration {
        (self.end.unwrap_or_else(Utc::now) - self.start)
            .to_std()
            .unwrap_or_default()
    }

    /// Human-readable session summary
    pub fn summary(&self) -> String {
        let mut lines = vec![
            "=== Session summary ===".to_string(),
            format!(
                "Songs: {}  Tracks attempted: {}  completed: {}  failed: {}",
                self.songs.len(),
                self.attempted(),
                self.completed(),
                self.failed()
            ),
            format!("Success rate: {:.1}%", self.success_rate() * 100.0),
            format!(
                "Session time: {}  download time: {}  downloaded: {}",
                format_duration(self.duration()),
                format_duration(self.total_download_time()),
                format_bytes(self.total_bytes())
            ),
        ];

        if let Some(fastest) = self.fastest() {
            lines.push(format!("Fastest track: {} ({})", fastest.name, format_duration(fastest.elapsed)));
        }
        if let Some(slowest) = self.slowest() {
            lines.push(format!("Slowest track: {} ({})", slowest.name, format_duration(slowest.elapsed)));
        }

        let histogram = self.error_histogram();
        if !histogram.is_empty() {
            lines.push("Top errors:".to_string());
            for (message, count) in histogram.into_iter().take(TOP_ERRORS) {
                lines.push(format!("  {:>3} × {}", count, message));
            }
        }

        lines.join("\n")
    }

    /// Structured report
    pub fn to_json(&self) -> serde_json::Value {
        let report = StatsReport {
            session_metadata: SessionMetadata {
                session_id: self.session_id,
                start: self.start,
                end: self.end,
                duration: self.duration().as_secs_f64(),
                attempted: self.attempted(),
                completed: self.completed(),
                failed: self.failed(),
                success_rate: self.success_rate(),
                total_download_time: self.total_download_time().as_secs_f64(),
            },
            songs: self
                .songs
                .iter()
                .map(|song| SongReport {
                    song,
                    attempted: song.attempted(),
                    completed: song.completed(),
                    failed: song.failed(),
                })
                .collect(),
            errors: &self.errors,
        };
        serde_json::to_value(report).unwrap_or(serde_json::Value::Null)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(&self.to_json())?;
        std::fs::write(path, content)?;
        info!(path = %path.display(), "Stats written");
        Ok(())
    }
}

fn new_song_stats(song: &Song, track_count: usize) -> SongStats {
    SongStats {
        name: song.display_name.clone(),
        url: song.url.clone(),
        folder: song.folder_name.clone(),
        key_adjustment: song.key_adjustment,
        track_count,
        start: Utc::now(),
        end: None,
        tracks: Vec::new(),
    }
}

impl StatsSink for StatsRecorder {
    fn song_started(&mut self, song: &Song, track_count: usize) {
        self.songs.push(new_song_stats(song, track_count));
    }

    fn record_track(&mut self, song: &Song, record: TrackRecord) {
        if let Some(message) = &record.error {
            self.errors.push(ErrorRecord {
                song: song.display_name.clone(),
                track: record.name.clone(),
                kind: record.failure,
                message: message.clone(),
                timestamp: Utc::now(),
            });
        }
        for warning in &record.warnings {
            self.errors.push(ErrorRecord {
                song: song.display_name.clone(),
                track: record.name.clone(),
                kind: Some(warning.kind),
                message: warning.message.clone(),
                timestamp: Utc::now(),
            });
        }
        self.song_mut(song).tracks.push(record);
    }

    fn song_finished(&mut self, song: &Song) {
        self.song_mut(song).end = Some(Utc::now());
    }

    fn finish(&mut self) {
        if self.end.is_none() {
            self.end = Some(Utc::now());
        }
    }

    fn summary(&self) -> Option<String> {
        Some(StatsRecorder::summary(self))
    }

    fn write_report(&self, path: &Path) -> Result<()> {
        self.write_json(path)
    }
}
