//! Per-track isolate-and-capture pipeline
//!
//! # Stages
//! ```text
//! VerifyPre → LocateButton → VerifyPre2 → Click → WaitStart → WaitComplete → Cleanup
//! ```
//! Each stage gates the next. A failed stage ends the track with a
//! [`FailureKind`]; no error leaves this module and no stage is retried here
//! (the validator and the monitor carry their own bounded retries).
//!
//! The download monitor snapshots the folder before the click and is always
//! joined before the pipeline returns, so the next track's solo toggle can
//! never race the current file's rename.

use std::path::{Path, PathBuf};
use std::time::Instant;

use stemcap_common::{DownloadOutcome, FailureKind, JobKey, Song, Track, TrackStatus};
use tracing::{debug, info, warn};

use crate::browser::Browser;
use crate::progress::ProgressSink;
use crate::selectors::SiteSelectors;
use crate::services::download_actuator::{DownloadActuator, Located};
use crate::services::download_monitor::{DownloadMonitor, MonitorPhase};
use crate::services::fs_scan::{is_audio_name, verify_audio_magic, FsScanner};
use crate::services::mixer::MixerControl;
use crate::services::name_cleaner::{needs_cleaning, NameCleaner};
use crate::services::solo_validator::SoloValidator;
use crate::stats::{StatsSink, TrackRecord, TrackWarning};
use crate::timings::Timings;

/// Pipeline stage, for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    VerifyPre,
    LocateButton,
    VerifyPre2,
    Click,
    WaitStart,
    WaitComplete,
    Cleanup,
}

/// Final state of one track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackResult {
    pub status: TrackStatus,
    pub failure: Option<FailureKind>,
    /// Files left in the song folder for this track, after renaming
    pub files: Vec<PathBuf>,
    pub bytes: u64,
}

impl TrackResult {
    pub fn is_success(&self) -> bool {
        self.status == TrackStatus::Completed
    }

    /// Whether the enclosing song must stop here
    pub fn is_song_fatal(&self) -> bool {
        self.failure.map(FailureKind::is_song_fatal).unwrap_or(false)
    }
}

/// Shared collaborators for every track of a session
#[derive(Clone, Copy)]
pub struct PipelineContext<'a> {
    pub browser: &'a dyn Browser,
    pub selectors: &'a SiteSelectors,
    pub timings: &'a Timings,
    pub progress: &'a dyn ProgressSink,
}

pub struct TrackPipeline<'a> {
    ctx: PipelineContext<'a>,
}

struct Failure {
    kind: FailureKind,
    message: String,
}

impl Failure {
    fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            message: kind.description().to_string(),
        }
    }

    fn with_message(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    fn from_outcome(outcome: &DownloadOutcome) -> Self {
        let kind = outcome.failure_kind().unwrap_or(FailureKind::MonitorError);
        let message = outcome
            .error_message()
            .unwrap_or_else(|| kind.description().to_string());
        Self { kind, message }
    }
}

struct Captured {
    files: Vec<PathBuf>,
    bytes: u64,
    warnings: Vec<TrackWarning>,
}

/// Progress shown while the monitor runs
fn phase_progress(phase: MonitorPhase) -> u8 {
    match phase {
        MonitorPhase::WaitingStart => 35,
        MonitorPhase::Started => 45,
        MonitorPhase::WaitServer => 55,
        MonitorPhase::Active => 65,
        MonitorPhase::Imminent => 80,
        MonitorPhase::Finished => 85,
    }
}

impl<'a> TrackPipeline<'a> {
    pub fn new(ctx: PipelineContext<'a>) -> Self {
        Self { ctx }
    }

    fn validator(&self) -> SoloValidator<'a> {
        SoloValidator::new(self.ctx.browser, self.ctx.selectors, self.ctx.timings)
    }

    fn set_status(&self, key: &JobKey, status: TrackStatus, error: Option<String>) {
        if let Err(e) = self.ctx.progress.update_track_status(key, status, error) {
            warn!(job = %key, "Progress update rejected: {}", e);
        }
    }

    /// Run every stage for `track`, downloading into `folder`
    ///
    /// Always returns; every outcome is also published to progress and stats.
    pub async fn run(&self, song: &Song, track: &Track, folder: &Path, stats: &mut dyn StatsSink) -> TrackResult {
        let key = JobKey::new(song, track);
        let started = Instant::now();
        info!(song = %song.display_name, track = %track.name, track_index = %track.index, "Track started");

        self.set_status(&key, TrackStatus::Verifying, None);

        match self.capture(song, track, folder, &key).await {
            Ok(captured) => {
                self.ctx.progress.update_bytes(&key, captured.bytes);
                let note = match captured.warnings.as_slice() {
                    [] => None,
                    warnings => Some(
                        warnings
                            .iter()
                            .map(|w| w.message.as_str())
                            .collect::<Vec<_>>()
                            .join("; "),
                    ),
                };
                self.set_status(&key, TrackStatus::Completed, note);
                stats.record_track(
                    song,
                    TrackRecord::success(track, started.elapsed(), captured.bytes).with_warnings(captured.warnings),
                );
                info!(
                    song = %song.display_name,
                    track = %track.name,
                    files = captured.files.len(),
                    bytes = captured.bytes,
                    "Track completed"
                );
                TrackResult {
                    status: TrackStatus::Completed,
                    failure: None,
                    files: captured.files,
                    bytes: captured.bytes,
                }
            }
            Err(failure) => {
                self.set_status(&key, TrackStatus::Failed, Some(failure.message.clone()));
                stats.record_track(
                    song,
                    TrackRecord::failure(track, started.elapsed(), failure.kind, failure.message.clone()),
                );
                warn!(
                    song = %song.display_name,
                    track = %track.name,
                    kind = %failure.kind,
                    "Track failed: {}",
                    failure.message
                );
                TrackResult {
                    status: TrackStatus::Failed,
                    failure: Some(failure.kind),
                    files: Vec::new(),
                    bytes: 0,
                }
            }
        }
    }

    async fn capture(&self, song: &Song, track: &Track, folder: &Path, key: &JobKey) -> Result<Captured, Failure> {
        let ctx = self.ctx;

        if let Err(e) = MixerControl::new(ctx.browser, ctx.selectors, ctx.timings)
            .solo_track(track)
            .await
        {
            // The validator decides whether the mixer ended up right
            warn!(track = %track.name, "Solo toggle failed: {}", e);
        }

        debug!(stage = ?Stage::VerifyPre, track = %track.name, "Stage");
        self.verify_solo(track).await?;

        debug!(stage = ?Stage::LocateButton, track = %track.name, "Stage");
        let actuator = DownloadActuator::new(ctx.browser, ctx.selectors, ctx.timings);
        let control = match actuator.locate().await {
            Ok(Located::Found(control)) => control,
            Ok(Located::NotPurchased) => return Err(Failure::new(FailureKind::NotPurchased)),
            Ok(Located::Missing) => return Err(Failure::new(FailureKind::ButtonMissing)),
            Err(e) => {
                return Err(Failure::with_message(
                    FailureKind::ButtonMissing,
                    format!("download control lookup failed: {}", e),
                ))
            }
        };

        debug!(stage = ?Stage::VerifyPre2, track = %track.name, "Stage");
        self.verify_solo(track).await?;

        self.set_status(key, TrackStatus::Downloading, None);
        let monitor = DownloadMonitor::start(folder, ctx.timings, format!("{}#{}", song.folder_name, track.index));

        debug!(stage = ?Stage::Click, track = %track.name, "Stage");
        match actuator.click_and_absorb(&control).await {
            Ok(report) => debug!(
                reaction = report.reaction_seen,
                windows_closed = report.windows_closed,
                modals_dismissed = report.modals_dismissed,
                "Click absorbed"
            ),
            Err(e) => {
                monitor.abort();
                return Err(Failure::with_message(
                    FailureKind::ButtonMissing,
                    format!("download click failed: {}", e),
                ));
            }
        }

        debug!(stage = ?Stage::WaitStart, track = %track.name, "Stage");
        let mut phase_rx = monitor.subscribe();
        let join = monitor.join();
        tokio::pin!(join);
        let outcome = loop {
            tokio::select! {
                outcome = &mut join => break outcome,
                changed = phase_rx.changed() => {
                    if changed.is_err() {
                        break (&mut join).await;
                    }
                    let phase = *phase_rx.borrow_and_update();
                    if phase == MonitorPhase::WaitServer {
                        debug!(stage = ?Stage::WaitComplete, track = %track.name, "Stage");
                    }
                    ctx.progress.update_progress(key, phase_progress(phase));
                }
            }
        };

        let (file_paths, total_bytes) = match outcome {
            DownloadOutcome::Completed { file_paths, total_bytes } => (file_paths, total_bytes),
            other => return Err(Failure::from_outcome(&other)),
        };
        debug!(files = file_paths.len(), total_bytes, "Monitor joined");

        self.set_status(key, TrackStatus::Processing, None);
        debug!(stage = ?Stage::Cleanup, track = %track.name, "Stage");
        self.cleanup(song, track, folder, file_paths)
    }

    async fn verify_solo(&self, track: &Track) -> Result<(), Failure> {
        let validator = self.validator();
        if validator.verify(track).await {
            return Ok(());
        }

        match validator.verify_audio_mix(track).await {
            Ok(Some(mix)) => info!(
                track = %track.name,
                score = mix.score(),
                passed = mix.passed(),
                "Advisory mix check"
            ),
            Ok(None) => debug!("No mixer state exposed by the page"),
            Err(e) => debug!("Advisory mix check failed: {}", e),
        }
        Err(Failure::new(FailureKind::SoloVerificationFailed))
    }

    /// Rename every marked file in the folder, then validate what is left
    fn cleanup(&self, song: &Song, track: &Track, folder: &Path, monitored: Vec<PathBuf>) -> Result<Captured, Failure> {
        let cleaner = NameCleaner::for_track(track, song.key_adjustment);
        let scanner = FsScanner::new(std::time::Duration::ZERO);

        let mut files: Vec<PathBuf> = monitored
            .into_iter()
            .filter(|p| {
                p.file_name()
                    .map(|n| !needs_cleaning(&n.to_string_lossy()))
                    .unwrap_or(false)
            })
            .collect();
        let mut rename_failures = Vec::new();

        for info in scanner.scan(folder, None) {
            if !is_audio_name(&info.name) || !needs_cleaning(&info.name) {
                continue;
            }
            match cleaner.rename_in(folder, &info.name) {
                Ok(path) => {
                    info!(from = %info.name, to = %path.display(), "Download renamed");
                    files.push(path);
                }
                Err(e) => {
                    warn!(file = %info.name, "Rename failed, keeping original: {}", e);
                    rename_failures.push(e.to_string());
                    files.push(info.path);
                }
            }
        }

        files.sort();
        files.dedup();

        let mut bytes = 0;
        for path in &files {
            let info = scanner.stat(path);
            if info.exists && info.size == 0 {
                return Err(Failure::with_message(
                    FailureKind::InvalidAudio,
                    format!("{}: empty file", info.name),
                ));
            }
            bytes += info.size;

            match verify_audio_magic(path) {
                Ok(true) => {}
                Ok(false) => warn!(file = %info.name, "Unrecognized audio signature"),
                Err(e) => warn!(file = %info.name, "Could not read audio signature: {}", e),
            }
        }

        if bytes == 0 {
            return Err(match rename_failures.first() {
                Some(message) => Failure::with_message(FailureKind::RenameError, message.clone()),
                None => Failure::with_message(FailureKind::MonitorError, "no downloaded file left to keep"),
            });
        }

        let warnings = rename_failures
            .into_iter()
            .map(|message| TrackWarning {
                kind: FailureKind::RenameError,
                message,
            })
            .collect();
        Ok(Captured { files, bytes, warnings })
    }
}
