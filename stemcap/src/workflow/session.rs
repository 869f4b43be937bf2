//! Session orchestration
//!
//! Drives every configured song through login, track discovery and the
//! per-track pipeline, one song and one track at a time. Whatever happens,
//! the progress ticker is stopped, the browser released and the stats
//! written before `run` returns.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use stemcap_common::{FailureKind, JobKey, Song, Track, TrackJob, TrackStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::browser::Browser;
use crate::progress::{NullProgress, ProgressSink, ProgressTracker};
use crate::selectors::SiteSelectors;
use crate::services::auth::Authenticator;
use crate::services::mixer::MixerControl;
use crate::services::track_discovery::TrackDiscoverer;
use crate::stats::{NullStats, StatsSink, TrackRecord};
use crate::timings::Timings;
use crate::workflow::track_pipeline::{PipelineContext, TrackPipeline};

/// Totals returned by [`Session::run`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub logged_in: bool,
    pub songs_processed: usize,
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub struct Session {
    browser: Arc<dyn Browser>,
    authenticator: Box<dyn Authenticator>,
    discoverer: Box<dyn TrackDiscoverer>,
    selectors: Arc<SiteSelectors>,
    timings: Timings,
    download_root: PathBuf,
    stats_file: Option<PathBuf>,
    progress: Arc<dyn ProgressSink>,
    board: Option<Arc<ProgressTracker>>,
    stats: Box<dyn StatsSink>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(
        browser: Arc<dyn Browser>,
        authenticator: Box<dyn Authenticator>,
        discoverer: Box<dyn TrackDiscoverer>,
        selectors: Arc<SiteSelectors>,
        timings: Timings,
        download_root: PathBuf,
    ) -> Self {
        Self {
            browser,
            authenticator,
            discoverer,
            selectors,
            timings,
            download_root,
            stats_file: None,
            progress: Arc::new(NullProgress),
            board: None,
            stats: Box::new(NullStats),
            cancel: CancellationToken::new(),
        }
    }

    /// Report progress to `progress` without a status board
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self.board = None;
        self
    }

    /// Report progress to `tracker` and redraw its board while running
    pub fn with_progress_board(mut self, tracker: Arc<ProgressTracker>) -> Self {
        self.progress = tracker.clone();
        self.board = Some(tracker);
        self
    }

    pub fn with_stats(mut self, stats: Box<dyn StatsSink>) -> Self {
        self.stats = stats;
        self
    }

    /// Write the JSON report here when the session ends
    pub fn with_stats_file(mut self, path: Option<PathBuf>) -> Self {
        self.stats_file = path;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn stats(&self) -> &dyn StatsSink {
        self.stats.as_ref()
    }

    pub fn progress(&self) -> &dyn ProgressSink {
        self.progress.as_ref()
    }

    /// Process `songs` in order; always cleans up before returning
    pub async fn run(&mut self, songs: &[Song]) -> SessionReport {
        let ticker_cancel = self.cancel.child_token();
        let ticker = self
            .board
            .clone()
            .map(|board| board.spawn_ticker(self.timings.progress_tick, ticker_cancel.clone()));

        let mut report = SessionReport::default();
        self.run_songs(songs, &mut report).await;

        self.shutdown(ticker, ticker_cancel).await;
        report
    }

    async fn run_songs(&mut self, songs: &[Song], report: &mut SessionReport) {
        report.logged_in = self.authenticator.ensure_logged_in().await;
        if !report.logged_in {
            error!("Login failed, no songs processed");
            return;
        }

        for (position, song) in songs.iter().enumerate() {
            if self.cancel.is_cancelled() {
                warn!(remaining = songs.len() - position, "Session cancelled");
                report.cancelled = true;
                return;
            }

            info!(
                song = %song.display_name,
                key = song.key_adjustment,
                progress = format!("{}/{}", position + 1, songs.len()),
                "Song started"
            );
            self.run_song(song, report).await;
            report.songs_processed += 1;
        }
    }

    async fn run_song(&mut self, song: &Song, report: &mut SessionReport) {
        let folder = self.download_root.join(&song.folder_name);
        if let Err(e) = std::fs::create_dir_all(&folder) {
            error!(song = %song.display_name, folder = %folder.display(), "Cannot create song folder: {}", e);
            return;
        }
        if let Err(e) = self.browser.set_download_dir(&folder).await {
            error!(song = %song.display_name, "Cannot redirect downloads: {}", e);
            return;
        }

        let tracks = self.discoverer.discover(&song.url).await;
        self.stats.song_started(song, tracks.len());
        if tracks.is_empty() {
            warn!(song = %song.display_name, "No tracks found, song skipped");
            self.stats.song_finished(song);
            return;
        }

        for track in &tracks {
            self.progress.register_track(TrackJob::new(song.clone(), track.clone()));
        }

        // Set once the song can no longer produce correctly named stems
        let mut song_ended = None;
        let mixer = MixerControl::new(&*self.browser, &self.selectors, &self.timings);
        if let Err(e) = mixer.apply_key(song.key_adjustment).await {
            error!(
                song = %song.display_name,
                key = song.key_adjustment,
                "Key adjustment failed, song skipped: {}",
                e
            );
            song_ended = Some(FailureKind::KeyNotApplied);
        }

        let ctx = PipelineContext {
            browser: &*self.browser,
            selectors: &self.selectors,
            timings: &self.timings,
            progress: &*self.progress,
        };
        let pipeline = TrackPipeline::new(ctx);

        for track in &tracks {
            if let Some(kind) = song_ended {
                skip_track(&*self.progress, self.stats.as_mut(), song, track, kind);
                report.attempted += 1;
                report.failed += 1;
                continue;
            }
            if self.cancel.is_cancelled() {
                warn!(song = %song.display_name, "Cancelled between tracks");
                report.cancelled = true;
                break;
            }

            let result = pipeline.run(song, track, &folder, self.stats.as_mut()).await;
            report.attempted += 1;
            if result.is_success() {
                report.completed += 1;
            } else {
                report.failed += 1;
            }

            if result.is_song_fatal() {
                warn!(song = %song.display_name, "Song not purchased, skipping its remaining tracks");
                song_ended = Some(FailureKind::Skipped);
            }
        }

        self.stats.song_finished(song);
    }

    async fn shutdown(&mut self, ticker: Option<JoinHandle<()>>, ticker_cancel: CancellationToken) {
        ticker_cancel.cancel();
        if let Some(ticker) = ticker {
            if let Err(e) = tokio::time::timeout(Duration::from_secs(2), ticker).await {
                warn!("Progress ticker did not stop: {}", e);
            }
        }

        if let Err(e) = self.browser.quit().await {
            warn!("Browser quit failed: {}", e);
        }

        self.stats.finish();
        if let Some(path) = &self.stats_file {
            if let Err(e) = self.stats.write_report(path) {
                error!(path = %path.display(), "Writing stats failed: {}", e);
            }
        }
    }
}

fn skip_track(progress: &dyn ProgressSink, stats: &mut dyn StatsSink, song: &Song, track: &Track, kind: FailureKind) {
    let key = JobKey::new(song, track);
    if let Err(e) = progress.update_track_status(&key, TrackStatus::Failed, Some(kind.description().to_string())) {
        warn!(job = %key, "Progress update rejected: {}", e);
    }
    stats.record_track(song, TrackRecord::failure(track, Duration::ZERO, kind, kind.description()));
    info!(song = %song.display_name, track = %track.name, "Track skipped");
}
