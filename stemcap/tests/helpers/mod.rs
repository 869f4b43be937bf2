//! Test Helper Utilities
//!
//! Shared utilities for testing stemcap

#![allow(dead_code)]

pub mod fake_browser;

pub use fake_browser::{DownloadPlan, FakeBrowser, FakePage, FakeTrack};

use async_trait::async_trait;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use stemcap::services::{Authenticator, TrackDiscoverer};
use stemcap::Timings;
use stemcap_common::{Song, Track};

pub const DEMO_URL: &str = "https://www.karaoke-version.com/custombackingtrack/demo-artist/demo.html";
pub const OTHER_URL: &str = "https://www.karaoke-version.com/custombackingtrack/demo-artist/other.html";

/// Every wait shrunk to milliseconds
pub fn fast_timings() -> Timings {
    Timings {
        solo_attempts: 2,
        solo_retry_delay: Duration::from_millis(10),
        solo_settle: Duration::ZERO,
        pitch_click_delay: Duration::ZERO,
        post_click_wait: Duration::from_millis(30),
        dom_poll: Duration::from_millis(10),
        start_timeout: Duration::from_secs(2),
        start_poll: Duration::from_millis(20),
        initial_wait: Duration::from_millis(50),
        default_poll: Duration::from_millis(20),
        active_poll: Duration::from_millis(20),
        imminent_poll: Duration::from_millis(10),
        completion_timeout: Duration::from_secs(3),
        recent_window: Duration::from_secs(300),
        scan_ttl: Duration::ZERO,
        discovery_timeout: Duration::from_millis(200),
        login_timeout: Duration::from_millis(200),
        progress_tick: Duration::from_millis(20),
    }
}

pub fn song(url: &str, name: &str, key: i8) -> Song {
    Song::new(url, name, key).unwrap()
}

/// Minimal ID3-tagged payload
pub fn mp3_bytes() -> Vec<u8> {
    let mut bytes = b"ID3\x03\x00\x00\x00\x00\x00\x00".to_vec();
    bytes.extend(std::iter::repeat(0xAA).take(64));
    bytes
}

pub fn write_file(dir: &Path, name: &str, content: &[u8]) {
    std::fs::write(dir.join(name), content).unwrap();
}

/// Sorted file names in `dir`
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

/// Authenticator with a fixed answer
pub struct StaticAuth(pub bool);

#[async_trait]
impl Authenticator for StaticAuth {
    async fn ensure_logged_in(&self) -> bool {
        self.0
    }
}

/// Discoverer returning canned tracks per URL and recording every call
#[derive(Default)]
pub struct StaticDiscoverer {
    tracks: Vec<(String, Vec<Track>)>,
    calls: Mutex<Vec<String>>,
}

impl StaticDiscoverer {
    pub fn with(mut self, url: &str, tracks: &[(&str, &str)]) -> Self {
        self.tracks.push((
            url.to_string(),
            tracks.iter().map(|(i, n)| Track::new(*i, *n)).collect(),
        ));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrackDiscoverer for StaticDiscoverer {
    async fn discover(&self, song_url: &str) -> Vec<Track> {
        self.calls.lock().unwrap().push(song_url.to_string());
        self.tracks
            .iter()
            .find(|(url, _)| url == song_url)
            .map(|(_, tracks)| tracks.clone())
            .unwrap_or_default()
    }
}
