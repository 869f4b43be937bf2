//! Mixer track discovery

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use stemcap_common::Track;
use tracing::{debug, info, warn};

use crate::browser::{wait_for, Browser, ElementRef};
use crate::error::BrowserResult;
use crate::selectors::SiteSelectors;
use crate::timings::Timings;

/// Enumerates the mixer tracks of a song page
#[async_trait]
pub trait TrackDiscoverer: Send + Sync {
    /// Tracks in page order; empty when the page is inaccessible
    async fn discover(&self, song_url: &str) -> Vec<Track>;
}

/// Reads track rows from the live page
pub struct PageTrackDiscoverer {
    browser: Arc<dyn Browser>,
    selectors: Arc<SiteSelectors>,
    timings: Timings,
}

impl PageTrackDiscoverer {
    pub fn new(browser: Arc<dyn Browser>, selectors: Arc<SiteSelectors>, timings: Timings) -> Self {
        Self {
            browser,
            selectors,
            timings,
        }
    }

    async fn read_track(&self, row: &ElementRef) -> BrowserResult<Option<Track>> {
        let index = match self
            .browser
            .attribute(row, &self.selectors.track_index_attribute)
            .await?
        {
            Some(index) if !index.trim().is_empty() => index.trim().to_string(),
            _ => return Ok(None),
        };

        let caption = match self.browser.find_child(row, &self.selectors.caption()).await? {
            Some(el) => self.browser.text(&el).await?.trim().to_string(),
            None => String::new(),
        };
        let name = if caption.is_empty() {
            format!("Track {}", index)
        } else {
            caption
        };

        Ok(Some(Track::new(index, name)))
    }

    async fn read_tracks(&self) -> BrowserResult<Vec<Track>> {
        let rows = self.browser.find_elements(&self.selectors.track_rows()).await?;
        let mut seen = HashSet::new();
        let mut tracks = Vec::with_capacity(rows.len());

        for row in &rows {
            match self.read_track(row).await? {
                Some(track) if seen.insert(track.index.clone()) => tracks.push(track),
                Some(track) => debug!(index = %track.index, "Duplicate track index ignored"),
                None => debug!("Track row without index ignored"),
            }
        }
        Ok(tracks)
    }
}

#[async_trait]
impl TrackDiscoverer for PageTrackDiscoverer {
    async fn discover(&self, song_url: &str) -> Vec<Track> {
        if let Err(e) = self.browser.open(song_url).await {
            warn!(url = %song_url, "Could not open song page: {}", e);
            return Vec::new();
        }

        let rows = self.selectors.track_rows();
        let browser = &*self.browser;
        let rows_present = wait_for(self.timings.discovery_timeout, self.timings.dom_poll, || {
            let rows = &rows;
            async move { Ok(!browser.find_elements(rows).await?.is_empty()) }
        })
        .await;
        if !rows_present {
            warn!(url = %song_url, "No mixer tracks on page");
            return Vec::new();
        }

        match self.read_tracks().await {
            Ok(tracks) => {
                info!(url = %song_url, count = tracks.len(), "Tracks discovered");
                tracks
            }
            Err(e) => {
                warn!(url = %song_url, "Reading mixer tracks failed: {}", e);
                Vec::new()
            }
        }
    }
}
