//! Mixer control
//!
//! Drives the site's mixer: soloing one track row at a time and transposing
//! the song key. The solo state is a single shared value in the page, so every
//! other active solo is cleared before the target is clicked.

use stemcap_common::Track;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::browser::{click_with_fallback, first_displayed, has_any_class, Browser};
use crate::error::{BrowserError, BrowserResult};
use crate::selectors::SiteSelectors;
use crate::timings::Timings;

pub struct MixerControl<'a> {
    browser: &'a dyn Browser,
    selectors: &'a SiteSelectors,
    timings: &'a Timings,
}

impl<'a> MixerControl<'a> {
    pub fn new(browser: &'a dyn Browser, selectors: &'a SiteSelectors, timings: &'a Timings) -> Self {
        Self {
            browser,
            selectors,
            timings,
        }
    }

    /// Solo `track`, clearing any other active solo first
    pub async fn solo_track(&self, track: &Track) -> BrowserResult<()> {
        let row = self
            .browser
            .find_element(&self.selectors.track_row_for(&track.index))
            .await?
            .ok_or_else(|| BrowserError::NoSuchElement(format!("track row {}", track.index)))?;
        let target = self
            .browser
            .find_child(&row, &self.selectors.solo())
            .await?
            .ok_or_else(|| BrowserError::NoSuchElement(format!("solo control for track {}", track.index)))?;

        let mut target_active = false;
        for solo in self.browser.find_elements(&self.selectors.solo()).await? {
            if !has_any_class(self.browser, &solo, &self.selectors.solo_active_classes).await? {
                continue;
            }
            if solo == target {
                target_active = true;
                continue;
            }
            debug!("Clearing foreign active solo");
            click_with_fallback(self.browser, &solo).await?;
        }

        if !target_active {
            click_with_fallback(self.browser, &target).await?;
        }

        sleep(self.timings.solo_settle).await;
        debug!(track = %track.name, index = %track.index, "Solo toggled");
        Ok(())
    }

    /// Transpose by `offset` semitones; a no-op for 0
    ///
    /// Returns the number of clicks delivered. A missing pitch control is an
    /// error: files named with a key suffix must really be transposed.
    pub async fn apply_key(&self, offset: i8) -> BrowserResult<u32> {
        if offset == 0 {
            return Ok(0);
        }

        let candidates = if offset > 0 {
            &self.selectors.pitch_up
        } else {
            &self.selectors.pitch_down
        };
        let control = match first_displayed(self.browser, candidates).await? {
            Some(control) => control,
            None => {
                return Err(BrowserError::NoSuchElement(format!(
                    "pitch {} control",
                    if offset > 0 { "up" } else { "down" }
                )))
            }
        };

        let clicks = u32::from(offset.unsigned_abs());
        for _ in 0..clicks {
            click_with_fallback(self.browser, &control).await?;
            sleep(self.timings.pitch_click_delay).await;
        }

        info!(offset, clicks, "Key adjusted");
        Ok(clicks)
    }
}
