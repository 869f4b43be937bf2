//! Solo state verification
//!
//! Confirms through the DOM that exactly the expected mixer row is soloed
//! before a download is triggered. Four checks, all required (threshold 1.0):
//!
//! 1. **Element present**: a row with the track's index exists
//! 2. **Solo active**: that row's solo control carries an active class
//! 3. **Mutual exclusivity**: exactly one solo control on the page is active
//! 4. **Caption match**: normalized caption and expected name contain one another
//!
//! Failures are retried a bounded number of times to ride out animations and
//! late DOM updates. An advisory audio-mix check reads the page's mixer object
//! instead of the DOM; it is used for diagnostics only.

use serde::Deserialize;
use stemcap_common::Track;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::{has_any_class, Browser};
use crate::error::BrowserResult;
use crate::selectors::SiteSelectors;
use crate::timings::Timings;

/// All four DOM checks must pass
pub const STRICT_THRESHOLD: f64 = 1.0;

/// Advisory audio-mix check threshold
pub const MIX_THRESHOLD: f64 = 0.67;

/// Reads per-track volumes from the page's in-memory mixer, if exposed
const MIXER_STATE_SCRIPT: &str = r#"
const mixer = window.mixer || window.Mixer || (window.app && window.app.mixer) || null;
if (!mixer || !mixer.tracks) { return null; }
const tracks = Array.isArray(mixer.tracks) ? mixer.tracks : Object.values(mixer.tracks);
return tracks.map((t, i) => ({
    index: String(t.index !== undefined ? t.index : i),
    volume: Number(t.volume !== undefined ? t.volume : (t.gain !== undefined ? t.gain : 0)),
    muted: !!t.muted,
}));
"#;

/// Result of one DOM verification pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SoloCheck {
    pub element_present: bool,
    pub solo_active: bool,
    pub exclusive: bool,
    pub caption_match: bool,
    /// Number of active solo controls on the page
    pub active_count: usize,
    pub caption: Option<String>,
}

impl SoloCheck {
    pub fn score(&self) -> f64 {
        let passed = [self.element_present, self.solo_active, self.exclusive, self.caption_match]
            .iter()
            .filter(|b| **b)
            .count();
        passed as f64 / 4.0
    }

    pub fn passed(&self) -> bool {
        self.score() >= STRICT_THRESHOLD
    }
}

/// Advisory audio-mix verification result
#[derive(Debug, Clone, PartialEq)]
pub struct MixCheck {
    pub expected_audible: bool,
    pub others_silent: bool,
    pub single_audible: bool,
}

impl MixCheck {
    pub fn score(&self) -> f64 {
        let passed = [self.expected_audible, self.others_silent, self.single_audible]
            .iter()
            .filter(|b| **b)
            .count();
        passed as f64 / 3.0
    }

    pub fn passed(&self) -> bool {
        self.score() >= MIX_THRESHOLD
    }
}

#[derive(Debug, Deserialize)]
struct MixerTrackState {
    index: String,
    volume: f64,
    #[serde(default)]
    muted: bool,
}

impl MixerTrackState {
    fn audible(&self) -> bool {
        !self.muted && self.volume > 0.0
    }
}

/// Lowercase, `_`/`-` → space, collapsed whitespace
pub fn normalize_caption(text: &str) -> String {
    text.to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Caption and expected name match when either contains the other
pub fn caption_matches(caption: &str, expected: &str) -> bool {
    let caption = normalize_caption(caption);
    let expected = normalize_caption(expected);
    if caption.is_empty() || expected.is_empty() {
        return false;
    }
    caption.contains(&expected) || expected.contains(&caption)
}

/// DOM-level solo verifier
pub struct SoloValidator<'a> {
    browser: &'a dyn Browser,
    selectors: &'a SiteSelectors,
    timings: &'a Timings,
}

impl<'a> SoloValidator<'a> {
    pub fn new(browser: &'a dyn Browser, selectors: &'a SiteSelectors, timings: &'a Timings) -> Self {
        Self {
            browser,
            selectors,
            timings,
        }
    }

    /// One verification pass without retries
    pub async fn check_once(&self, track: &Track) -> BrowserResult<SoloCheck> {
        let mut check = SoloCheck::default();

        let row = self.browser.find_element(&self.selectors.track_row_for(&track.index)).await?;
        let row = match row {
            Some(row) => row,
            None => return Ok(check),
        };
        check.element_present = true;

        if let Some(solo) = self.browser.find_child(&row, &self.selectors.solo()).await? {
            check.solo_active = has_any_class(self.browser, &solo, &self.selectors.solo_active_classes).await?;
        }

        for solo in self.browser.find_elements(&self.selectors.solo()).await? {
            if has_any_class(self.browser, &solo, &self.selectors.solo_active_classes).await? {
                check.active_count += 1;
            }
        }
        check.exclusive = check.active_count == 1 && check.solo_active;

        if let Some(caption_el) = self.browser.find_child(&row, &self.selectors.caption()).await? {
            let caption = self.browser.text(&caption_el).await?;
            check.caption_match = caption_matches(&caption, &track.name);
            check.caption = Some(caption);
        }

        Ok(check)
    }

    /// Verify with bounded retries; `true` only when a pass scores 1.0
    pub async fn verify(&self, track: &Track) -> bool {
        let attempts = self.timings.solo_attempts.max(1);

        for attempt in 1..=attempts {
            match self.check_once(track).await {
                Ok(check) if check.passed() => {
                    debug!(track = %track.name, attempt, "Solo verified");
                    return true;
                }
                Ok(check) => {
                    info!(
                        track = %track.name,
                        index = %track.index,
                        attempt,
                        score = check.score(),
                        present = check.element_present,
                        active = check.solo_active,
                        active_count = check.active_count,
                        caption = ?check.caption,
                        "Solo verification failed"
                    );
                }
                Err(e) => {
                    warn!(track = %track.name, attempt, "Solo verification error: {}", e);
                }
            }

            if attempt < attempts {
                sleep(self.timings.solo_retry_delay).await;
            }
        }

        false
    }

    /// Advisory check against the page's mixer object
    ///
    /// `Ok(None)` when the page exposes no mixer state.
    pub async fn verify_audio_mix(&self, track: &Track) -> BrowserResult<Option<MixCheck>> {
        let value = self.browser.execute_script(MIXER_STATE_SCRIPT, Vec::new()).await?;
        if value.is_null() {
            return Ok(None);
        }

        let states: Vec<MixerTrackState> = match serde_json::from_value(value) {
            Ok(states) => states,
            Err(e) => {
                debug!("Unexpected mixer state shape: {}", e);
                return Ok(None);
            }
        };

        let audible: Vec<&MixerTrackState> = states.iter().filter(|s| s.audible()).collect();
        let check = MixCheck {
            expected_audible: audible.iter().any(|s| s.index == track.index),
            others_silent: audible.iter().all(|s| s.index == track.index),
            single_audible: audible.len() == 1,
        };
        Ok(Some(check))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_caption_normalization() {
        assert_eq!(normalize_caption("Lead_Vocal - Harmony"), "lead vocal harmony");
        assert!(caption_matches("Bass", "bass"));
        assert!(caption_matches("Electric_Guitar", "Electric Guitar (Rhythm)"));
        assert!(caption_matches("Drum Kit Full", "drum-kit"));
        assert!(!caption_matches("Drums", "Bass"));
        assert!(!caption_matches("", "Bass"));
    }

    #[test]
    fn test_strict_threshold_requires_all_checks() {
        let mut check = SoloCheck {
            element_present: true,
            solo_active: true,
            exclusive: true,
            caption_match: true,
            active_count: 1,
            caption: Some("Bass".into()),
        };
        assert!(check.passed());
        check.exclusive = false;
        assert_eq!(check.score(), 0.75);
        assert!(!check.passed());
    }

    #[test]
    fn test_mix_threshold() {
        let check = MixCheck {
            expected_audible: true,
            others_silent: true,
            single_audible: false,
        };
        assert!(check.passed());
        let check = MixCheck {
            expected_audible: true,
            others_silent: false,
            single_audible: false,
        };
        assert!(!check.passed());
    }

    #[test]
    fn test_mixer_state_audibility() {
        let states: Vec<MixerTrackState> = serde_json::from_value(json!([
            { "index": "0", "volume": 1.0 },
            { "index": "1", "volume": 0.0 },
            { "index": "2", "volume": 0.8, "muted": true },
        ]))
        .unwrap();
        let audible: Vec<&str> = states.iter().filter(|s| s.audible()).map(|s| s.index.as_str()).collect();
        assert_eq!(audible, vec!["0"]);
    }
}
