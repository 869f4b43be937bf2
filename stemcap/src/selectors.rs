//! Site selector table
//!
//! Every DOM locator the tool uses lives here, ordered by confidence where a
//! list is given. The table can be overridden from a TOML site profile so a
//! site redesign needs no code change:
//!
//! ```toml
//! [selectors]
//! track_row = ".track"
//! solo_active_classes = ["active", "is-active", "selected"]
//! download_button = [
//!     { using = "css", value = "a.download" },
//!     { using = "xpath", value = "//a[contains(., 'Download')]" },
//! ]
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use stemcap_common::{Error, Result};

use crate::browser::Selector;

/// DOM locators for the karaoke site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteSelectors {
    /// CSS selector for one mixer row; rows carry `track_index_attribute`
    pub track_row: String,
    pub track_index_attribute: String,
    /// Solo control, relative to a track row
    pub solo_button: String,
    /// Caption, relative to a track row
    pub track_caption: String,
    /// Class names marking an active solo control
    pub solo_active_classes: Vec<String>,

    /// Key transpose controls
    pub pitch_up: Vec<Selector>,
    pub pitch_down: Vec<Selector>,

    /// Download control candidates, most specific first
    pub download_button: Vec<Selector>,
    /// Any match means the song has not been bought
    pub purchase_indicators: Vec<Selector>,

    /// In-page modal candidates and their close controls
    pub modal_candidates: Vec<Selector>,
    pub modal_close: Vec<Selector>,

    /// Login form
    pub login_username: Vec<Selector>,
    pub login_password: Vec<Selector>,
    pub login_submit: Vec<Selector>,
    /// Any match means a session is logged in
    pub logged_in_indicators: Vec<Selector>,
    pub logout_link: Vec<Selector>,
}

impl Default for SiteSelectors {
    fn default() -> Self {
        Self {
            track_row: ".track".to_string(),
            track_index_attribute: "data-index".to_string(),
            solo_button: "button.track__solo".to_string(),
            track_caption: ".track__caption".to_string(),
            solo_active_classes: vec!["active".to_string(), "is-active".to_string(), "selected".to_string()],

            pitch_up: vec![
                Selector::css("button.pitch__button--up"),
                Selector::css("[data-action='pitch-up']"),
            ],
            pitch_down: vec![
                Selector::css("button.pitch__button--down"),
                Selector::css("[data-action='pitch-down']"),
            ],

            download_button: vec![
                Selector::css("a.download"),
                Selector::css("button.download"),
                Selector::css("[class*='download-button']"),
                Selector::css("a[href*='download']"),
                Selector::xpath("//a[contains(@class, 'download')]"),
                Selector::xpath("//button[contains(@class, 'download')]"),
                Selector::xpath("//a[contains(normalize-space(.), 'Download')]"),
                Selector::xpath("//button[contains(normalize-space(.), 'Download')]"),
                Selector::xpath("//*[self::a or self::button][contains(normalize-space(.), 'MP3')]"),
            ],
            purchase_indicators: vec![
                Selector::xpath("//*[self::a or self::button][contains(normalize-space(.), 'Add to cart')]"),
                Selector::xpath("//*[self::a or self::button][contains(normalize-space(.), 'Buy')]"),
                Selector::css(".price-badge"),
                Selector::css(".song__price"),
            ],

            modal_candidates: vec![
                Selector::css("[class*='modal']"),
                Selector::css("[class*='popup']"),
                Selector::css("[class*='dialog']"),
                Selector::css("[class*='overlay']"),
            ],
            modal_close: vec![
                Selector::css(".close"),
                Selector::css("[class*='close']"),
                Selector::css("[aria-label='Close']"),
                Selector::css("[data-dismiss]"),
            ],

            login_username: vec![Selector::css("#frm_login"), Selector::css("input[name='frm_login']")],
            login_password: vec![
                Selector::css("#frm_password"),
                Selector::css("input[type='password']"),
            ],
            login_submit: vec![
                Selector::css("#sbm"),
                Selector::css("button[type='submit']"),
                Selector::css("input[type='submit']"),
            ],
            logged_in_indicators: vec![
                Selector::css("a[href*='logout']"),
                Selector::css(".user-menu"),
                Selector::xpath("//a[contains(normalize-space(.), 'My Account')]"),
            ],
            logout_link: vec![Selector::css("a[href*='logout']")],
        }
    }
}

impl SiteSelectors {
    /// Selector for the row with a given index
    pub fn track_row_for(&self, index: &str) -> Selector {
        Selector::css(format!(
            "{}[{}=\"{}\"]",
            self.track_row,
            self.track_index_attribute,
            index.replace('"', "\\\"")
        ))
    }

    pub fn track_rows(&self) -> Selector {
        Selector::css(self.track_row.clone())
    }

    pub fn solo(&self) -> Selector {
        Selector::css(self.solo_button.clone())
    }

    pub fn caption(&self) -> Selector {
        Selector::css(self.track_caption.clone())
    }
}

#[derive(Debug, Default, Deserialize)]
struct SiteProfile {
    #[serde(default)]
    selectors: SiteSelectors,
}

/// Load a TOML site profile; absent keys keep their defaults
pub fn load_site_profile(path: &Path) -> Result<SiteSelectors> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read site profile {} failed: {}", path.display(), e)))?;
    parse_site_profile(&content)
}

pub fn parse_site_profile(content: &str) -> Result<SiteSelectors> {
    let profile: SiteProfile =
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse site profile failed: {}", e)))?;
    Ok(profile.selectors)
}
