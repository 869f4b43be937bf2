//! Download control actuator
//!
//! Finds the "download current mix" control, clicks it and absorbs whatever
//! the site throws up afterwards (new windows, in-page modals). It does not
//! check that a download actually starts; the monitor does that.

use crate::browser::{click_with_fallback, wait_for, Browser, ElementRef};
use crate::error::BrowserResult;
use crate::selectors::SiteSelectors;
use crate::timings::Timings;
use tracing::{debug, info, warn};

/// Page source markers of a server-side render in progress
const RENDER_MARKERS: &[&str] = &["generating", "preparing"];

/// Popup content that identifies a download-related window
const DOWNLOAD_KEYWORDS: &[&str] = &["download", "generating", "preparing", "your file", "custom backing track"];

const HIDE_SCRIPT: &str = "arguments[0].style.display = 'none';";

/// Result of looking for the download control
#[derive(Debug, Clone, PartialEq)]
pub enum Located {
    Found(ElementRef),
    /// Purchase controls present, or mixer rows without any download control
    NotPurchased,
    Missing,
}

/// What happened after the click
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClickReport {
    /// A window, URL or page-source change was seen after the click
    pub reaction_seen: bool,
    pub windows_closed: usize,
    pub modals_dismissed: usize,
}

pub struct DownloadActuator<'a> {
    browser: &'a dyn Browser,
    selectors: &'a SiteSelectors,
    timings: &'a Timings,
}

impl<'a> DownloadActuator<'a> {
    pub fn new(browser: &'a dyn Browser, selectors: &'a SiteSelectors, timings: &'a Timings) -> Self {
        Self {
            browser,
            selectors,
            timings,
        }
    }

    /// Try the selector list in order; the first visible and enabled match wins
    pub async fn locate(&self) -> BrowserResult<Located> {
        for selector in &self.selectors.download_button {
            for element in self.browser.find_elements(selector).await? {
                let displayed = self.browser.is_displayed(&element).await.unwrap_or(false);
                let enabled = self.browser.is_enabled(&element).await.unwrap_or(false);
                if displayed && enabled {
                    debug!(selector = %selector, "Download control located");
                    return Ok(Located::Found(element));
                }
            }
        }

        for selector in &self.selectors.purchase_indicators {
            if self.browser.find_element(selector).await?.is_some() {
                info!(selector = %selector, "Purchase indicator present");
                return Ok(Located::NotPurchased);
            }
        }

        if !self.browser.find_elements(&self.selectors.track_rows()).await?.is_empty() {
            info!("Mixer rows present without a download control");
            return Ok(Located::NotPurchased);
        }

        Ok(Located::Missing)
    }

    /// Click the control and clean up popups
    ///
    /// Only a failed click is an error; popup handling problems are logged.
    pub async fn click_and_absorb(&self, control: &ElementRef) -> BrowserResult<ClickReport> {
        let original_window = self.browser.current_window().await?;
        let handles_before = self.browser.window_handles().await?;
        let url_before = self.browser.current_url().await.unwrap_or_default();

        click_with_fallback(self.browser, control).await?;
        info!("Download control clicked");

        let mut report = ClickReport {
            reaction_seen: self.wait_for_reaction(handles_before.len(), &url_before).await,
            ..ClickReport::default()
        };

        match self.close_new_windows(&original_window, &handles_before).await {
            Ok(closed) => report.windows_closed = closed,
            Err(e) => {
                warn!("Popup window handling failed: {}", e);
                if let Err(e) = self.browser.switch_window(&original_window).await {
                    warn!("Could not return to the original window: {}", e);
                }
            }
        }

        match self.dismiss_modals().await {
            Ok(dismissed) => report.modals_dismissed = dismissed,
            Err(e) => warn!("Modal handling failed: {}", e),
        }

        Ok(report)
    }

    async fn wait_for_reaction(&self, window_count: usize, url_before: &str) -> bool {
        let browser = self.browser;
        wait_for(self.timings.post_click_wait, self.timings.dom_poll, || async move {
            if browser.window_handles().await?.len() != window_count {
                return Ok(true);
            }
            if browser.current_url().await? != url_before {
                return Ok(true);
            }
            let source = browser.page_source().await?.to_lowercase();
            Ok(RENDER_MARKERS.iter().any(|m| source.contains(m)))
        })
        .await
    }

    async fn close_new_windows(&self, original: &str, handles_before: &[String]) -> BrowserResult<usize> {
        let mut closed = 0;
        for handle in self.browser.window_handles().await? {
            if handles_before.contains(&handle) {
                continue;
            }

            self.browser.switch_window(&handle).await?;
            let source = self.browser.page_source().await.unwrap_or_default().to_lowercase();
            if DOWNLOAD_KEYWORDS.iter().any(|k| source.contains(k)) {
                debug!(window = %handle, "Closing download popup window");
            } else {
                debug!(window = %handle, "Closing unrelated popup window");
            }
            self.browser.close_window().await?;
            closed += 1;
        }

        if closed > 0 {
            self.browser.switch_window(original).await?;
        }
        Ok(closed)
    }

    async fn dismiss_modals(&self) -> BrowserResult<usize> {
        let mut dismissed = 0;
        for selector in &self.selectors.modal_candidates {
            for modal in self.browser.find_elements(selector).await? {
                if !self.browser.is_displayed(&modal).await.unwrap_or(false) {
                    continue;
                }

                if self.close_modal(&modal).await? {
                    debug!(selector = %selector, "Modal closed");
                } else {
                    self.browser.execute_script(HIDE_SCRIPT, vec![modal.to_script_arg()]).await?;
                    debug!(selector = %selector, "Modal hidden");
                }
                dismissed += 1;
            }
        }
        Ok(dismissed)
    }

    async fn close_modal(&self, modal: &ElementRef) -> BrowserResult<bool> {
        for selector in &self.selectors.modal_close {
            for close in self.browser.find_child_elements(modal, selector).await? {
                if self.browser.is_displayed(&close).await.unwrap_or(false) {
                    click_with_fallback(self.browser, &close).await?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
