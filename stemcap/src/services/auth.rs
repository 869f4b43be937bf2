//! Site authentication

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::browser::{click_with_fallback, first_displayed, wait_for, Browser};
use crate::error::{BrowserError, BrowserResult};
use crate::selectors::SiteSelectors;
use crate::timings::Timings;

pub const DEFAULT_HOME_URL: &str = "https://www.karaoke-version.com/";
pub const DEFAULT_LOGIN_URL: &str = "https://www.karaoke-version.com/my/login.html";

/// Ensures the browser session is logged in
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Idempotent; may navigate the browser
    async fn ensure_logged_in(&self) -> bool;
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Form-based login against the karaoke site
pub struct SiteAuthenticator {
    browser: Arc<dyn Browser>,
    selectors: Arc<SiteSelectors>,
    timings: Timings,
    credentials: Option<Credentials>,
    home_url: String,
    login_url: String,
}

impl SiteAuthenticator {
    pub fn new(
        browser: Arc<dyn Browser>,
        selectors: Arc<SiteSelectors>,
        timings: Timings,
        credentials: Option<Credentials>,
    ) -> Self {
        Self {
            browser,
            selectors,
            timings,
            credentials,
            home_url: DEFAULT_HOME_URL.to_string(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
        }
    }

    pub fn with_urls(mut self, home_url: impl Into<String>, login_url: impl Into<String>) -> Self {
        self.home_url = home_url.into();
        self.login_url = login_url.into();
        self
    }

    /// Whether any logged-in indicator is on the current page
    pub async fn is_logged_in(&self) -> BrowserResult<bool> {
        for selector in &self.selectors.logged_in_indicators {
            if self.browser.find_element(selector).await?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn submit_login(&self, credentials: &Credentials) -> BrowserResult<()> {
        self.browser.open(&self.login_url).await?;

        let username = first_displayed(&*self.browser, &self.selectors.login_username)
            .await?
            .ok_or_else(|| BrowserError::NoSuchElement("login username field".to_string()))?;
        let password = first_displayed(&*self.browser, &self.selectors.login_password)
            .await?
            .ok_or_else(|| BrowserError::NoSuchElement("login password field".to_string()))?;
        let submit = first_displayed(&*self.browser, &self.selectors.login_submit)
            .await?
            .ok_or_else(|| BrowserError::NoSuchElement("login submit control".to_string()))?;

        self.browser.send_keys(&username, &credentials.username).await?;
        self.browser.send_keys(&password, &credentials.password).await?;
        click_with_fallback(&*self.browser, &submit).await
    }

    /// Click the logout link if one is shown
    pub async fn logout(&self) -> BrowserResult<bool> {
        match first_displayed(&*self.browser, &self.selectors.logout_link).await? {
            Some(link) => {
                click_with_fallback(&*self.browser, &link).await?;
                info!("Logged out");
                Ok(true)
            }
            None => {
                debug!("No logout link, nothing to do");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl Authenticator for SiteAuthenticator {
    async fn ensure_logged_in(&self) -> bool {
        let on_site = self
            .browser
            .current_url()
            .await
            .map(|url| url.starts_with("http"))
            .unwrap_or(false);
        if !on_site {
            if let Err(e) = self.browser.open(&self.home_url).await {
                warn!("Could not open {}: {}", self.home_url, e);
                return false;
            }
        }

        if self.is_logged_in().await.unwrap_or(false) {
            debug!("Already logged in");
            return true;
        }

        let credentials = match &self.credentials {
            Some(credentials) => credentials,
            None => {
                warn!("Not logged in and no credentials configured");
                return false;
            }
        };

        info!(user = %credentials.username, "Logging in");
        if let Err(e) = self.submit_login(credentials).await {
            warn!("Login form submission failed: {}", e);
            return false;
        }

        let logged_in = wait_for(self.timings.login_timeout, self.timings.dom_poll, || self.is_logged_in()).await;
        if logged_in {
            info!("Login confirmed");
        } else {
            warn!(
                timeout_secs = self.timings.login_timeout.as_secs_f64(),
                "Login not confirmed"
            );
        }
        logged_in
    }
}
