//! Error types for stemcap
//!
//! Browser failures are the only errors the capture services propagate; every
//! per-track failure is reported as a `DownloadOutcome` value instead.

use thiserror::Error;

/// Errors raised by a [`crate::browser::Browser`] implementation
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Transport failure talking to the WebDriver endpoint
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebDriver returned an error payload
    #[error("WebDriver error ({error}): {message}")]
    WebDriver { error: String, message: String },

    /// Element lookup that must succeed found nothing
    #[error("No such element: {0}")]
    NoSuchElement(String),

    /// Click landed on an overlay instead of the target
    #[error("Click intercepted: {0}")]
    ClickIntercepted(String),

    /// Element detached from the DOM between lookup and use
    #[error("Stale element: {0}")]
    StaleElement(String),

    /// Unexpected response shape
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Bounded wait expired
    #[error("Timed out: {0}")]
    Timeout(String),
}

impl BrowserError {
    /// Map a W3C error code to the matching variant
    pub fn from_webdriver(error: &str, message: &str) -> Self {
        match error {
            "no such element" => BrowserError::NoSuchElement(message.to_string()),
            "element click intercepted" | "element not interactable" => {
                BrowserError::ClickIntercepted(message.to_string())
            }
            "stale element reference" => BrowserError::StaleElement(message.to_string()),
            "timeout" | "script timeout" => BrowserError::Timeout(message.to_string()),
            _ => BrowserError::WebDriver {
                error: error.to_string(),
                message: message.to_string(),
            },
        }
    }
}

/// Result type for browser operations
pub type BrowserResult<T> = Result<T, BrowserError>;
