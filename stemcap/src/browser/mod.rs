//! Browser collaborator contract
//!
//! The capture pipeline drives the site exclusively through this trait. It is
//! semantically a single-threaded, blocking driver: callers await every call
//! before issuing the next one, and only the pipeline's task ever owns it.
//!
//! [`webdriver::WebDriverBrowser`] is the production implementation.

pub mod webdriver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::error::{BrowserError, BrowserResult};

pub use webdriver::{WebDriverBrowser, WebDriverOptions};

/// W3C identifier key for element references passed to scripts
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52f-4cbb6f8ae1a7";

/// Element locator
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "using", content = "value", rename_all = "snake_case")]
pub enum Selector {
    Css(String),
    Xpath(String),
}

impl Selector {
    pub fn css(value: impl Into<String>) -> Self {
        Selector::Css(value.into())
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Selector::Xpath(value.into())
    }

    /// WebDriver location strategy name
    pub fn strategy(&self) -> &'static str {
        match self {
            Selector::Css(_) => "css selector",
            Selector::Xpath(_) => "xpath",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Selector::Css(v) | Selector::Xpath(v) => v,
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Css(v) => write!(f, "css:{}", v),
            Selector::Xpath(v) => write!(f, "xpath:{}", v),
        }
    }
}

/// Opaque handle to a DOM element, valid until the page changes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

impl ElementRef {
    /// JSON form accepted as a script argument
    pub fn to_script_arg(&self) -> Value {
        serde_json::json!({ ELEMENT_KEY: self.0 })
    }
}

/// Browser automation contract
#[async_trait]
pub trait Browser: Send + Sync {
    /// Navigate the current window
    async fn open(&self, url: &str) -> BrowserResult<()>;

    async fn current_url(&self) -> BrowserResult<String>;

    async fn page_source(&self) -> BrowserResult<String>;

    async fn window_handles(&self) -> BrowserResult<Vec<String>>;

    async fn current_window(&self) -> BrowserResult<String>;

    async fn switch_window(&self, handle: &str) -> BrowserResult<()>;

    /// Close the current window; the caller must switch to a surviving handle
    async fn close_window(&self) -> BrowserResult<()>;

    async fn find_elements(&self, selector: &Selector) -> BrowserResult<Vec<ElementRef>>;

    /// First match, `None` when absent
    async fn find_element(&self, selector: &Selector) -> BrowserResult<Option<ElementRef>> {
        Ok(self.find_elements(selector).await?.into_iter().next())
    }

    async fn find_child_elements(
        &self,
        parent: &ElementRef,
        selector: &Selector,
    ) -> BrowserResult<Vec<ElementRef>>;

    async fn find_child(&self, parent: &ElementRef, selector: &Selector) -> BrowserResult<Option<ElementRef>> {
        Ok(self.find_child_elements(parent, selector).await?.into_iter().next())
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> BrowserResult<Option<String>>;

    async fn text(&self, element: &ElementRef) -> BrowserResult<String>;

    async fn is_displayed(&self, element: &ElementRef) -> BrowserResult<bool>;

    async fn is_enabled(&self, element: &ElementRef) -> BrowserResult<bool>;

    async fn click(&self, element: &ElementRef) -> BrowserResult<()>;

    async fn send_keys(&self, element: &ElementRef, text: &str) -> BrowserResult<()>;

    /// Run a synchronous script; element arguments use [`ElementRef::to_script_arg`]
    async fn execute_script(&self, script: &str, args: Vec<Value>) -> BrowserResult<Value>;

    /// Direct subsequent downloads into `path`
    async fn set_download_dir(&self, path: &Path) -> BrowserResult<()>;

    /// Release the browser session
    async fn quit(&self) -> BrowserResult<()>;
}

/// Whether an element's class attribute carries one of `classes`
pub async fn has_any_class(browser: &dyn Browser, element: &ElementRef, classes: &[String]) -> BrowserResult<bool> {
    let class_attr = browser.attribute(element, "class").await?.unwrap_or_default();
    Ok(class_attr
        .split_whitespace()
        .any(|c| classes.iter().any(|wanted| wanted == c)))
}

/// Scroll an element into view and click it, falling back to a scripted click
/// when an overlay intercepts the native one
pub async fn click_with_fallback(browser: &dyn Browser, element: &ElementRef) -> BrowserResult<()> {
    if let Err(e) = browser
        .execute_script(
            "arguments[0].scrollIntoView({block: 'center', inline: 'center'});",
            vec![element.to_script_arg()],
        )
        .await
    {
        tracing::debug!("scrollIntoView failed: {}", e);
    }

    match browser.click(element).await {
        Ok(()) => Ok(()),
        Err(BrowserError::ClickIntercepted(reason)) => {
            tracing::debug!("Native click intercepted ({}), using scripted click", reason);
            browser
                .execute_script("arguments[0].click();", vec![element.to_script_arg()])
                .await?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// First displayed element matching any selector, in list order
pub async fn first_displayed(browser: &dyn Browser, selectors: &[Selector]) -> BrowserResult<Option<ElementRef>> {
    for selector in selectors {
        for element in browser.find_elements(selector).await? {
            if browser.is_displayed(&element).await.unwrap_or(false) {
                return Ok(Some(element));
            }
        }
    }
    Ok(None)
}

/// Poll `predicate` every `poll` until it yields `true` or `timeout` elapses
///
/// Returns whether the predicate was satisfied. Errors from the predicate
/// count as "not yet".
pub async fn wait_for<F, Fut>(timeout: Duration, poll: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BrowserResult<bool>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        match predicate().await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => tracing::debug!("wait_for predicate error: {}", e),
        }

        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        sleep(poll.min(deadline - now)).await;
    }
}
