//! W3C WebDriver client
//!
//! Talks JSON over HTTP to a running chromedriver (default
//! `http://localhost:9515`). Only the commands the capture pipeline needs are
//! implemented.
//!
//! # Protocol Reference
//! - W3C WebDriver: https://www.w3.org/TR/webdriver2/
//! - Download directory: chromedriver's CDP bridge (`/goog/cdp/execute`) with
//!   `Browser.setDownloadBehavior`

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Browser, ElementRef, Selector, ELEMENT_KEY};
use crate::error::{BrowserError, BrowserResult};

/// Default chromedriver endpoint
pub const DEFAULT_ENDPOINT: &str = "http://localhost:9515";

/// Default timeout for a single WebDriver command
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Session creation options
#[derive(Debug, Clone)]
pub struct WebDriverOptions {
    pub endpoint: String,
    pub headless: bool,
    /// Initial download directory (changed per song via `set_download_dir`)
    pub download_dir: Option<PathBuf>,
    pub command_timeout: Duration,
}

impl Default for WebDriverOptions {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            headless: false,
            download_dir: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// WebDriver-backed [`Browser`]
pub struct WebDriverBrowser {
    http_client: Client,
    endpoint: String,
    session_id: String,
}

impl WebDriverBrowser {
    /// Create a new browser session
    pub async fn connect(options: WebDriverOptions) -> BrowserResult<Self> {
        let http_client = Client::builder().timeout(options.command_timeout).build()?;
        let endpoint = options.endpoint.trim_end_matches('/').to_string();

        let capabilities = build_capabilities(&options);
        debug!(endpoint = %endpoint, "Creating WebDriver session");

        let response = http_client
            .post(format!("{}/session", endpoint))
            .json(&json!({ "capabilities": capabilities }))
            .send()
            .await?;
        let value = unwrap_response(response).await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Protocol("session response without sessionId".to_string()))?
            .to_string();

        info!(session_id = %session_id, headless = options.headless, "WebDriver session created");

        Ok(Self {
            http_client,
            endpoint,
            session_id,
        })
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> BrowserResult<Value> {
        let url = format!("{}/session/{}{}", self.endpoint, self.session_id, path);
        let mut request = self.http_client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        unwrap_response(response).await
    }

    async fn get(&self, path: &str) -> BrowserResult<Value> {
        self.command(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> BrowserResult<Value> {
        self.command(Method::POST, path, Some(body)).await
    }

    fn element_path(element: &ElementRef, suffix: &str) -> String {
        format!("/element/{}{}", element.0, suffix)
    }
}

fn build_capabilities(options: &WebDriverOptions) -> Value {
    let mut args = vec!["--no-sandbox".to_string(), "--disable-dev-shm-usage".to_string()];
    if options.headless {
        args.push("--headless=new".to_string());
        args.push("--window-size=1920,1080".to_string());
    }

    let mut prefs = json!({
        "download.prompt_for_download": false,
        "download.directory_upgrade": true,
        "safebrowsing.enabled": true,
    });
    if let Some(dir) = &options.download_dir {
        prefs["download.default_directory"] = json!(dir.to_string_lossy());
    }

    json!({
        "alwaysMatch": {
            "browserName": "chrome",
            "goog:chromeOptions": {
                "args": args,
                "prefs": prefs,
            }
        }
    })
}

/// Extract `value` from a WebDriver response, converting error payloads
async fn unwrap_response(response: reqwest::Response) -> BrowserResult<Value> {
    let status = response.status();
    let body: Value = response.json().await?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if !status.is_success() {
        let error = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
        let message = value.get("message").and_then(Value::as_str).unwrap_or_default();
        return Err(BrowserError::from_webdriver(error, message));
    }

    Ok(value)
}

fn parse_elements(value: Value) -> BrowserResult<Vec<ElementRef>> {
    let items = value
        .as_array()
        .ok_or_else(|| BrowserError::Protocol("element list is not an array".to_string()))?;

    items
        .iter()
        .map(|item| {
            item.get(ELEMENT_KEY)
                .and_then(Value::as_str)
                .map(|id| ElementRef(id.to_string()))
                .ok_or_else(|| BrowserError::Protocol(format!("malformed element reference: {}", item)))
        })
        .collect()
}

fn as_string(value: Value) -> BrowserResult<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(BrowserError::Protocol(format!("expected string, got {}", other))),
    }
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn open(&self, url: &str) -> BrowserResult<()> {
        debug!(url = %url, "Navigating");
        self.post("/url", json!({ "url": url })).await?;
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        as_string(self.get("/url").await?)
    }

    async fn page_source(&self) -> BrowserResult<String> {
        as_string(self.get("/source").await?)
    }

    async fn window_handles(&self) -> BrowserResult<Vec<String>> {
        let value = self.get("/window/handles").await?;
        serde_json::from_value(value).map_err(|e| BrowserError::Protocol(e.to_string()))
    }

    async fn current_window(&self) -> BrowserResult<String> {
        as_string(self.get("/window").await?)
    }

    async fn switch_window(&self, handle: &str) -> BrowserResult<()> {
        self.post("/window", json!({ "handle": handle })).await?;
        Ok(())
    }

    async fn close_window(&self) -> BrowserResult<()> {
        self.command(Method::DELETE, "/window", None).await?;
        Ok(())
    }

    async fn find_elements(&self, selector: &Selector) -> BrowserResult<Vec<ElementRef>> {
        let value = self
            .post("/elements", json!({ "using": selector.strategy(), "value": selector.value() }))
            .await?;
        parse_elements(value)
    }

    async fn find_child_elements(&self, parent: &ElementRef, selector: &Selector) -> BrowserResult<Vec<ElementRef>> {
        let path = Self::element_path(parent, "/elements");
        let value = self
            .post(&path, json!({ "using": selector.strategy(), "value": selector.value() }))
            .await?;
        parse_elements(value)
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> BrowserResult<Option<String>> {
        let value = self.get(&Self::element_path(element, &format!("/attribute/{}", name))).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn text(&self, element: &ElementRef) -> BrowserResult<String> {
        as_string(self.get(&Self::element_path(element, "/text")).await?)
    }

    async fn is_displayed(&self, element: &ElementRef) -> BrowserResult<bool> {
        let value = self.get(&Self::element_path(element, "/displayed")).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn is_enabled(&self, element: &ElementRef) -> BrowserResult<bool> {
        let value = self.get(&Self::element_path(element, "/enabled")).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn click(&self, element: &ElementRef) -> BrowserResult<()> {
        self.post(&Self::element_path(element, "/click"), json!({})).await?;
        Ok(())
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> BrowserResult<()> {
        self.post(&Self::element_path(element, "/value"), json!({ "text": text }))
            .await?;
        Ok(())
    }

    async fn execute_script(&self, script: &str, args: Vec<Value>) -> BrowserResult<Value> {
        self.post("/execute/sync", json!({ "script": script, "args": args })).await
    }

    async fn set_download_dir(&self, path: &Path) -> BrowserResult<()> {
        let params = json!({
            "behavior": "allow",
            "downloadPath": path.to_string_lossy(),
        });
        self.post(
            "/goog/cdp/execute",
            json!({ "cmd": "Browser.setDownloadBehavior", "params": params }),
        )
        .await?;
        debug!(dir = %path.display(), "Download directory set");
        Ok(())
    }

    async fn quit(&self) -> BrowserResult<()> {
        match self.command(Method::DELETE, "", None).await {
            Ok(_) => {
                info!(session_id = %self.session_id, "WebDriver session closed");
                Ok(())
            }
            Err(e) => {
                warn!("Failed to close WebDriver session: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_capabilities() {
        let options = WebDriverOptions {
            headless: true,
            download_dir: Some(PathBuf::from("/tmp/stems")),
            ..Default::default()
        };
        let caps = build_capabilities(&options);
        let args = caps["alwaysMatch"]["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(args.iter().any(|a| a == "--headless=new"));
        assert_eq!(
            caps["alwaysMatch"]["goog:chromeOptions"]["prefs"]["download.default_directory"],
            "/tmp/stems"
        );
    }

    #[test]
    fn test_parse_elements() {
        let value = json!([{ ELEMENT_KEY: "a" }, { ELEMENT_KEY: "b" }]);
        let elements = parse_elements(value).unwrap();
        assert_eq!(elements, vec![ElementRef("a".into()), ElementRef("b".into())]);

        assert!(parse_elements(json!([{ "nope": 1 }])).is_err());
        assert!(parse_elements(json!("x")).is_err());
    }
}
