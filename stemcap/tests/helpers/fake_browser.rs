//! In-memory browser modelling the karaoke site's mixer page
//!
//! Elements are plain string ids (`row:0`, `solo:0`, `caption:0`,
//! `download`, ...). Lookups match against the default selector table, so
//! anything the code under test asks for outside that table finds nothing.
//! Clicking the download control schedules a "server render" that writes the
//! planned file into the current download directory after a delay.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use stemcap::browser::{Browser, ElementRef, Selector, ELEMENT_KEY};
use stemcap::error::{BrowserError, BrowserResult};
use stemcap::selectors::SiteSelectors;

pub const MAIN_WINDOW: &str = "main";
pub const POPUP_SOURCE: &str = "<html><body>Your file is being generated</body></html>";

/// Maps the caption of the soloed track (or `Mix`) to the downloaded file name
pub type NameFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Debug, Clone)]
pub struct FakeTrack {
    pub index: String,
    pub caption: String,
    pub solo: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakePage {
    pub tracks: Vec<FakeTrack>,
    pub download_button: bool,
    pub purchase_indicator: bool,
    pub modal: bool,
    pub popup_on_download: bool,
    /// Track indexes whose solo control ignores clicks
    pub broken_solo: Vec<String>,
    /// Track indexes whose solo drops as soon as the download control is looked up
    pub solo_drops_on_locate: Vec<String>,
    pub pitch_controls: bool,
}

impl FakePage {
    /// Purchased song with the given `(index, caption)` rows
    pub fn mixer(tracks: &[(&str, &str)]) -> Self {
        Self {
            tracks: tracks
                .iter()
                .map(|(index, caption)| FakeTrack {
                    index: index.to_string(),
                    caption: caption.to_string(),
                    solo: false,
                })
                .collect(),
            download_button: true,
            pitch_controls: true,
            ..Self::default()
        }
    }

    /// Mixer rows with "Add to cart" and no download control
    pub fn not_purchased(tracks: &[(&str, &str)]) -> Self {
        Self {
            download_button: false,
            purchase_indicator: true,
            ..Self::mixer(tracks)
        }
    }
}

#[derive(Clone)]
pub struct DownloadPlan {
    pub name: NameFn,
    /// Server render time before anything lands on disk
    pub delay: Duration,
    /// Time spent as a `.crdownload` file, if any
    pub partial_for: Option<Duration>,
    pub content: Vec<u8>,
}

impl DownloadPlan {
    pub fn named(name: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            name: Arc::new(name),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_partial(mut self, partial_for: Duration) -> Self {
        self.partial_for = Some(partial_for);
        self
    }

    pub fn with_content(mut self, content: Vec<u8>) -> Self {
        self.content = content;
        self
    }
}

impl Default for DownloadPlan {
    fn default() -> Self {
        Self {
            name: Arc::new(|caption: &str| format!("Demo({}_Custom_Backing_Track).mp3", caption.replace(' ', "_"))),
            delay: Duration::from_millis(100),
            partial_for: None,
            content: super::mp3_bytes(),
        }
    }
}

struct State {
    pages: HashMap<String, FakePage>,
    url: String,
    logged_in: bool,
    credentials: Option<(String, String)>,
    typed: HashMap<String, String>,
    windows: Vec<String>,
    current_window: String,
    popups_opened: usize,
    download_dir: Option<PathBuf>,
    download_dirs: Vec<PathBuf>,
    plan: DownloadPlan,
    downloads: Vec<String>,
    key_offset: i32,
    clicks: Vec<String>,
    quit: bool,
}

pub struct FakeBrowser {
    state: Mutex<State>,
    selectors: SiteSelectors,
}

impl Default for FakeBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBrowser {
    /// Logged-in browser with no pages
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                pages: HashMap::new(),
                url: "about:blank".to_string(),
                logged_in: true,
                credentials: None,
                typed: HashMap::new(),
                windows: vec![MAIN_WINDOW.to_string()],
                current_window: MAIN_WINDOW.to_string(),
                popups_opened: 0,
                download_dir: None,
                download_dirs: Vec::new(),
                plan: DownloadPlan::default(),
                downloads: Vec::new(),
                key_offset: 0,
                clicks: Vec::new(),
                quit: false,
            }),
            selectors: SiteSelectors::default(),
        }
    }

    pub fn with_page(self, url: &str, page: FakePage) -> Self {
        self.lock().pages.insert(url.to_string(), page);
        self
    }

    pub fn with_plan(self, plan: DownloadPlan) -> Self {
        self.lock().plan = plan;
        self
    }

    /// Start logged out; the login form accepts only these credentials
    pub fn logged_out(self, username: &str, password: &str) -> Self {
        {
            let mut state = self.lock();
            state.logged_in = false;
            state.credentials = Some((username.to_string(), password.to_string()));
        }
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn quit_called(&self) -> bool {
        self.lock().quit
    }

    pub fn is_logged_in(&self) -> bool {
        self.lock().logged_in
    }

    pub fn key_offset(&self) -> i32 {
        self.lock().key_offset
    }

    pub fn download_dirs(&self) -> Vec<PathBuf> {
        self.lock().download_dirs.clone()
    }

    /// File names of every download triggered so far
    pub fn downloads(&self) -> Vec<String> {
        self.lock().downloads.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.lock().clicks.clone()
    }

    pub fn windows(&self) -> Vec<String> {
        self.lock().windows.clone()
    }

    pub fn current_window_handle(&self) -> String {
        self.lock().current_window.clone()
    }

    pub fn page(&self, url: &str) -> Option<FakePage> {
        self.lock().pages.get(url).cloned()
    }

    /// Force the solo state of a row on the current page
    pub fn set_solo(&self, index: &str, solo: bool) {
        let mut state = self.lock();
        let url = state.url.clone();
        if let Some(track) = state
            .pages
            .get_mut(&url)
            .and_then(|p| p.tracks.iter_mut().find(|t| t.index == index))
        {
            track.solo = solo;
        }
    }

    pub fn set_download_button(&self, present: bool) {
        let mut state = self.lock();
        let url = state.url.clone();
        if let Some(page) = state.pages.get_mut(&url) {
            page.download_button = present;
        }
    }

    fn find(&self, state: &State, selector: &Selector) -> Vec<String> {
        let s = &self.selectors;
        let page = state.pages.get(&state.url);
        let on_login_page = state.url.contains("login");
        let tracks: &[FakeTrack] = page.map(|p| p.tracks.as_slice()).unwrap_or(&[]);

        if *selector == s.track_rows() {
            return tracks.iter().map(|t| format!("row:{}", t.index)).collect();
        }
        if let Some(track) = tracks.iter().find(|t| *selector == s.track_row_for(&t.index)) {
            return vec![format!("row:{}", track.index)];
        }
        if *selector == s.solo() {
            return tracks.iter().map(|t| format!("solo:{}", t.index)).collect();
        }
        if *selector == s.download_button[0] && page.map(|p| p.download_button).unwrap_or(false) {
            return vec!["download".to_string()];
        }
        if *selector == s.purchase_indicators[0] && page.map(|p| p.purchase_indicator).unwrap_or(false) {
            return vec!["purchase".to_string()];
        }
        if *selector == s.modal_candidates[0] && page.map(|p| p.modal).unwrap_or(false) {
            return vec!["modal".to_string()];
        }
        if *selector == s.logged_in_indicators[0] && state.logged_in {
            return vec!["account".to_string()];
        }
        let pitch_controls = page.map(|p| p.pitch_controls).unwrap_or(false);
        if *selector == s.pitch_up[0] && pitch_controls {
            return vec!["pitch-up".to_string()];
        }
        if *selector == s.pitch_down[0] && pitch_controls {
            return vec!["pitch-down".to_string()];
        }
        if on_login_page {
            if *selector == s.login_username[0] {
                return vec!["login-user".to_string()];
            }
            if *selector == s.login_password[0] {
                return vec!["login-pass".to_string()];
            }
            if *selector == s.login_submit[0] {
                return vec!["login-submit".to_string()];
            }
        }
        Vec::new()
    }

    fn click_id(&self, id: &str) -> BrowserResult<()> {
        let mut state = self.lock();
        state.clicks.push(id.to_string());
        let url = state.url.clone();

        if let Some(index) = id.strip_prefix("solo:") {
            let page = state
                .pages
                .get_mut(&url)
                .ok_or_else(|| BrowserError::StaleElement(id.to_string()))?;
            if page.broken_solo.iter().any(|i| i == index) {
                return Ok(());
            }
            let track = page
                .tracks
                .iter_mut()
                .find(|t| t.index == index)
                .ok_or_else(|| BrowserError::StaleElement(id.to_string()))?;
            track.solo = !track.solo;
            return Ok(());
        }

        match id {
            "download" => {
                let page = state
                    .pages
                    .get(&url)
                    .cloned()
                    .ok_or_else(|| BrowserError::StaleElement(id.to_string()))?;
                let soloed: Vec<&FakeTrack> = page.tracks.iter().filter(|t| t.solo).collect();
                let caption = match soloed.as_slice() {
                    [only] => only.caption.clone(),
                    _ => "Mix".to_string(),
                };
                let plan = state.plan.clone();
                let name = (plan.name)(&caption);
                state.downloads.push(name.clone());

                if page.popup_on_download {
                    state.popups_opened += 1;
                    let handle = format!("popup-{}", state.popups_opened);
                    state.windows.push(handle);
                }

                if let Some(dir) = state.download_dir.clone() {
                    tokio::spawn(render_download(dir, name, plan));
                }
            }
            "login-submit" => {
                let typed = (
                    state.typed.get("login-user").cloned().unwrap_or_default(),
                    state.typed.get("login-pass").cloned().unwrap_or_default(),
                );
                if state.credentials.as_ref() == Some(&typed) {
                    state.logged_in = true;
                }
            }
            "pitch-up" => state.key_offset += 1,
            "pitch-down" => state.key_offset -= 1,
            "modal-close" => {
                if let Some(page) = state.pages.get_mut(&url) {
                    page.modal = false;
                }
            }
            "account" => state.logged_in = false,
            _ => {}
        }
        Ok(())
    }
}

async fn render_download(dir: PathBuf, name: String, plan: DownloadPlan) {
    tokio::time::sleep(plan.delay).await;
    let final_path = dir.join(&name);
    match plan.partial_for {
        Some(partial_for) => {
            let partial = dir.join(format!("{}.crdownload", name));
            std::fs::write(&partial, &plan.content).unwrap();
            tokio::time::sleep(partial_for).await;
            std::fs::rename(&partial, &final_path).unwrap();
        }
        None => std::fs::write(&final_path, &plan.content).unwrap(),
    }
}

fn element_id(arg: Option<&Value>) -> Option<String> {
    arg.and_then(|v| v.get(ELEMENT_KEY))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn open(&self, url: &str) -> BrowserResult<()> {
        self.lock().url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<String> {
        Ok(self.lock().url.clone())
    }

    async fn page_source(&self) -> BrowserResult<String> {
        let state = self.lock();
        if state.current_window.starts_with("popup") {
            Ok(POPUP_SOURCE.to_string())
        } else {
            Ok("<html><body>mixer</body></html>".to_string())
        }
    }

    async fn window_handles(&self) -> BrowserResult<Vec<String>> {
        Ok(self.lock().windows.clone())
    }

    async fn current_window(&self) -> BrowserResult<String> {
        Ok(self.lock().current_window.clone())
    }

    async fn switch_window(&self, handle: &str) -> BrowserResult<()> {
        let mut state = self.lock();
        if !state.windows.iter().any(|w| w == handle) {
            return Err(BrowserError::from_webdriver("no such window", handle));
        }
        state.current_window = handle.to_string();
        Ok(())
    }

    async fn close_window(&self) -> BrowserResult<()> {
        let mut state = self.lock();
        let current = state.current_window.clone();
        state.windows.retain(|w| *w != current);
        Ok(())
    }

    async fn find_elements(&self, selector: &Selector) -> BrowserResult<Vec<ElementRef>> {
        let mut state = self.lock();
        let found = self.find(&state, selector);

        if *selector == self.selectors.download_button[0] {
            let url = state.url.clone();
            if let Some(page) = state.pages.get_mut(&url) {
                let dropping = page.solo_drops_on_locate.clone();
                for track in page.tracks.iter_mut().filter(|t| dropping.contains(&t.index)) {
                    track.solo = false;
                }
            }
        }

        Ok(found.into_iter().map(ElementRef).collect())
    }

    async fn find_child_elements(&self, parent: &ElementRef, selector: &Selector) -> BrowserResult<Vec<ElementRef>> {
        let s = &self.selectors;
        let id = if let Some(index) = parent.0.strip_prefix("row:") {
            if *selector == s.solo() {
                Some(format!("solo:{}", index))
            } else if *selector == s.caption() {
                Some(format!("caption:{}", index))
            } else {
                None
            }
        } else if parent.0 == "modal" && *selector == s.modal_close[0] {
            Some("modal-close".to_string())
        } else {
            None
        };
        Ok(id.into_iter().map(ElementRef).collect())
    }

    async fn attribute(&self, element: &ElementRef, name: &str) -> BrowserResult<Option<String>> {
        let state = self.lock();
        let tracks = state.pages.get(&state.url).map(|p| p.tracks.clone()).unwrap_or_default();

        if let Some(index) = element.0.strip_prefix("solo:") {
            if name == "class" {
                let track = tracks.iter().find(|t| t.index == index);
                return Ok(track.map(|t| {
                    if t.solo {
                        "track__solo active".to_string()
                    } else {
                        "track__solo".to_string()
                    }
                }));
            }
        }
        if let Some(index) = element.0.strip_prefix("row:") {
            if name == self.selectors.track_index_attribute {
                return Ok(Some(index.to_string()));
            }
        }
        Ok(None)
    }

    async fn text(&self, element: &ElementRef) -> BrowserResult<String> {
        let state = self.lock();
        let index = element
            .0
            .strip_prefix("caption:")
            .ok_or_else(|| BrowserError::NoSuchElement(element.0.clone()))?;
        state
            .pages
            .get(&state.url)
            .and_then(|p| p.tracks.iter().find(|t| t.index == index))
            .map(|t| t.caption.clone())
            .ok_or_else(|| BrowserError::StaleElement(element.0.clone()))
    }

    async fn is_displayed(&self, _element: &ElementRef) -> BrowserResult<bool> {
        Ok(true)
    }

    async fn is_enabled(&self, _element: &ElementRef) -> BrowserResult<bool> {
        Ok(true)
    }

    async fn click(&self, element: &ElementRef) -> BrowserResult<()> {
        self.click_id(&element.0)
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> BrowserResult<()> {
        self.lock().typed.insert(element.0.clone(), text.to_string());
        Ok(())
    }

    async fn execute_script(&self, script: &str, args: Vec<Value>) -> BrowserResult<Value> {
        let target = element_id(args.first());
        if script.contains("arguments[0].click()") {
            if let Some(id) = target {
                self.click_id(&id)?;
            }
        } else if script.contains("style.display") && target.as_deref() == Some("modal") {
            let mut state = self.lock();
            let url = state.url.clone();
            if let Some(page) = state.pages.get_mut(&url) {
                page.modal = false;
            }
        }
        Ok(Value::Null)
    }

    async fn set_download_dir(&self, path: &Path) -> BrowserResult<()> {
        let mut state = self.lock();
        state.download_dir = Some(path.to_path_buf());
        state.download_dirs.push(path.to_path_buf());
        Ok(())
    }

    async fn quit(&self) -> BrowserResult<()> {
        self.lock().quit = true;
        Ok(())
    }
}
