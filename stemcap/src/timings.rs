//! Wait budgets and polling intervals
//!
//! Every wait in the capture pipeline is bounded by one of these values.
//! Defaults match the site's observed behaviour; tests shrink them.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Timings {
    /// Solo verification attempts before giving up
    pub solo_attempts: u32,
    /// Pause between solo verification attempts
    pub solo_retry_delay: Duration,
    /// Pause after toggling a solo control before verifying
    pub solo_settle: Duration,
    /// Pause between key transpose clicks
    pub pitch_click_delay: Duration,

    /// Budget for the post-click window/URL/source change
    pub post_click_wait: Duration,
    /// Poll interval for DOM waits
    pub dom_poll: Duration,

    /// Phase A: wait for a download file to appear
    pub start_timeout: Duration,
    /// Phase A poll interval
    pub start_poll: Duration,
    /// Phase B: fixed server render wait before polling
    pub initial_wait: Duration,
    /// Phase B poll while waiting for the server
    pub default_poll: Duration,
    /// Phase B poll while a `.crdownload` is present
    pub active_poll: Duration,
    /// Phase B poll once the partial file has disappeared
    pub imminent_poll: Duration,
    /// Phase B total budget
    pub completion_timeout: Duration,
    /// New files older than this are ignored
    pub recent_window: Duration,
    /// Filesystem scan cache TTL
    pub scan_ttl: Duration,

    /// Track discovery wait for mixer rows
    pub discovery_timeout: Duration,
    /// Login confirmation wait
    pub login_timeout: Duration,
    /// Progress board redraw interval
    pub progress_tick: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            solo_attempts: 3,
            solo_retry_delay: Duration::from_secs(2),
            solo_settle: Duration::from_secs(1),
            pitch_click_delay: Duration::from_millis(300),

            post_click_wait: Duration::from_secs(5),
            dom_poll: Duration::from_millis(250),

            start_timeout: Duration::from_secs(30),
            start_poll: Duration::from_secs(1),
            initial_wait: Duration::from_secs(15),
            default_poll: Duration::from_secs(2),
            active_poll: Duration::from_secs(2),
            imminent_poll: Duration::from_secs(1),
            completion_timeout: Duration::from_secs(300),
            recent_window: Duration::from_secs(300),
            scan_ttl: Duration::from_secs(2),

            discovery_timeout: Duration::from_secs(20),
            login_timeout: Duration::from_secs(15),
            progress_tick: Duration::from_millis(500),
        }
    }
}
