//! Command-line arguments

use clap::Parser;
use std::path::PathBuf;

use crate::browser::webdriver::DEFAULT_ENDPOINT;
use crate::services::auth::Credentials;

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "stemcap=info,stemcap_common=info";
pub const VERBOSE_LOG_FILTER: &str = "stemcap=debug,stemcap_common=debug";

/// Command-line arguments for stemcap
#[derive(Parser, Debug)]
#[command(name = "stemcap")]
#[command(about = "Download every mixer track of your karaoke backing tracks as separate stems")]
#[command(version)]
pub struct Args {
    /// YAML song list
    #[arg(short, long, default_value = "songs.yaml", env = "STEMCAP_SONGS")]
    pub songs: PathBuf,

    /// Folder receiving one sub-folder per song
    #[arg(short, long)]
    pub download_root: Option<PathBuf>,

    /// WebDriver endpoint (chromedriver)
    #[arg(long, default_value = DEFAULT_ENDPOINT, env = "STEMCAP_WEBDRIVER_URL")]
    pub webdriver_url: String,

    /// Run the browser without a window
    #[arg(long)]
    pub headless: bool,

    /// TOML file overriding the site selector table
    #[arg(long, env = "STEMCAP_SITE_PROFILE")]
    pub site_profile: Option<PathBuf>,

    /// Write the JSON session report here
    #[arg(long)]
    pub stats_file: Option<PathBuf>,

    /// Do not draw the progress board
    #[arg(long)]
    pub no_progress: bool,

    /// Do not collect statistics
    #[arg(long, conflicts_with = "stats_file")]
    pub no_stats: bool,

    /// Site account name
    #[arg(long, env = "KV_USERNAME")]
    pub username: Option<String>,

    /// Site account password
    #[arg(long, env = "KV_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Credentials when both halves are given
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) if !username.is_empty() => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            VERBOSE_LOG_FILTER
        } else {
            DEFAULT_LOG_FILTER
        }
    }
}
