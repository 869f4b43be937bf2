//! stemcap - Main entry point
//!
//! Loads the song list, connects to a WebDriver browser and runs one capture
//! session. Ctrl+C stops the session after the current track.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use stemcap::browser::{Browser, WebDriverBrowser, WebDriverOptions};
use stemcap::cli::Args;
use stemcap::progress::ProgressTracker;
use stemcap::selectors::{load_site_profile, SiteSelectors};
use stemcap::services::{PageTrackDiscoverer, SiteAuthenticator};
use stemcap::stats::StatsRecorder;
use stemcap::{Session, Timings};
use stemcap_common::config::{load_song_list, resolve_download_root};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting stemcap v{}", env!("CARGO_PKG_VERSION"));

    let song_list = load_song_list(&args.songs)
        .with_context(|| format!("Failed to load song list {}", args.songs.display()))?;
    if !song_list.skipped.is_empty() {
        warn!(skipped = song_list.skipped.len(), "Invalid song entries skipped");
    }
    if song_list.songs.is_empty() {
        bail!("No valid songs in {}", args.songs.display());
    }
    info!("Loaded {} songs", song_list.songs.len());

    let download_root = resolve_download_root(args.download_root.as_deref());
    std::fs::create_dir_all(&download_root)
        .with_context(|| format!("Failed to create download root {}", download_root.display()))?;
    info!("Download root: {}", download_root.display());

    let selectors = match &args.site_profile {
        Some(path) => load_site_profile(path)
            .with_context(|| format!("Failed to load site profile {}", path.display()))?,
        None => SiteSelectors::default(),
    };
    let selectors = Arc::new(selectors);
    let timings = Timings::default();

    let options = WebDriverOptions {
        endpoint: args.webdriver_url.clone(),
        headless: args.headless,
        download_dir: Some(download_root.clone()),
        ..WebDriverOptions::default()
    };
    let browser: Arc<dyn Browser> = Arc::new(
        WebDriverBrowser::connect(options)
            .await
            .with_context(|| format!("Failed to start a browser session at {}", args.webdriver_url))?,
    );
    info!("Browser session started");

    let authenticator = SiteAuthenticator::new(
        browser.clone(),
        selectors.clone(),
        timings.clone(),
        args.credentials(),
    );
    let discoverer = PageTrackDiscoverer::new(browser.clone(), selectors.clone(), timings.clone());

    let cancel = CancellationToken::new();
    let mut session = Session::new(
        browser,
        Box::new(authenticator),
        Box::new(discoverer),
        selectors,
        timings,
        download_root,
    )
    .with_cancellation(cancel.clone())
    .with_stats_file(args.stats_file.clone());

    if !args.no_progress {
        session = session.with_progress_board(Arc::new(ProgressTracker::new()));
    }
    if !args.no_stats {
        session = session.with_stats(Box::new(StatsRecorder::new()));
    }

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Stopping after the current track");
        signal_cancel.cancel();
    });

    let report = session.run(&song_list.songs).await;

    if let Some(summary) = session.stats().summary() {
        println!("{}", summary);
    }
    info!(
        completed = report.completed,
        failed = report.failed,
        cancelled = report.cancelled,
        "Session finished"
    );

    if !report.logged_in {
        bail!("Login failed");
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
