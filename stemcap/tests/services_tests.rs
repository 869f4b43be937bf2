//! Browser-facing service tests against the in-memory site

mod helpers;

use helpers::{fast_timings, FakeBrowser, FakePage, DEMO_URL};
use std::sync::Arc;
use stemcap::browser::Browser;
use stemcap::selectors::SiteSelectors;
use stemcap::services::{
    Authenticator, Credentials, DownloadActuator, Located, MixerControl, PageTrackDiscoverer, SiteAuthenticator,
    SoloValidator, TrackDiscoverer,
};
use stemcap_common::Track;

const TRACKS: &[(&str, &str)] = &[("0", "Bass"), ("1", "Drum Kit"), ("2", "Lead_Vocal")];

async fn open_demo(page: FakePage) -> FakeBrowser {
    let browser = FakeBrowser::new().with_page(DEMO_URL, page);
    browser.open(DEMO_URL).await.unwrap();
    browser
}

// ---------------------------------------------------------------------------
// Solo validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_validator_passes_single_matching_solo() {
    let browser = open_demo(FakePage::mixer(TRACKS)).await;
    browser.set_solo("2", true);
    let (selectors, timings) = (SiteSelectors::default(), fast_timings());
    let validator = SoloValidator::new(&browser, &selectors, &timings);

    let check = validator.check_once(&Track::new("2", "Lead Vocal")).await.unwrap();
    assert!(check.passed(), "{:?}", check);
    assert!(validator.verify(&Track::new("2", "Lead Vocal")).await);
}

#[tokio::test]
async fn test_validator_fails_without_active_solo() {
    let browser = open_demo(FakePage::mixer(TRACKS)).await;
    let (selectors, timings) = (SiteSelectors::default(), fast_timings());
    let validator = SoloValidator::new(&browser, &selectors, &timings);

    let check = validator.check_once(&Track::new("0", "Bass")).await.unwrap();
    assert!(check.element_present);
    assert!(!check.solo_active);
    assert_eq!(check.active_count, 0);
    assert!(!validator.verify(&Track::new("0", "Bass")).await);
}

#[tokio::test]
async fn test_validator_fails_with_two_active_solos() {
    let browser = open_demo(FakePage::mixer(TRACKS)).await;
    browser.set_solo("0", true);
    browser.set_solo("1", true);
    let (selectors, timings) = (SiteSelectors::default(), fast_timings());
    let validator = SoloValidator::new(&browser, &selectors, &timings);

    let check = validator.check_once(&Track::new("0", "Bass")).await.unwrap();
    assert!(check.solo_active);
    assert_eq!(check.active_count, 2);
    assert!(!check.exclusive);
    assert!(!validator.verify(&Track::new("0", "Bass")).await);
}

#[tokio::test]
async fn test_validator_fails_on_caption_mismatch_and_missing_row() {
    let browser = open_demo(FakePage::mixer(TRACKS)).await;
    browser.set_solo("0", true);
    let (selectors, timings) = (SiteSelectors::default(), fast_timings());
    let validator = SoloValidator::new(&browser, &selectors, &timings);

    let check = validator.check_once(&Track::new("0", "Piano")).await.unwrap();
    assert!(check.exclusive);
    assert!(!check.caption_match);

    let check = validator.check_once(&Track::new("9", "Bass")).await.unwrap();
    assert!(!check.element_present);
    assert_eq!(check.score(), 0.0);
}

#[tokio::test]
async fn test_mix_check_is_absent_without_mixer_object() {
    let browser = open_demo(FakePage::mixer(TRACKS)).await;
    let (selectors, timings) = (SiteSelectors::default(), fast_timings());
    let validator = SoloValidator::new(&browser, &selectors, &timings);

    assert_eq!(validator.verify_audio_mix(&Track::new("0", "Bass")).await.unwrap(), None);
}

// ---------------------------------------------------------------------------
// Mixer control
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_solo_track_clears_other_solos() {
    let browser = open_demo(FakePage::mixer(TRACKS)).await;
    browser.set_solo("0", true);
    let (selectors, timings) = (SiteSelectors::default(), fast_timings());

    MixerControl::new(&browser, &selectors, &timings)
        .solo_track(&Track::new("1", "Drum Kit"))
        .await
        .unwrap();

    let page = browser.page(DEMO_URL).unwrap();
    let soloed: Vec<&str> = page.tracks.iter().filter(|t| t.solo).map(|t| t.index.as_str()).collect();
    assert_eq!(soloed, vec!["1"]);
}

#[tokio::test]
async fn test_solo_track_keeps_already_active_target() {
    let browser = open_demo(FakePage::mixer(TRACKS)).await;
    browser.set_solo("1", true);
    let (selectors, timings) = (SiteSelectors::default(), fast_timings());

    MixerControl::new(&browser, &selectors, &timings)
        .solo_track(&Track::new("1", "Drum Kit"))
        .await
        .unwrap();

    assert!(browser.page(DEMO_URL).unwrap().tracks[1].solo);
}

#[tokio::test]
async fn test_apply_key_clicks_pitch_controls() {
    let browser = open_demo(FakePage::mixer(TRACKS)).await;
    let (selectors, timings) = (SiteSelectors::default(), fast_timings());
    let mixer = MixerControl::new(&browser, &selectors, &timings);

    assert_eq!(mixer.apply_key(0).await.unwrap(), 0);
    assert_eq!(mixer.apply_key(-3).await.unwrap(), 3);
    assert_eq!(browser.key_offset(), -3);
    assert_eq!(mixer.apply_key(2).await.unwrap(), 2);
    assert_eq!(browser.key_offset(), -1);
}

#[tokio::test]
async fn test_apply_key_without_pitch_control_is_an_error() {
    let page = FakePage {
        pitch_controls: false,
        ..FakePage::mixer(TRACKS)
    };
    let browser = open_demo(page).await;
    let (selectors, timings) = (SiteSelectors::default(), fast_timings());
    let mixer = MixerControl::new(&browser, &selectors, &timings);

    assert_eq!(mixer.apply_key(0).await.unwrap(), 0);
    assert!(matches!(
        mixer.apply_key(2).await,
        Err(stemcap::BrowserError::NoSuchElement(_))
    ));
    assert_eq!(browser.key_offset(), 0);
}

// ---------------------------------------------------------------------------
// Download actuator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_locate_found_not_purchased_and_missing() {
    let (selectors, timings) = (SiteSelectors::default(), fast_timings());

    let browser = open_demo(FakePage::mixer(TRACKS)).await;
    let actuator = DownloadActuator::new(&browser, &selectors, &timings);
    assert!(matches!(actuator.locate().await.unwrap(), Located::Found(_)));

    let browser = open_demo(FakePage::not_purchased(TRACKS)).await;
    let actuator = DownloadActuator::new(&browser, &selectors, &timings);
    assert_eq!(actuator.locate().await.unwrap(), Located::NotPurchased);

    // Rows without a download control also mean "not purchased"
    let browser = open_demo(FakePage::mixer(TRACKS)).await;
    browser.set_download_button(false);
    let actuator = DownloadActuator::new(&browser, &selectors, &timings);
    assert_eq!(actuator.locate().await.unwrap(), Located::NotPurchased);

    let browser = open_demo(FakePage::default()).await;
    let actuator = DownloadActuator::new(&browser, &selectors, &timings);
    assert_eq!(actuator.locate().await.unwrap(), Located::Missing);
}

#[tokio::test]
async fn test_click_closes_popup_window_and_modal() {
    let page = FakePage {
        popup_on_download: true,
        modal: true,
        ..FakePage::mixer(TRACKS)
    };
    let browser = open_demo(page).await;
    let (selectors, timings) = (SiteSelectors::default(), fast_timings());
    let actuator = DownloadActuator::new(&browser, &selectors, &timings);

    let control = match actuator.locate().await.unwrap() {
        Located::Found(control) => control,
        other => panic!("expected a control, got {:?}", other),
    };
    let report = actuator.click_and_absorb(&control).await.unwrap();

    assert!(report.reaction_seen);
    assert_eq!(report.windows_closed, 1);
    assert_eq!(report.modals_dismissed, 1);
    assert_eq!(browser.windows(), vec![helpers::fake_browser::MAIN_WINDOW.to_string()]);
    assert_eq!(browser.current_window_handle(), helpers::fake_browser::MAIN_WINDOW);
    assert!(!browser.page(DEMO_URL).unwrap().modal);
    assert_eq!(browser.downloads().len(), 1);
}

// ---------------------------------------------------------------------------
// Authentication and discovery
// ---------------------------------------------------------------------------

fn authenticator(browser: Arc<FakeBrowser>, credentials: Option<Credentials>) -> SiteAuthenticator {
    SiteAuthenticator::new(browser, Arc::new(SiteSelectors::default()), fast_timings(), credentials)
}

#[tokio::test]
async fn test_login_with_valid_credentials() {
    let browser = Arc::new(FakeBrowser::new().logged_out("singer", "secret"));
    let auth = authenticator(
        browser.clone(),
        Some(Credentials {
            username: "singer".into(),
            password: "secret".into(),
        }),
    );

    assert!(auth.ensure_logged_in().await);
    assert!(browser.is_logged_in());
    // Idempotent
    assert!(auth.ensure_logged_in().await);

    assert!(auth.logout().await.unwrap());
    assert!(!browser.is_logged_in());
}

#[tokio::test]
async fn test_login_rejected_or_without_credentials() {
    let browser = Arc::new(FakeBrowser::new().logged_out("singer", "secret"));
    let auth = authenticator(
        browser.clone(),
        Some(Credentials {
            username: "singer".into(),
            password: "wrong".into(),
        }),
    );
    assert!(!auth.ensure_logged_in().await);

    let auth = authenticator(browser.clone(), None);
    assert!(!auth.ensure_logged_in().await);
    assert!(!browser.is_logged_in());
}

#[tokio::test]
async fn test_discovery_reads_rows_in_page_order() {
    let browser = Arc::new(FakeBrowser::new().with_page(DEMO_URL, FakePage::mixer(TRACKS)));
    let discoverer = PageTrackDiscoverer::new(browser, Arc::new(SiteSelectors::default()), fast_timings());

    let tracks = discoverer.discover(DEMO_URL).await;

    assert_eq!(
        tracks,
        vec![
            Track::new("0", "Bass"),
            Track::new("1", "Drum Kit"),
            Track::new("2", "Lead_Vocal"),
        ]
    );
}

#[tokio::test]
async fn test_discovery_of_inaccessible_page_is_empty() {
    let browser = Arc::new(FakeBrowser::new());
    let discoverer = PageTrackDiscoverer::new(browser, Arc::new(SiteSelectors::default()), fast_timings());

    assert!(discoverer.discover(DEMO_URL).await.is_empty());
}
