use std::time::Duration;

use referral_gate::audit::AccessEventKind;
use referral_gate::sim::{PageBehavior, SimBrowser};
use referral_gate::{
    AccessConfig, AllowReason, BrowserEvent, CapabilityToken, Decision, DenyReason, Gatekeeper,
    MemoryStorage, NavigationDetails, PageNotification, ProofKind, ProofMode, SecretRelay,
    TabChange, TabId, TabSnapshot, TabStatus,
};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

const SOURCE: &str = "https://source.example/";
const PAGE: &str = "https://protected.example/page";
const DOMAIN: &str = "protected.example";
const WINDOW: Duration = Duration::from_secs(30 * 60);

type SimGatekeeper = Gatekeeper<SimBrowser, SimBrowser, MemoryStorage>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> AccessConfig {
    AccessConfig::new(SOURCE, ["https://protected.example"])
}

fn setup(config: AccessConfig) -> (SimBrowser, MemoryStorage, SimGatekeeper) {
    init_tracing();
    let browser = SimBrowser::new();
    let storage = MemoryStorage::new();
    let gatekeeper = Gatekeeper::new(config, browser.clone(), browser.clone(), storage.clone());
    (browser, storage, gatekeeper)
}

fn started(tab: u32, url: &str) -> BrowserEvent {
    BrowserEvent::NavigationStarted(NavigationDetails::main_frame(TabId(tab), url))
}

fn error_redirects(browser: &SimBrowser, tab: TabId) -> usize {
    browser
        .redirects()
        .iter()
        .filter(|(t, url)| *t == tab && url == "error.html")
        .count()
}

#[tokio::test(start_paused = true)]
async fn source_referrer_is_granted() {
    let (browser, _, mut gk) = setup(config());
    browser.open_tab(TabId(1), PAGE, "https://source.example/dashboard");

    let decision = gk.handle(started(1, PAGE)).await;

    assert_eq!(
        decision,
        Some(Decision::Allowed(AllowReason::Granted(ProofKind::Referrer)))
    );
    assert!(gk.is_authorized(TabId(1), DOMAIN));
    assert!(browser.redirects().is_empty());
    assert_eq!(gk.audit_trail().of_kind(AccessEventKind::Granted).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_referrer_is_sent_to_error_page() {
    let (browser, _, mut gk) = setup(config());
    browser.open_tab(TabId(1), PAGE, "");

    let decision = gk.handle(started(1, PAGE)).await;

    assert_eq!(decision, Some(Decision::Denied(DenyReason::MissingReferrer)));
    assert!(!gk.is_authorized(TabId(1), DOMAIN));
    assert_eq!(browser.url_of(TabId(1)).as_deref(), Some("error.html"));

    let denied: Vec<_> = gk.audit_trail().of_kind(AccessEventKind::Denied).collect();
    assert_eq!(denied.len(), 1);
    assert_eq!(denied[0].reason(), Some(DenyReason::MissingReferrer));
}

#[tokio::test(start_paused = true)]
async fn foreign_referrer_is_denied() {
    let (browser, _, mut gk) = setup(config());
    browser.open_tab(TabId(1), PAGE, "https://search.example/?q=protected");

    assert_eq!(
        gk.handle(started(1, PAGE)).await,
        Some(Decision::Denied(DenyReason::ForeignReferrer))
    );
    assert_eq!(error_redirects(&browser, TabId(1)), 1);
}

#[tokio::test(start_paused = true)]
async fn sweep_after_window_revokes_and_redirects() {
    let (browser, _, mut gk) = setup(config());
    browser.open_tab(TabId(1), PAGE, SOURCE);
    gk.handle(started(1, PAGE)).await;
    let t0 = Instant::now();

    assert_eq!(gk.sweep_expired(t0 + WINDOW).await, 0);
    assert!(gk.is_authorized(TabId(1), DOMAIN));

    assert_eq!(gk.sweep_expired(t0 + WINDOW + Duration::from_millis(1)).await, 1);
    assert!(!gk.is_authorized(TabId(1), DOMAIN));
    assert_eq!(error_redirects(&browser, TabId(1)), 1);
    assert_eq!(gk.audit_trail().of_kind(AccessEventKind::Swept).count(), 1);

    // the cancelled timer never delivers a late expiry
    assert!(timeout(WINDOW * 2, gk.process_next_expiry()).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn sweep_leaves_tab_that_moved_away() {
    let (browser, _, mut gk) = setup(config());
    browser.open_tab(TabId(1), PAGE, SOURCE);
    gk.handle(started(1, PAGE)).await;
    browser.navigate(TabId(1), "https://elsewhere.example/");

    let later = Instant::now() + WINDOW + Duration::from_secs(1);
    assert_eq!(gk.sweep_expired(later).await, 1);
    assert!(browser.redirects().is_empty());
}

#[tokio::test(start_paused = true)]
async fn closing_tab_cancels_its_timer() {
    let (browser, _, mut gk) = setup(config());
    browser.open_tab(TabId(1), PAGE, SOURCE);
    browser.open_tab(TabId(2), PAGE, SOURCE);
    gk.handle(started(1, PAGE)).await;
    gk.handle(started(2, PAGE)).await;

    browser.close_tab(TabId(1));
    assert_eq!(gk.handle(BrowserEvent::TabRemoved(TabId(1))).await, None);

    assert!(!gk.is_authorized(TabId(1), DOMAIN));
    assert!(gk.is_authorized(TabId(2), DOMAIN));
    assert_eq!(gk.audit_trail().of_kind(AccessEventKind::TabClosed).count(), 1);

    // only tab 2's timer fires
    let expired = gk.process_next_expiry().await.expect("tab 2 expires");
    assert_eq!(expired.tab_id, TabId(2));
    assert!(timeout(WINDOW * 2, gk.process_next_expiry()).await.is_err());
    assert_eq!(gk.session_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn silent_page_gets_one_retry() {
    let (browser, _, mut gk) = setup(config());
    browser.open_tab(TabId(1), PAGE, SOURCE);
    browser.set_behavior(TabId(1), PageBehavior::SilentOnce);

    let decision = gk.handle(started(1, PAGE)).await;

    assert!(decision.is_some_and(|d| d.is_allowed()));
    assert_eq!(browser.requests_to(TabId(1)), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_page_answers_within_retry_deadline() {
    let (browser, _, mut gk) = setup(config());
    browser.open_tab(TabId(1), PAGE, SOURCE);
    browser.set_behavior(TabId(1), PageBehavior::Slow(Duration::from_millis(700)));

    assert!(gk.check_access(TabId(1), PAGE).await.is_allowed());
    assert_eq!(browser.requests_to(TabId(1)), 2);
}

#[tokio::test(start_paused = true)]
async fn mute_page_is_denied_after_both_deadlines() {
    let (browser, _, mut gk) = setup(config());
    browser.open_tab(TabId(1), PAGE, SOURCE);
    browser.set_behavior(TabId(1), PageBehavior::Silent);
    let start = Instant::now();

    let decision = gk.check_access(TabId(1), PAGE).await;

    assert_eq!(decision, Decision::Denied(DenyReason::NoAnswer));
    assert!(start.elapsed() >= Duration::from_millis(1500));
    assert_eq!(error_redirects(&browser, TabId(1)), 1);
}

#[tokio::test(start_paused = true)]
async fn unreachable_page_is_denied_without_retry() {
    let (browser, _, mut gk) = setup(config());
    browser.open_tab(TabId(1), PAGE, SOURCE);
    browser.set_behavior(TabId(1), PageBehavior::Unreachable);

    assert_eq!(
        gk.check_access(TabId(1), PAGE).await,
        Decision::Denied(DenyReason::Unreachable)
    );
    assert_eq!(browser.requests_to(TabId(1)), 1);
}

#[tokio::test(start_paused = true)]
async fn sub_frames_and_unprotected_urls_are_ignored() {
    let (browser, _, mut gk) = setup(config());
    browser.open_tab(TabId(1), PAGE, "");

    let sub_frame = BrowserEvent::NavigationStarted(NavigationDetails {
        tab_id: TabId(1),
        url: PAGE.to_string(),
        frame_id: 4,
    });
    assert_eq!(gk.handle(sub_frame).await, None);
    assert_eq!(gk.handle(started(1, "https://elsewhere.example/")).await, None);
    assert_eq!(gk.handle(started(1, SOURCE)).await, None);
    assert!(browser.redirects().is_empty());
    assert_eq!(browser.requests_to(TabId(1)), 0);
}

#[tokio::test(start_paused = true)]
async fn duplicate_signals_for_one_navigation_check_once() {
    let (browser, _, mut gk) = setup(config());
    browser.open_tab(TabId(1), PAGE, SOURCE);

    gk.handle(started(1, PAGE)).await;
    let committed = gk
        .handle(BrowserEvent::NavigationCommitted(NavigationDetails::main_frame(
            TabId(1),
            PAGE,
        )))
        .await;
    let updated = gk
        .handle(BrowserEvent::TabUpdated {
            tab_id: TabId(1),
            change: TabChange {
                status: Some(TabStatus::Loading),
                url: None,
            },
            tab: TabSnapshot {
                url: Some(PAGE.to_string()),
            },
        })
        .await;

    assert_eq!(committed, Some(Decision::Allowed(AllowReason::AlreadyAuthorized)));
    assert_eq!(updated, Some(Decision::Allowed(AllowReason::AlreadyAuthorized)));
    assert_eq!(browser.requests_to(TabId(1)), 1);
    assert_eq!(gk.session_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn completed_tab_updates_are_ignored() {
    let (browser, _, mut gk) = setup(config());
    browser.open_tab(TabId(1), PAGE, "");

    let update = BrowserEvent::TabUpdated {
        tab_id: TabId(1),
        change: TabChange {
            status: Some(TabStatus::Complete),
            url: None,
        },
        tab: TabSnapshot {
            url: Some(PAGE.to_string()),
        },
    };
    assert_eq!(gk.handle(update).await, None);
    assert!(browser.redirects().is_empty());
}

#[tokio::test(start_paused = true)]
async fn token_in_fragment_grants_access() {
    let (browser, storage, mut gk) = setup(config().with_proof_mode(ProofMode::Token));
    let relay = SecretRelay::new(storage, gk.config());
    relay.set(&CapabilityToken::new("xyz123")).await.unwrap();

    let url = "https://protected.example/page#xyz123|extra";
    browser.open_tab(TabId(1), url, "");

    assert_eq!(
        gk.handle(started(1, url)).await,
        Some(Decision::Allowed(AllowReason::Granted(ProofKind::Token)))
    );
    assert_eq!(browser.requests_to(TabId(1)), 0);

    let trail: Vec<String> = gk.audit_trail().events().map(|e| e.to_string()).collect();
    assert!(trail.iter().all(|line| !line.contains("xyz123")));
}

#[tokio::test(start_paused = true)]
async fn wrong_or_missing_token_is_denied() {
    let (browser, storage, mut gk) = setup(config().with_proof_mode(ProofMode::Token));
    SecretRelay::new(storage.clone(), gk.config())
        .set(&CapabilityToken::new("xyz123"))
        .await
        .unwrap();
    browser.open_tab(TabId(1), PAGE, "");

    assert_eq!(
        gk.check_access(TabId(1), "https://protected.example/page#nope|x").await,
        Decision::Denied(DenyReason::InvalidToken)
    );
    assert_eq!(
        gk.check_access(TabId(1), PAGE).await,
        Decision::Denied(DenyReason::MissingToken)
    );

    storage.set_failing(true);
    assert_eq!(
        gk.check_access(TabId(1), "https://protected.example/page#xyz123").await,
        Decision::Denied(DenyReason::InvalidToken)
    );
}

#[tokio::test(start_paused = true)]
async fn token_mode_revalidates_on_page_notification() {
    let (browser, storage, mut gk) = setup(config().with_proof_mode(ProofMode::Token));
    let relay = SecretRelay::new(storage, gk.config());
    relay.set(&CapabilityToken::new("abc")).await.unwrap();
    let url = "https://protected.example/page#abc";
    browser.open_tab(TabId(1), url, "");

    assert!(gk.check_access(TabId(1), url).await.is_allowed());

    // a still-valid token is accepted again without the short-circuit
    let revalidated = gk
        .handle(BrowserEvent::Page {
            tab_id: TabId(1),
            notification: PageNotification::ValidateAccess {
                url: url.to_string(),
            },
        })
        .await;
    assert_eq!(
        revalidated,
        Some(Decision::Allowed(AllowReason::Granted(ProofKind::Token)))
    );

    relay.clear().await.unwrap();
    let changed = gk
        .handle(BrowserEvent::Page {
            tab_id: TabId(1),
            notification: PageNotification::UrlChanged {
                new_url: "https://protected.example/other#abc".to_string(),
                referrer: None,
            },
        })
        .await;

    assert_eq!(changed, Some(Decision::Denied(DenyReason::InvalidToken)));
    assert!(!gk.is_authorized(TabId(1), DOMAIN));
}

#[tokio::test(start_paused = true)]
async fn token_mode_rechecks_every_load() {
    let (browser, storage, mut gk) = setup(config().with_proof_mode(ProofMode::Token));
    let relay = SecretRelay::new(storage, gk.config());
    relay.set(&CapabilityToken::new("abc")).await.unwrap();
    let granted = "https://protected.example/a#abc";
    browser.open_tab(TabId(1), granted, "");
    assert!(gk.handle(started(1, granted)).await.unwrap().is_allowed());

    relay.clear().await.unwrap();
    let secret_page = "https://protected.example/secret-page";
    browser.navigate(TabId(1), secret_page);

    assert_eq!(
        gk.handle(started(1, secret_page)).await,
        Some(Decision::Denied(DenyReason::MissingToken))
    );
    assert!(!gk.is_authorized(TabId(1), DOMAIN));
    assert_eq!(error_redirects(&browser, TabId(1)), 1);
}

#[tokio::test(start_paused = true)]
async fn token_mode_session_does_not_cover_tokenless_commit() {
    let (browser, storage, mut gk) = setup(config().with_proof_mode(ProofMode::Token));
    SecretRelay::new(storage, gk.config())
        .set(&CapabilityToken::new("abc"))
        .await
        .unwrap();
    let granted = "https://protected.example/a#abc";
    browser.open_tab(TabId(1), granted, "");
    assert!(gk.check_access(TabId(1), granted).await.is_allowed());

    // the secret is still published, but this load carries no token
    let bare = "https://protected.example/b";
    browser.navigate(TabId(1), bare);
    let committed = gk
        .handle(BrowserEvent::NavigationCommitted(NavigationDetails::main_frame(
            TabId(1),
            bare,
        )))
        .await;

    assert_eq!(committed, Some(Decision::Denied(DenyReason::MissingToken)));
    assert!(!gk.is_authorized(TabId(1), DOMAIN));
}

#[tokio::test(start_paused = true)]
async fn referrer_mode_notifications_reuse_session() {
    let (browser, _, mut gk) = setup(config());
    browser.open_tab(TabId(1), PAGE, SOURCE);
    gk.handle(started(1, PAGE)).await;

    let decision = gk
        .handle(BrowserEvent::Page {
            tab_id: TabId(1),
            notification: PageNotification::UrlChanged {
                new_url: "https://protected.example/page#section".to_string(),
                referrer: Some(SOURCE.to_string()),
            },
        })
        .await;

    assert_eq!(decision, Some(Decision::Allowed(AllowReason::AlreadyAuthorized)));
    assert_eq!(browser.requests_to(TabId(1)), 1);
}

#[tokio::test(start_paused = true)]
async fn try_new_rejects_invalid_config() {
    init_tracing();
    let browser = SimBrowser::new();
    let bad = AccessConfig::new("not a url", Vec::<String>::new());

    let result = Gatekeeper::try_new(bad, browser.clone(), browser, MemoryStorage::new());
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn run_loop_expires_sessions_and_clears_secret() {
    let (browser, storage, gk) = setup(config());
    SecretRelay::new(storage.clone(), gk.config())
        .set(&CapabilityToken::new("abc"))
        .await
        .unwrap();
    browser.open_tab(TabId(1), PAGE, SOURCE);
    browser.open_tab(TabId(2), PAGE, "");

    let (tx, rx) = mpsc::channel(16);
    let driver = async move {
        tx.send(started(1, PAGE)).await.unwrap();
        tx.send(started(2, PAGE)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(browser.url_of(TabId(1)).as_deref(), Some(PAGE));
        assert_eq!(error_redirects(&browser, TabId(2)), 1);

        tokio::time::sleep(WINDOW).await;
        assert_eq!(error_redirects(&browser, TabId(1)), 1);
        assert!(!storage.contains("sharedVar"));

        drop(tx);
    };

    tokio::join!(gk.run(rx), driver);
}

#[tokio::test(start_paused = true)]
async fn run_loop_waits_out_a_mute_page_before_other_tabs() {
    let (browser, _, gk) = setup(config());
    browser.open_tab(TabId(1), PAGE, SOURCE);
    browser.set_behavior(TabId(1), PageBehavior::Silent);
    browser.open_tab(TabId(2), PAGE, SOURCE);

    let (tx, rx) = mpsc::channel(16);
    let driver = async move {
        tx.send(started(1, PAGE)).await.unwrap();
        tx.send(started(2, PAGE)).await.unwrap();

        // both deadlines together come to 1.5 s
        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert_eq!(browser.requests_to(TabId(1)), 2);
        assert_eq!(browser.requests_to(TabId(2)), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(error_redirects(&browser, TabId(1)), 1);
        assert_eq!(browser.requests_to(TabId(2)), 1);
        assert_eq!(browser.url_of(TabId(2)).as_deref(), Some(PAGE));

        drop(tx);
    };

    tokio::join!(gk.run(rx), driver);
}
