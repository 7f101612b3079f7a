//! The per-tab authorization state machine.
//!
//! Each (tab, protected host) pair is either unauthorized (no session) or
//! authorized (a session with a pending expiry timer). A navigation to a
//! protected URL runs:
//!
//! ```text
//! authorized already? ──yes──> allow
//!        │ no
//!        v
//! obtain proof (deadline, one longer retry)
//!        │
//!   valid? ──yes──> grant session + timer ──> allow
//!        │ no / unobtainable
//!        v
//! redirect tab to the error page
//! ```
//!
//! Sessions end by timer expiry, explicit revocation, the periodic sweep, or
//! tab closure. All of it runs on one event loop ([`Gatekeeper::run`]); timer
//! firings come back as messages, so state only changes inside handlers.
//! Duplicate signals for one navigation are harmless because every
//! transition is idempotent.

use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};

use crate::audit::{AccessEvent, AccessEventKind, AuditTrail};
use crate::browser::{
    BrowserEvent, Navigator, PageContext, PageNotification, PageRequest, PageResponse, TabId,
    TabStatus,
};
use crate::capability::{ArrivalCap, ProofKind};
use crate::classifier::{domain_key, UrlClassifier};
use crate::config::{AccessConfig, ProofMode};
use crate::error::{CollaboratorError, ConfigError};
use crate::logging::TabLog;
use crate::relay::{SecretRelay, SecretStorage};
use crate::store::{Expiry, SessionKey, SessionStore};
use crate::validator::{token_from_url, DenyReason, Validator};

const MIN_TICK: Duration = Duration::from_millis(1);

/// Why a navigation was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowReason {
    /// The URL is not protected
    NotProtected,
    /// The tab already holds a session for the host
    AlreadyAuthorized,
    /// A session was just granted on the given evidence
    Granted(ProofKind),
    /// The development bypass is on
    Bypassed,
}

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The tab may stay where it is
    Allowed(AllowReason),
    /// The tab was sent to the error page
    Denied(DenyReason),
}

impl Decision {
    /// Returns true for [`Decision::Allowed`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed(_))
    }
}

enum Attempt {
    Answered(PageResponse),
    Silent,
    Failed(CollaboratorError),
}

enum Step {
    Event(BrowserEvent),
    Expiry(Expiry),
    Sweep,
}

/// Decides, grants and revokes access for every tab.
///
/// # Examples
///
/// ```
/// use referral_gate::{AccessConfig, BrowserEvent, Decision, Gatekeeper, MemoryStorage,
///     NavigationDetails, TabId};
/// use referral_gate::sim::SimBrowser;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let config = AccessConfig::new("https://source.example/", ["https://protected.example"]);
/// let browser = SimBrowser::new();
/// browser.open_tab(TabId(1), "https://protected.example/page", "https://source.example/");
///
/// let storage = MemoryStorage::new();
/// let mut gatekeeper = Gatekeeper::new(config, browser.clone(), browser.clone(), storage);
/// let decision = gatekeeper
///     .handle(BrowserEvent::NavigationStarted(NavigationDetails::main_frame(
///         TabId(1),
///         "https://protected.example/page",
///     )))
///     .await;
///
/// assert!(matches!(decision, Some(Decision::Allowed(_))));
/// assert!(gatekeeper.is_authorized(TabId(1), "protected.example"));
/// # }
/// ```
pub struct Gatekeeper<N, P, S> {
    config: AccessConfig,
    classifier: UrlClassifier,
    validator: Validator,
    store: SessionStore,
    expiries: UnboundedReceiver<Expiry>,
    navigator: N,
    page: P,
    relay: SecretRelay<S>,
    trail: AuditTrail,
}

impl<N, P, S> Gatekeeper<N, P, S>
where
    N: Navigator,
    P: PageContext,
    S: SecretStorage,
{
    /// Creates a gatekeeper.
    ///
    /// Configuration problems are logged, not fatal; use
    /// [`try_new`](Self::try_new) to refuse an invalid configuration.
    pub fn new(config: AccessConfig, navigator: N, page: P, storage: S) -> Self {
        config.validate().report();

        let (expiry_tx, expiries) = mpsc::unbounded_channel();
        Self {
            classifier: UrlClassifier::new(&config),
            validator: Validator::new(&config),
            store: SessionStore::new(config.access_duration(), expiry_tx),
            expiries,
            navigator,
            page,
            relay: SecretRelay::new(storage, &config),
            trail: AuditTrail::new(),
            config,
        }
    }

    /// Creates a gatekeeper, failing on any configuration problem.
    pub fn try_new(
        config: AccessConfig,
        navigator: N,
        page: P,
        storage: S,
    ) -> Result<Self, ConfigError> {
        config.validate().into_result()?;
        Ok(Self::new(config, navigator, page, storage))
    }

    /// The configuration in force.
    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    /// The URL classifier in use.
    pub fn classifier(&self) -> &UrlClassifier {
        &self.classifier
    }

    /// The shared secret relay.
    pub fn relay(&self) -> &SecretRelay<S> {
        &self.relay
    }

    /// Access events recorded so far.
    pub fn audit_trail(&self) -> &AuditTrail {
        &self.trail
    }

    /// Number of active sessions.
    pub fn session_count(&self) -> usize {
        self.store.len()
    }

    /// Returns true if `tab_id` holds a session for `domain`.
    pub fn is_authorized(&self, tab_id: TabId, domain: &str) -> bool {
        self.store.is_authorized(tab_id, domain)
    }

    /// Feeds one browser signal through the state machine.
    ///
    /// Returns the access decision when the signal concerned a protected URL.
    pub async fn handle(&mut self, event: BrowserEvent) -> Option<Decision> {
        match event {
            BrowserEvent::NavigationStarted(details) => {
                if !details.is_main_frame() {
                    return None;
                }
                if self.classifier.is_protected_url(&details.url) {
                    Some(self.check_navigation(details.tab_id, &details.url).await)
                } else {
                    if self.classifier.is_source_url(&details.url) {
                        TabLog::new(details.tab_id, &details.url)
                            .debug(format_args!("source page visited"));
                    }
                    None
                }
            }
            BrowserEvent::NavigationCommitted(details) => {
                if !details.is_main_frame() || !self.classifier.is_protected_url(&details.url) {
                    return None;
                }
                Some(self.check_navigation(details.tab_id, &details.url).await)
            }
            BrowserEvent::TabUpdated { tab_id, change, tab } => {
                if change.status != Some(TabStatus::Loading) {
                    return None;
                }
                let url = tab.url?;
                if !self.classifier.is_protected_url(&url) {
                    return None;
                }
                Some(self.check_navigation(tab_id, &url).await)
            }
            BrowserEvent::TabRemoved(tab_id) => {
                self.cleanup_tab(tab_id);
                None
            }
            BrowserEvent::Page {
                tab_id,
                notification,
            } => self.on_page_notification(tab_id, notification).await,
        }
    }

    /// Runs the full access algorithm for a tab showing `url`.
    pub async fn check_access(&mut self, tab_id: TabId, url: &str) -> Decision {
        self.decide(tab_id, url, true).await
    }

    /// Re-runs proof retrieval and validation even if a session exists.
    pub async fn revalidate(&mut self, tab_id: TabId, url: &str) -> Decision {
        self.decide(tab_id, url, false).await
    }

    /// Checks a page load or in-page change.
    ///
    /// A token must be present on every load, so token mode never reuses a
    /// session here; referrer mode does.
    async fn check_navigation(&mut self, tab_id: TabId, url: &str) -> Decision {
        match self.config.proof_mode {
            ProofMode::Token => self.revalidate(tab_id, url).await,
            ProofMode::Referrer => self.check_access(tab_id, url).await,
        }
    }

    async fn decide(&mut self, tab_id: TabId, url: &str, reuse_session: bool) -> Decision {
        if !self.classifier.is_protected_url(url) {
            return Decision::Allowed(AllowReason::NotProtected);
        }

        let log = TabLog::new(tab_id, url);
        let domain = domain_key(url);

        if self.config.bypass_for_development {
            log.warn(format_args!("development bypass active, not checking access"));
            self.trail
                .record(AccessEvent::new(tab_id, domain, AccessEventKind::Bypassed));
            return Decision::Allowed(AllowReason::Bypassed);
        }

        if domain.is_empty() {
            log.warn(format_args!("protected URL has no usable host"));
            return self.deny(tab_id, &domain, DenyReason::MalformedUrl, &log).await;
        }

        if reuse_session && self.store.is_authorized(tab_id, &domain) {
            log.debug(format_args!("session already authorized"));
            return Decision::Allowed(AllowReason::AlreadyAuthorized);
        }

        let proof = match self.config.proof_mode {
            ProofMode::Referrer => self.referrer_proof(tab_id, &log).await,
            ProofMode::Token => {
                self.validator
                    .verify_token(&self.relay, token_from_url(url).as_ref())
                    .await
            }
        };

        match proof {
            Ok(cap) => self.grant(tab_id, &domain, cap, &log),
            Err(reason) => self.deny(tab_id, &domain, reason, &log).await,
        }
    }

    fn grant(
        &mut self,
        tab_id: TabId,
        domain: &str,
        cap: ArrivalCap,
        log: &TabLog<'_>,
    ) -> Decision {
        self.store.grant(tab_id, domain, cap);
        log.info(format_args!("access authorized for {domain}"));
        self.trail.record(
            AccessEvent::new(tab_id, domain, AccessEventKind::Granted).with_proof(cap.kind()),
        );
        Decision::Allowed(AllowReason::Granted(cap.kind()))
    }

    async fn deny(
        &mut self,
        tab_id: TabId,
        domain: &str,
        reason: DenyReason,
        log: &TabLog<'_>,
    ) -> Decision {
        // a failed re-validation must not leave the old session behind
        self.store.revoke(tab_id, domain);

        log.info(format_args!("access denied: {reason}"));
        self.trail.record(
            AccessEvent::new(tab_id, domain, AccessEventKind::Denied).with_reason(reason),
        );
        self.show_error_page(tab_id).await;
        Decision::Denied(reason)
    }

    async fn referrer_proof(
        &self,
        tab_id: TabId,
        log: &TabLog<'_>,
    ) -> Result<ArrivalCap, DenyReason> {
        let deadlines = [self.config.proof_deadline(), self.config.proof_retry_deadline()];

        for (attempt, deadline) in deadlines.into_iter().enumerate() {
            match self.request_referrer(tab_id, deadline).await {
                Attempt::Answered(PageResponse::Referrer(report)) => {
                    return self.validator.verify_referrer(report.referrer());
                }
                Attempt::Answered(PageResponse::Access(_)) => {
                    return Err(DenyReason::UnexpectedAnswer);
                }
                Attempt::Failed(error) => {
                    log.warn(format_args!("could not reach page: {error}"));
                    return Err(DenyReason::Unreachable);
                }
                Attempt::Silent => {
                    log.debug(format_args!("no answer to attempt {}", attempt + 1));
                }
            }
        }
        Err(DenyReason::NoAnswer)
    }

    async fn request_referrer(&self, tab_id: TabId, deadline: Duration) -> Attempt {
        match timeout(deadline, self.page.request(tab_id, PageRequest::GetReferrer)).await {
            Ok(Ok(Some(response))) => Attempt::Answered(response),
            Ok(Ok(None)) | Err(_) => Attempt::Silent,
            Ok(Err(error)) => Attempt::Failed(error),
        }
    }

    /// Ends the session of `tab_id` for `domain`.
    ///
    /// If the tab still shows a page on that host it is sent to the error
    /// page. Returns false if there was no such session.
    pub async fn revoke(&mut self, tab_id: TabId, domain: &str) -> bool {
        self.end_session(tab_id, domain, AccessEventKind::Revoked).await
    }

    /// Drops every session of a closed tab without touching the tab.
    pub fn cleanup_tab(&mut self, tab_id: TabId) -> usize {
        let removed = self.store.cleanup_tab(tab_id);
        for record in &removed {
            self.trail.record(AccessEvent::new(
                tab_id,
                record.domain(),
                AccessEventKind::TabClosed,
            ));
        }
        removed.len()
    }

    /// Force-revokes every session older than the access duration at `now`.
    ///
    /// Backstop for timers that never fired. Returns the number of sessions
    /// removed.
    pub async fn sweep_expired(&mut self, now: Instant) -> usize {
        let mut swept = 0;
        for SessionKey { tab_id, domain } in self.store.expired(now) {
            if self.end_session(tab_id, &domain, AccessEventKind::Swept).await {
                swept += 1;
            }
        }
        swept
    }

    /// Applies one timer expiry message.
    ///
    /// Returns the expired session's key, or `None` when the message was
    /// stale (the session had been removed or re-granted meanwhile).
    pub async fn on_expiry(&mut self, expiry: &Expiry) -> Option<SessionKey> {
        self.store.expire(expiry)?;
        let key = expiry.key().clone();

        self.trail.record(AccessEvent::new(
            key.tab_id,
            key.domain.as_str(),
            AccessEventKind::Expired,
        ));
        self.show_error_page_if_on(key.tab_id, &key.domain).await;
        Some(key)
    }

    /// Waits for the next timer to fire and applies it.
    ///
    /// Waits forever when no session is pending.
    pub async fn process_next_expiry(&mut self) -> Option<SessionKey> {
        let expiry = self.expiries.recv().await?;
        self.on_expiry(&expiry).await
    }

    async fn end_session(&mut self, tab_id: TabId, domain: &str, kind: AccessEventKind) -> bool {
        if self.store.revoke(tab_id, domain).is_none() {
            return false;
        }
        self.trail.record(AccessEvent::new(tab_id, domain, kind));
        self.show_error_page_if_on(tab_id, domain).await;
        true
    }

    async fn on_page_notification(
        &mut self,
        tab_id: TabId,
        notification: PageNotification,
    ) -> Option<Decision> {
        let url = match notification {
            PageNotification::UrlChanged { new_url, .. } => new_url,
            PageNotification::ValidateAccess { url } => url,
        };
        if !self.classifier.is_protected_url(&url) {
            return None;
        }
        Some(self.check_navigation(tab_id, &url).await)
    }

    async fn show_error_page_if_on(&self, tab_id: TabId, domain: &str) {
        match self.navigator.current_url(tab_id).await {
            Ok(url) if domain_key(&url).contains(domain) => self.show_error_page(tab_id).await,
            Ok(_) => {}
            Err(error) => {
                tracing::debug!(%tab_id, %error, "tab not inspectable after revocation");
            }
        }
    }

    async fn show_error_page(&self, tab_id: TabId) {
        if let Err(error) = self.navigator.redirect(tab_id, &self.config.error_page_url).await {
            tracing::warn!(%tab_id, %error, "failed to show error page");
        }
    }
}

impl<N, P, S> Gatekeeper<N, P, S>
where
    N: Navigator,
    P: PageContext,
    S: SecretStorage + Clone,
{
    /// Drives the gatekeeper until `events` is closed.
    ///
    /// Besides browser events this services session timers, runs the
    /// expired-session sweep every `check_interval_ms`, and clears the shared
    /// secret slot every `secret_clear_interval_ms`. Dropping the gatekeeper
    /// afterwards cancels every pending timer.
    ///
    /// Events are handled one at a time. A proof request is awaited in place,
    /// so a page that never answers holds up every other tab's events, timer
    /// expiries and sweeps until both proof deadlines have passed (1.5 s with
    /// the defaults).
    pub async fn run(mut self, mut events: mpsc::Receiver<BrowserEvent>) {
        let check_interval = self.config.check_interval().max(MIN_TICK);
        let mut sweep = interval_at(Instant::now() + check_interval, check_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let relay = self.relay.clone();
        let maintenance = relay.maintain(self.config.secret_clear_interval().max(MIN_TICK));
        tokio::pin!(maintenance);

        tracing::info!(
            protected = self.config.protected_urls.len(),
            mode = ?self.config.proof_mode,
            "gatekeeper started"
        );

        loop {
            let step = tokio::select! {
                event = events.recv() => match event {
                    Some(event) => Step::Event(event),
                    None => break,
                },
                Some(expiry) = self.expiries.recv() => Step::Expiry(expiry),
                _ = sweep.tick() => Step::Sweep,
                _ = &mut maintenance => continue,
            };

            match step {
                Step::Event(event) => {
                    self.handle(event).await;
                }
                Step::Expiry(expiry) => {
                    self.on_expiry(&expiry).await;
                }
                Step::Sweep => {
                    let swept = self.sweep_expired(Instant::now()).await;
                    if swept > 0 {
                        tracing::warn!(swept, "sweep removed sessions whose timers were lost");
                    }
                }
            }
        }

        tracing::info!(sessions = self.store.len(), "event source closed, gatekeeper stopping");
    }
}
