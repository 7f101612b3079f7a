//! The shared secret slot of the token variant.
//!
//! The source page publishes a token into a single storage slot; the
//! protected page proves its arrival by carrying that token in its URL
//! fragment. The slot is the only link between the two, and it is wiped on a
//! fixed period whether or not anything used it, which bounds how long a
//! leaked token can be replayed.
//!
//! - [`SecretStorage`]: the keyed storage collaborator
//! - [`SecretRelay`]: owner of the slot (`get`/`set`/`clear`/validate)
//! - [`SourcePageObserver`]: copies the source page's token into the slot

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::AccessConfig;
use crate::error::StorageError;
use crate::secret::CapabilityToken;

/// Keyed string storage shared between extension contexts.
pub trait SecretStorage {
    /// Reads the value stored under `key`.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StorageError>>;

    /// Stores `value` under `key`.
    fn set(&self, key: &str, value: &str) -> impl Future<Output = Result<(), StorageError>>;

    /// Deletes `key`; deleting a missing key succeeds.
    fn remove(&self, key: &str) -> impl Future<Output = Result<(), StorageError>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, String>,
    failing: bool,
}

/// In-process [`SecretStorage`]; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Returns true if `key` currently holds a value.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().values.contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(state: &MemoryState) -> Result<(), StorageError> {
        if state.failing {
            Err(StorageError::Unavailable("storage disabled".to_string()))
        } else {
            Ok(())
        }
    }
}

impl SecretStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let state = self.lock();
        Self::check(&state)?;
        Ok(state.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut state = self.lock();
        Self::check(&state)?;
        state.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut state = self.lock();
        Self::check(&state)?;
        state.values.remove(key);
        Ok(())
    }
}

/// Owner of the single shared secret slot.
#[derive(Debug, Clone)]
pub struct SecretRelay<S> {
    storage: S,
    key: String,
}

impl<S: SecretStorage> SecretRelay<S> {
    /// Creates a relay over `storage`, using the configured slot key.
    pub fn new(storage: S, config: &AccessConfig) -> Self {
        Self {
            storage,
            key: config.shared_secret_key.clone(),
        }
    }

    /// Reads the current token, if any.
    pub async fn get(&self) -> Result<Option<CapabilityToken>, StorageError> {
        Ok(self.storage.get(&self.key).await?.map(CapabilityToken::new))
    }

    /// Publishes `token` into the slot, replacing any previous value.
    pub async fn set(&self, token: &CapabilityToken) -> Result<(), StorageError> {
        self.storage.set(&self.key, token.expose()).await
    }

    /// Empties the slot.
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(&self.key).await?;
        tracing::info!(target: "access_audit", key = %self.key, "shared secret cleared");
        Ok(())
    }

    /// Returns true iff `candidate` exactly equals the current token.
    ///
    /// An empty slot, an empty candidate and a storage failure all yield
    /// false.
    pub async fn validate_token(&self, candidate: &str) -> bool {
        if candidate.is_empty() {
            return false;
        }
        match self.get().await {
            Ok(Some(current)) => current.matches(candidate),
            Ok(None) => {
                tracing::debug!("no shared secret present, rejecting token");
                false
            }
            Err(error) => {
                tracing::warn!(%error, "shared secret unreadable, rejecting token");
                false
            }
        }
    }

    /// Clears the slot every `period`, forever.
    ///
    /// The first clear happens one full period after the call. Failures are
    /// logged and retried at the next period.
    pub async fn maintain(&self, period: Duration) {
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            if let Err(error) = self.clear().await {
                tracing::error!(%error, "failed to clear shared secret");
            }
        }
    }
}

/// What the source page's content script can see at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePage {
    /// Whether the document is visible
    pub visible: bool,
    /// Path of the current location
    pub path: String,
    /// Token held in the page's own session storage
    pub local_token: Option<String>,
}

/// Copies the source page's token into the shared slot when it may.
#[derive(Debug, Clone)]
pub struct SourcePageObserver<S> {
    relay: SecretRelay<S>,
    token_path: String,
    period: Duration,
}

impl<S: SecretStorage> SourcePageObserver<S> {
    /// Creates an observer publishing through `relay`.
    pub fn new(relay: SecretRelay<S>, config: &AccessConfig) -> Self {
        Self {
            relay,
            token_path: config.source_token_path.clone(),
            period: config.source_poll_interval().max(Duration::from_millis(1)),
        }
    }

    /// Polling period taken from `source_poll_interval_ms`.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Publishes the page's token if the page is visible, on the token path,
    /// and holds a non-empty token. Returns whether a token was published.
    pub async fn observe(&self, page: &SourcePage) -> Result<bool, StorageError> {
        if !page.visible || page.path != self.token_path {
            return Ok(false);
        }
        let Some(token) = page.local_token.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(false);
        };
        self.relay.set(&CapabilityToken::new(token)).await?;
        tracing::debug!(path = %page.path, "published source page token");
        Ok(true)
    }

    /// Calls [`observe`](Self::observe) with a fresh snapshot every
    /// [`period`](Self::period), forever.
    pub async fn run<F>(&self, mut snapshot: F)
    where
        F: FnMut() -> SourcePage,
    {
        let period = self.period;
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            let page = snapshot();
            if let Err(error) = self.observe(&page).await {
                tracing::warn!(%error, "could not publish source page token");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AccessConfig {
        AccessConfig::new("https://source.example/", ["https://protected.example"])
    }

    fn relay() -> (MemoryStorage, SecretRelay<MemoryStorage>) {
        let storage = MemoryStorage::new();
        (storage.clone(), SecretRelay::new(storage, &config()))
    }

    fn dashboard(token: Option<&str>) -> SourcePage {
        SourcePage {
            visible: true,
            path: "/dashboard".to_string(),
            local_token: token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn validate_token_is_exact_match() {
        let (_, relay) = relay();
        relay.set(&CapabilityToken::new("abc")).await.unwrap();

        assert!(relay.validate_token("abc").await);
        assert!(!relay.validate_token("abcd").await);
        assert!(!relay.validate_token("ab").await);
        assert!(!relay.validate_token("").await);
    }

    #[tokio::test]
    async fn empty_slot_rejects_everything() {
        let (_, relay) = relay();
        assert!(!relay.validate_token("abc").await);
    }

    #[tokio::test]
    async fn clear_invalidates_previous_token() {
        let (storage, relay) = relay();
        relay.set(&CapabilityToken::new("abc")).await.unwrap();
        relay.clear().await.unwrap();

        assert!(!storage.contains("sharedVar"));
        assert!(!relay.validate_token("abc").await);
    }

    #[tokio::test]
    async fn storage_failure_fails_closed() {
        let (storage, relay) = relay();
        relay.set(&CapabilityToken::new("abc")).await.unwrap();
        storage.set_failing(true);

        assert!(!relay.validate_token("abc").await);
        assert!(relay.clear().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_clears_on_each_period() {
        let (storage, relay) = relay();
        relay.set(&CapabilityToken::new("abc")).await.unwrap();

        let period = Duration::from_secs(15 * 60);
        let maintenance = relay.maintain(period);
        tokio::pin!(maintenance);

        // not yet due
        let early = tokio::time::timeout(period - Duration::from_millis(1), &mut maintenance).await;
        assert!(early.is_err());
        assert!(storage.contains("sharedVar"));

        let due = tokio::time::timeout(Duration::from_millis(2), &mut maintenance).await;
        assert!(due.is_err());
        assert!(!storage.contains("sharedVar"));

        // a token published later is wiped by the next period as well
        relay.set(&CapabilityToken::new("def")).await.unwrap();
        let _ = tokio::time::timeout(period, &mut maintenance).await;
        assert!(!relay.validate_token("def").await);
    }

    #[tokio::test]
    async fn observer_publishes_only_when_conditions_hold() {
        let (storage, relay) = relay();
        let observer = SourcePageObserver::new(relay.clone(), &config());

        let hidden = SourcePage {
            visible: false,
            ..dashboard(Some("tok"))
        };
        assert!(!observer.observe(&hidden).await.unwrap());

        let elsewhere = SourcePage {
            path: "/settings".to_string(),
            ..dashboard(Some("tok"))
        };
        assert!(!observer.observe(&elsewhere).await.unwrap());

        assert!(!observer.observe(&dashboard(None)).await.unwrap());
        assert!(!observer.observe(&dashboard(Some(""))).await.unwrap());
        assert!(!storage.contains("sharedVar"));

        assert!(observer.observe(&dashboard(Some("tok"))).await.unwrap());
        assert!(relay.validate_token("tok").await);
    }

    #[tokio::test(start_paused = true)]
    async fn observer_polls_on_its_period() {
        let (_, relay) = relay();
        let observer = SourcePageObserver::new(relay.clone(), &config());
        assert_eq!(observer.period(), Duration::from_secs(60));

        let run = observer.run(|| dashboard(Some("polled")));
        let _ = tokio::time::timeout(observer.period() + Duration::from_millis(1), run).await;

        assert!(relay.validate_token("polled").await);
    }

    #[tokio::test(start_paused = true)]
    async fn observer_period_follows_config() {
        let (_, relay) = relay();
        let mut config = config();
        config.source_poll_interval_ms = 5_000;
        let observer = SourcePageObserver::new(relay.clone(), &config);
        assert_eq!(observer.period(), Duration::from_secs(5));

        let run = observer.run(|| dashboard(Some("fast")));
        tokio::pin!(run);

        let early = tokio::time::timeout(Duration::from_millis(4_999), &mut run).await;
        assert!(early.is_err());
        assert!(!relay.validate_token("fast").await);

        let _ = tokio::time::timeout(Duration::from_millis(2), &mut run).await;
        assert!(relay.validate_token("fast").await);
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let (_, relay) = relay();
        let mut config = config();
        config.source_poll_interval_ms = 0;
        let observer = SourcePageObserver::new(relay, &config);
        assert_eq!(observer.period(), Duration::from_millis(1));
    }
}
