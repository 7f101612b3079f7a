//! A scripted in-process browser.
//!
//! [`SimBrowser`] implements both [`Navigator`] and [`PageContext`] over a
//! table of fake tabs, so the gatekeeper can be driven without a real
//! browser. Each tab's content script can be told to answer, stall, or be
//! unreachable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::browser::{
    AccessReport, Navigator, PageContext, PageRequest, PageResponse, ReferrerReport, TabId,
};
use crate::error::CollaboratorError;

/// How a tab's content script reacts to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageBehavior {
    /// Answers immediately
    #[default]
    Responsive,
    /// Never answers
    Silent,
    /// Ignores the first request, then answers
    SilentOnce,
    /// Has no listener; delivery fails
    Unreachable,
    /// Answers after the given delay
    Slow(Duration),
    /// Answers a referrer request with an access report
    WrongAnswer,
}

#[derive(Debug, Clone)]
struct SimTab {
    url: String,
    referrer: String,
    behavior: PageBehavior,
    requests: usize,
}

impl SimTab {
    fn answer(&self, request: PageRequest) -> PageResponse {
        match request {
            PageRequest::GetReferrer => PageResponse::Referrer(ReferrerReport {
                referrer: Some(self.referrer.clone()).filter(|r| !r.is_empty()),
                url: self.url.clone(),
                timestamp: now_millis(),
            }),
            PageRequest::CheckAccess => PageResponse::Access(AccessReport {
                has_valid_access: !self.referrer.is_empty(),
            }),
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    tabs: HashMap<TabId, SimTab>,
    redirects: Vec<(TabId, String)>,
}

/// Fake browser; clones share the same tabs.
#[derive(Debug, Clone, Default)]
pub struct SimBrowser {
    state: Arc<Mutex<SimState>>,
}

impl SimBrowser {
    /// Creates a browser with no tabs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens (or reloads) `tab` on `url`, reached from `referrer`.
    ///
    /// Pass an empty referrer for a typed URL or bookmark.
    pub fn open_tab(&self, tab: TabId, url: &str, referrer: &str) {
        self.lock().tabs.insert(
            tab,
            SimTab {
                url: url.to_string(),
                referrer: referrer.to_string(),
                behavior: PageBehavior::Responsive,
                requests: 0,
            },
        );
    }

    /// Closes `tab`; later commands on it fail with
    /// [`CollaboratorError::TabGone`].
    pub fn close_tab(&self, tab: TabId) {
        self.lock().tabs.remove(&tab);
    }

    /// Returns true if `tab` is open.
    pub fn is_open(&self, tab: TabId) -> bool {
        self.lock().tabs.contains_key(&tab)
    }

    /// Changes how `tab`'s content script behaves.
    pub fn set_behavior(&self, tab: TabId, behavior: PageBehavior) {
        if let Some(sim_tab) = self.lock().tabs.get_mut(&tab) {
            sim_tab.behavior = behavior;
        }
    }

    /// Changes the referrer `tab` reports.
    pub fn set_referrer(&self, tab: TabId, referrer: &str) {
        if let Some(sim_tab) = self.lock().tabs.get_mut(&tab) {
            sim_tab.referrer = referrer.to_string();
        }
    }

    /// Moves `tab` to `url` as the user would, keeping its referrer.
    pub fn navigate(&self, tab: TabId, url: &str) {
        if let Some(sim_tab) = self.lock().tabs.get_mut(&tab) {
            sim_tab.url = url.to_string();
        }
    }

    /// URL `tab` currently shows.
    pub fn url_of(&self, tab: TabId) -> Option<String> {
        self.lock().tabs.get(&tab).map(|sim_tab| sim_tab.url.clone())
    }

    /// Every redirect issued so far, in order.
    pub fn redirects(&self) -> Vec<(TabId, String)> {
        self.lock().redirects.clone()
    }

    /// Number of content script requests `tab` has received.
    pub fn requests_to(&self, tab: TabId) -> usize {
        self.lock()
            .tabs
            .get(&tab)
            .map_or(0, |sim_tab| sim_tab.requests)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Navigator for SimBrowser {
    async fn redirect(&self, tab: TabId, url: &str) -> Result<(), CollaboratorError> {
        let mut state = self.lock();
        let sim_tab = state.tabs.get_mut(&tab).ok_or(CollaboratorError::TabGone(tab))?;
        sim_tab.url = url.to_string();
        state.redirects.push((tab, url.to_string()));
        Ok(())
    }

    async fn current_url(&self, tab: TabId) -> Result<String, CollaboratorError> {
        self.url_of(tab).ok_or(CollaboratorError::TabGone(tab))
    }
}

impl PageContext for SimBrowser {
    async fn request(
        &self,
        tab: TabId,
        request: PageRequest,
    ) -> Result<Option<PageResponse>, CollaboratorError> {
        let (behavior, response) = {
            let mut state = self.lock();
            let sim_tab = state.tabs.get_mut(&tab).ok_or(CollaboratorError::TabGone(tab))?;
            sim_tab.requests += 1;
            let behavior = sim_tab.behavior;
            if behavior == PageBehavior::SilentOnce {
                sim_tab.behavior = PageBehavior::Responsive;
            }
            (behavior, sim_tab.answer(request))
        };

        match behavior {
            PageBehavior::Responsive => Ok(Some(response)),
            PageBehavior::Silent | PageBehavior::SilentOnce => std::future::pending().await,
            PageBehavior::Unreachable => Err(CollaboratorError::NoReceiver(tab)),
            PageBehavior::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Some(response))
            }
            PageBehavior::WrongAnswer => Ok(Some(PageResponse::Access(AccessReport {
                has_valid_access: true,
            }))),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
