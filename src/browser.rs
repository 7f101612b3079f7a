//! The boundary between the gatekeeper and the browser.
//!
//! Everything the core learns about the browser arrives as a [`BrowserEvent`],
//! and everything it asks of the browser goes through one of two traits:
//! - [`Navigator`]: tab-level commands (redirect, current URL)
//! - [`PageContext`]: requests answered by the content script in a tab
//!
//! Page messages use the extension's wire shape (an `action` tag with
//! camelCase fields) so hosts can pass JSON straight through.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

/// Opaque browser tab identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TabId {
    fn from(id: u32) -> Self {
        TabId(id)
    }
}

/// Frame id of a tab's top-level document.
pub const MAIN_FRAME: u32 = 0;

/// Details of a navigation-start or navigation-committed signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationDetails {
    /// Tab being navigated
    pub tab_id: TabId,
    /// Destination URL
    pub url: String,
    /// Frame being navigated; 0 is the main frame
    pub frame_id: u32,
}

impl NavigationDetails {
    /// Creates details for a main-frame navigation.
    pub fn main_frame(tab_id: TabId, url: impl Into<String>) -> Self {
        Self {
            tab_id,
            url: url.into(),
            frame_id: MAIN_FRAME,
        }
    }

    /// Returns true if the navigation targets the top-level document.
    pub fn is_main_frame(&self) -> bool {
        self.frame_id == MAIN_FRAME
    }
}

/// Loading status reported with a tab update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    /// The tab started loading a document
    Loading,
    /// The document finished loading
    Complete,
}

/// The fields that changed in a tab update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabChange {
    /// New loading status, if it changed
    #[serde(default)]
    pub status: Option<TabStatus>,
    /// New URL, if it changed
    #[serde(default)]
    pub url: Option<String>,
}

/// The state of a tab after an update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabSnapshot {
    /// URL shown in the tab, when known
    #[serde(default)]
    pub url: Option<String>,
}

/// A signal delivered to the gatekeeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserEvent {
    /// A navigation is about to start.
    NavigationStarted(NavigationDetails),
    /// A navigation has committed.
    NavigationCommitted(NavigationDetails),
    /// A tab's properties changed.
    TabUpdated {
        /// Tab that changed
        tab_id: TabId,
        /// What changed
        change: TabChange,
        /// The tab after the change
        tab: TabSnapshot,
    },
    /// A tab was closed.
    TabRemoved(TabId),
    /// A content script sent a notification.
    Page {
        /// Tab the notification came from
        tab_id: TabId,
        /// The notification itself
        notification: PageNotification,
    },
}

/// A request sent to the content script of a tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum PageRequest {
    /// Ask for `document.referrer`
    GetReferrer,
    /// Ask the page for its own access verdict
    CheckAccess,
}

/// What a content script reported about how the page was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferrerReport {
    /// Referrer of the document; absent or empty for direct navigation
    #[serde(default)]
    pub referrer: Option<String>,
    /// URL of the document
    #[serde(default)]
    pub url: String,
    /// Milliseconds since the Unix epoch when the report was produced
    #[serde(default)]
    pub timestamp: u64,
}

impl ReferrerReport {
    /// Returns the referrer, treating a missing one as empty.
    pub fn referrer(&self) -> &str {
        self.referrer.as_deref().unwrap_or("")
    }
}

/// A page's answer to [`PageRequest::CheckAccess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessReport {
    /// Whether the page believes it was reached legitimately
    #[serde(rename = "hasValidAccess")]
    pub has_valid_access: bool,
}

/// A content script's reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PageResponse {
    /// Reply to [`PageRequest::CheckAccess`]
    Access(AccessReport),
    /// Reply to [`PageRequest::GetReferrer`]
    Referrer(ReferrerReport),
}

/// A notification pushed by a content script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum PageNotification {
    /// The page URL changed without a full navigation.
    UrlChanged {
        /// The new URL
        #[serde(rename = "newUrl")]
        new_url: String,
        /// Referrer of the original document
        #[serde(default)]
        referrer: Option<String>,
    },
    /// The page became visible again and wants to be re-checked.
    ValidateAccess {
        /// URL currently shown
        url: String,
    },
}

/// Tab-level commands the gatekeeper issues.
pub trait Navigator {
    /// Points the tab at `url`.
    fn redirect(
        &self,
        tab: TabId,
        url: &str,
    ) -> impl Future<Output = Result<(), CollaboratorError>>;

    /// Returns the URL the tab currently shows.
    fn current_url(&self, tab: TabId) -> impl Future<Output = Result<String, CollaboratorError>>;
}

/// Messaging with the content script running in a tab.
pub trait PageContext {
    /// Sends `request` to the tab's content script.
    ///
    /// `Ok(None)` means the script did not answer; `Err` means the message
    /// could not be delivered at all.
    fn request(
        &self,
        tab: TabId,
        request: PageRequest,
    ) -> impl Future<Output = Result<Option<PageResponse>, CollaboratorError>>;
}
