//! Referral-gated access control for browser tabs.
//!
//! A tab may show a protected page only if it arrived there from an approved
//! source site. Arrival is proven either by the document referrer or by a
//! short-lived token relayed from the source page, and a successful proof
//! opens a time-limited session for that (tab, host) pair.
//!
//! # Core Types
//!
//! - [`AccessConfig`]: source site, protected URLs, timings
//! - [`UrlClassifier`]: decides whether a URL is protected
//! - [`Validator`]: checks referrers and tokens, issuing an [`ArrivalCap`]
//! - [`SessionStore`]: per-(tab, host) sessions with expiry timers
//! - [`SecretRelay`]: the shared token slot of the token variant
//! - [`Gatekeeper`]: the event-driven state machine tying them together
//!
//! The browser itself stays behind the [`Navigator`] and [`PageContext`]
//! traits; [`sim::SimBrowser`] implements both in memory.
//!
//! # Examples
//!
//! ```
//! use referral_gate::{AccessConfig, Decision, Gatekeeper, MemoryStorage, TabId};
//! use referral_gate::sim::SimBrowser;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let config = AccessConfig::new("https://source.example/", ["https://protected.example"]);
//! let browser = SimBrowser::new();
//! // typed into the address bar: no referrer
//! browser.open_tab(TabId(7), "https://protected.example/", "");
//!
//! let storage = MemoryStorage::new();
//! let mut gatekeeper = Gatekeeper::new(config, browser.clone(), browser.clone(), storage);
//! let decision = gatekeeper.check_access(TabId(7), "https://protected.example/").await;
//!
//! assert!(!decision.is_allowed());
//! assert_eq!(browser.url_of(TabId(7)).as_deref(), Some("error.html"));
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
mod browser;
mod capability;
mod classifier;
mod config;
mod error;
mod gatekeeper;
mod logging;
mod relay;
mod secret;
pub mod sim;
mod store;
mod validator;

pub use browser::{
    AccessReport, BrowserEvent, NavigationDetails, Navigator, PageContext, PageNotification,
    PageRequest, PageResponse, ReferrerReport, TabChange, TabId, TabSnapshot, TabStatus,
    MAIN_FRAME,
};
pub use capability::{ArrivalCap, ProofKind};
pub use classifier::{domain_key, host_of, UrlClassifier};
pub use config::{AccessConfig, ProofMode, ValidationReport, MIN_ACCESS_DURATION_MS};
pub use error::{CollaboratorError, ConfigError, StorageError};
pub use gatekeeper::{AllowReason, Decision, Gatekeeper};
pub use relay::{MemoryStorage, SecretRelay, SecretStorage, SourcePage, SourcePageObserver};
pub use secret::CapabilityToken;
pub use store::{Expiry, SessionKey, SessionRecord, SessionStore};
pub use validator::{token_from_fragment, token_from_url, DenyReason, Validator};
