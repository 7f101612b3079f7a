use std::path::PathBuf;

use thiserror::Error;

use crate::browser::TabId;

/// Errors detected while loading or validating an [`AccessConfig`](crate::AccessConfig).
///
/// Validation collects every problem instead of stopping at the first one, so
/// a single startup report can list all of them.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        /// Path that was being read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The configuration text is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// `source_url` does not parse as a URL.
    #[error("source_url must be a valid URL: {0}")]
    InvalidSourceUrl(String),

    /// `protected_urls` is empty.
    #[error("protected_urls must be a non-empty list")]
    NoProtectedUrls,

    /// An entry of `protected_urls` does not parse as a URL.
    #[error("protected_urls[{index}] is not a valid URL: {url}")]
    InvalidProtectedUrl {
        /// Position in the list
        index: usize,
        /// The offending entry
        url: String,
    },

    /// `access_duration_ms` is below the one minute floor.
    #[error("access_duration_ms should be at least {min}ms, got {actual}ms")]
    AccessDurationTooShort {
        /// Minimum accepted duration in milliseconds
        min: u64,
        /// Configured duration in milliseconds
        actual: u64,
    },

    /// A periodic interval is zero.
    #[error("{name} must be greater than zero")]
    ZeroInterval {
        /// Name of the offending setting
        name: &'static str,
    },

    /// A proof deadline is zero.
    #[error("{name} must be greater than zero")]
    ZeroDeadline {
        /// Name of the offending setting
        name: &'static str,
    },

    /// The retry deadline does not give the page more time than the first.
    #[error("proof_retry_deadline_ms ({retry}ms) must exceed proof_deadline_ms ({first}ms)")]
    RetryDeadlineNotLonger {
        /// First deadline in milliseconds
        first: u64,
        /// Retry deadline in milliseconds
        retry: u64,
    },

    /// Strict loading found one or more validation problems.
    #[error("configuration is invalid ({} problem(s))", .0.len())]
    Invalid(Vec<ConfigError>),
}

/// Failure to reach a browser-side collaborator.
///
/// Proof retrieval treats every variant as an invalid proof.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// The tab no longer exists.
    #[error("tab {0} does not exist")]
    TabGone(TabId),

    /// No content script is listening in the tab.
    #[error("no receiver in tab {0}")]
    NoReceiver(TabId),

    /// Any other messaging failure.
    #[error("messaging failed: {0}")]
    Transport(String),
}

/// Failure of the keyed storage behind the shared secret slot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The storage backend refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
