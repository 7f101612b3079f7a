//! Process-wide access control settings.
//!
//! An [`AccessConfig`] is loaded once at startup, from TOML or built in code,
//! and never mutated afterwards. Durations are whole milliseconds.
//!
//! ```
//! use referral_gate::AccessConfig;
//!
//! let config = AccessConfig::from_toml_str(r#"
//!     source_url = "https://source.example/"
//!     protected_urls = ["https://protected.example"]
//!     access_duration_ms = 1800000
//! "#).unwrap();
//!
//! assert!(config.validate().is_valid());
//! assert_eq!(config.access_duration().as_secs(), 1800);
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Shortest accepted authorization window.
pub const MIN_ACCESS_DURATION_MS: u64 = 60_000;

const DEFAULT_ACCESS_DURATION_MS: u64 = 30 * 60 * 1000;
const DEFAULT_CHECK_INTERVAL_MS: u64 = 60 * 1000;
const DEFAULT_PROOF_DEADLINE_MS: u64 = 500;
const DEFAULT_PROOF_RETRY_DEADLINE_MS: u64 = 1000;
const DEFAULT_SECRET_CLEAR_INTERVAL_MS: u64 = 15 * 60 * 1000;
const DEFAULT_SOURCE_POLL_INTERVAL_MS: u64 = 60 * 1000;

/// How a tab proves it arrived from the source page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProofMode {
    /// The page's `document.referrer` must name a source domain
    #[default]
    Referrer,
    /// The URL fragment must carry the current shared secret
    Token,
}

/// Immutable access control settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessConfig {
    /// Prefix of the page users must come from
    pub source_url: String,
    /// Protected URLs; their hosts (and subdomains) are gated
    pub protected_urls: Vec<String>,
    /// Substrings a referrer must contain; empty means the source URL's host
    #[serde(default)]
    pub referrer_domains: Vec<String>,
    /// How long a grant lasts
    #[serde(default = "default_access_duration_ms")]
    pub access_duration_ms: u64,
    /// Period of the expired-session sweep
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Require protected hosts to match exactly rather than by substring
    #[serde(default = "default_true")]
    pub strict_domain_matching: bool,
    /// Treat subdomains of protected hosts as protected
    #[serde(default = "default_true")]
    pub allow_subdomains: bool,
    /// Where denied tabs are sent
    #[serde(default = "default_error_page_url")]
    pub error_page_url: String,
    /// Which proof of arrival is checked
    #[serde(default)]
    pub proof_mode: ProofMode,
    /// First deadline for a page to answer a proof request
    #[serde(default = "default_proof_deadline_ms")]
    pub proof_deadline_ms: u64,
    /// Deadline for the single retry
    #[serde(default = "default_proof_retry_deadline_ms")]
    pub proof_retry_deadline_ms: u64,
    /// Period after which the shared secret slot is wiped
    #[serde(default = "default_secret_clear_interval_ms")]
    pub secret_clear_interval_ms: u64,
    /// Storage key of the shared secret slot
    #[serde(default = "default_shared_secret_key")]
    pub shared_secret_key: String,
    /// Path on the source page where a page-local token is published
    #[serde(default = "default_source_token_path")]
    pub source_token_path: String,
    /// How often the source page observer looks for a token
    #[serde(default = "default_source_poll_interval_ms")]
    pub source_poll_interval_ms: u64,
    /// Let every navigation through (development only)
    #[serde(default)]
    pub bypass_for_development: bool,
}

fn default_true() -> bool {
    true
}

fn default_access_duration_ms() -> u64 {
    DEFAULT_ACCESS_DURATION_MS
}

fn default_check_interval_ms() -> u64 {
    DEFAULT_CHECK_INTERVAL_MS
}

fn default_error_page_url() -> String {
    "error.html".to_string()
}

fn default_proof_deadline_ms() -> u64 {
    DEFAULT_PROOF_DEADLINE_MS
}

fn default_proof_retry_deadline_ms() -> u64 {
    DEFAULT_PROOF_RETRY_DEADLINE_MS
}

fn default_secret_clear_interval_ms() -> u64 {
    DEFAULT_SECRET_CLEAR_INTERVAL_MS
}

fn default_shared_secret_key() -> String {
    "sharedVar".to_string()
}

fn default_source_token_path() -> String {
    "/dashboard".to_string()
}

fn default_source_poll_interval_ms() -> u64 {
    DEFAULT_SOURCE_POLL_INTERVAL_MS
}

impl AccessConfig {
    /// Creates a configuration with default timings and matching rules.
    pub fn new<I, S>(source_url: impl Into<String>, protected_urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source_url: source_url.into(),
            protected_urls: protected_urls.into_iter().map(Into::into).collect(),
            referrer_domains: Vec::new(),
            access_duration_ms: DEFAULT_ACCESS_DURATION_MS,
            check_interval_ms: DEFAULT_CHECK_INTERVAL_MS,
            strict_domain_matching: true,
            allow_subdomains: true,
            error_page_url: default_error_page_url(),
            proof_mode: ProofMode::Referrer,
            proof_deadline_ms: DEFAULT_PROOF_DEADLINE_MS,
            proof_retry_deadline_ms: DEFAULT_PROOF_RETRY_DEADLINE_MS,
            secret_clear_interval_ms: DEFAULT_SECRET_CLEAR_INTERVAL_MS,
            shared_secret_key: default_shared_secret_key(),
            source_token_path: default_source_token_path(),
            source_poll_interval_ms: DEFAULT_SOURCE_POLL_INTERVAL_MS,
            bypass_for_development: false,
        }
    }

    /// Parses a configuration from TOML text.
    ///
    /// Only syntax and schema errors fail here; call [`validate`](Self::validate)
    /// for the semantic checks.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Sets the proof mode.
    pub fn with_proof_mode(mut self, mode: ProofMode) -> Self {
        self.proof_mode = mode;
        self
    }

    /// Sets the authorization window in milliseconds.
    pub fn with_access_duration_ms(mut self, ms: u64) -> Self {
        self.access_duration_ms = ms;
        self
    }

    /// Sets the accepted referrer substrings.
    pub fn with_referrer_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.referrer_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Checks every setting and reports all problems found.
    pub fn validate(&self) -> ValidationReport {
        let mut errors = Vec::new();

        if Url::parse(&self.source_url).is_err() {
            errors.push(ConfigError::InvalidSourceUrl(self.source_url.clone()));
        }

        if self.protected_urls.is_empty() {
            errors.push(ConfigError::NoProtectedUrls);
        }

        for (index, url) in self.protected_urls.iter().enumerate() {
            if Url::parse(url).is_err() {
                errors.push(ConfigError::InvalidProtectedUrl {
                    index,
                    url: url.clone(),
                });
            }
        }

        if self.access_duration_ms < MIN_ACCESS_DURATION_MS {
            errors.push(ConfigError::AccessDurationTooShort {
                min: MIN_ACCESS_DURATION_MS,
                actual: self.access_duration_ms,
            });
        }

        for (name, value) in [
            ("check_interval_ms", self.check_interval_ms),
            ("secret_clear_interval_ms", self.secret_clear_interval_ms),
            ("source_poll_interval_ms", self.source_poll_interval_ms),
        ] {
            if value == 0 {
                errors.push(ConfigError::ZeroInterval { name });
            }
        }

        for (name, value) in [
            ("proof_deadline_ms", self.proof_deadline_ms),
            ("proof_retry_deadline_ms", self.proof_retry_deadline_ms),
        ] {
            if value == 0 {
                errors.push(ConfigError::ZeroDeadline { name });
            }
        }

        if self.proof_retry_deadline_ms <= self.proof_deadline_ms {
            errors.push(ConfigError::RetryDeadlineNotLonger {
                first: self.proof_deadline_ms,
                retry: self.proof_retry_deadline_ms,
            });
        }

        ValidationReport { errors }
    }

    /// Substrings accepted in referrers.
    ///
    /// Falls back to the host of `source_url` when none are configured.
    pub fn effective_referrer_domains(&self) -> Vec<String> {
        if !self.referrer_domains.is_empty() {
            return self.referrer_domains.clone();
        }
        Url::parse(&self.source_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .into_iter()
            .collect()
    }

    /// Authorization window.
    pub fn access_duration(&self) -> Duration {
        Duration::from_millis(self.access_duration_ms)
    }

    /// Expired-session sweep period.
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// First proof deadline.
    pub fn proof_deadline(&self) -> Duration {
        Duration::from_millis(self.proof_deadline_ms)
    }

    /// Retry proof deadline.
    pub fn proof_retry_deadline(&self) -> Duration {
        Duration::from_millis(self.proof_retry_deadline_ms)
    }

    /// Shared secret wipe period.
    pub fn secret_clear_interval(&self) -> Duration {
        Duration::from_millis(self.secret_clear_interval_ms)
    }

    /// Source page observer period.
    pub fn source_poll_interval(&self) -> Duration {
        Duration::from_millis(self.source_poll_interval_ms)
    }
}

/// Result of [`AccessConfig::validate`].
#[derive(Debug, Default)]
pub struct ValidationReport {
    errors: Vec<ConfigError>,
}

impl ValidationReport {
    /// Returns true if no problems were found.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// The problems found, in discovery order.
    pub fn errors(&self) -> &[ConfigError] {
        &self.errors
    }

    /// Logs every problem at error level.
    pub fn report(&self) {
        for error in &self.errors {
            tracing::error!(%error, "configuration validation failed");
        }
    }

    /// Turns the report into a hard failure when problems were found.
    pub fn into_result(self) -> Result<(), ConfigError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(self.errors))
        }
    }
}
