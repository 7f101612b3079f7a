//! Checks on the evidence a tab presents for its arrival.
//!
//! Two independent mechanisms exist, one per deployment variant:
//! - **referrer**: the document's referrer must contain a source domain
//! - **token**: the URL fragment must carry the current shared secret
//!
//! Either way the result is an [`ArrivalCap`] or a [`DenyReason`].

use std::fmt;

use crate::capability::{ArrivalCap, ProofKind};
use crate::config::AccessConfig;
use crate::relay::{SecretRelay, SecretStorage};
use crate::secret::CapabilityToken;

/// Why a tab was refused access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The page reported no referrer (typed URL, bookmark, ...)
    MissingReferrer,
    /// The referrer names no source domain
    ForeignReferrer,
    /// The page did not answer within both deadlines
    NoAnswer,
    /// The page could not be reached at all
    Unreachable,
    /// The URL carried no token
    MissingToken,
    /// The token does not match the shared secret
    InvalidToken,
    /// The page answered with something other than a referrer
    UnexpectedAnswer,
    /// The protected URL has no host to key a session on
    MalformedUrl,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::MissingReferrer => write!(f, "missing referrer"),
            DenyReason::ForeignReferrer => write!(f, "referrer not from source"),
            DenyReason::NoAnswer => write!(f, "page did not answer"),
            DenyReason::Unreachable => write!(f, "page unreachable"),
            DenyReason::MissingToken => write!(f, "missing token"),
            DenyReason::InvalidToken => write!(f, "invalid token"),
            DenyReason::UnexpectedAnswer => write!(f, "unexpected page answer"),
            DenyReason::MalformedUrl => write!(f, "malformed protected URL"),
        }
    }
}

/// Validates referrers and capability tokens.
#[derive(Debug, Clone)]
pub struct Validator {
    referrer_domains: Vec<String>,
}

impl Validator {
    /// Creates a validator accepting the configured referrer domains.
    pub fn new(config: &AccessConfig) -> Self {
        Self {
            referrer_domains: config.effective_referrer_domains(),
        }
    }

    /// Returns true iff `referrer` is non-empty and contains a source domain.
    ///
    /// # Examples
    ///
    /// ```
    /// use referral_gate::{AccessConfig, Validator};
    ///
    /// let config = AccessConfig::new("https://source.example/", ["https://protected.example"]);
    /// let validator = Validator::new(&config);
    ///
    /// assert!(validator.is_valid_referrer("https://source.example/dashboard"));
    /// assert!(!validator.is_valid_referrer(""));
    /// ```
    pub fn is_valid_referrer(&self, referrer: &str) -> bool {
        if referrer.is_empty() {
            return false;
        }
        self.referrer_domains
            .iter()
            .any(|domain| !domain.is_empty() && referrer.contains(domain.as_str()))
    }

    /// Issues an [`ArrivalCap`] for a valid referrer.
    pub fn verify_referrer(&self, referrer: &str) -> Result<ArrivalCap, DenyReason> {
        if referrer.is_empty() {
            Err(DenyReason::MissingReferrer)
        } else if self.is_valid_referrer(referrer) {
            Ok(ArrivalCap::new(ProofKind::Referrer))
        } else {
            Err(DenyReason::ForeignReferrer)
        }
    }

    /// Issues an [`ArrivalCap`] if `token` matches the relay's current secret.
    pub async fn verify_token<S: SecretStorage>(
        &self,
        relay: &SecretRelay<S>,
        token: Option<&CapabilityToken>,
    ) -> Result<ArrivalCap, DenyReason> {
        let token = token.ok_or(DenyReason::MissingToken)?;
        if relay.validate_token(token.expose()).await {
            Ok(ArrivalCap::new(ProofKind::Token))
        } else {
            Err(DenyReason::InvalidToken)
        }
    }
}

/// Extracts the token from a URL fragment of the form `#<token>|<extra>`.
///
/// The leading `#` is optional. An empty token yields `None`.
///
/// ```
/// use referral_gate::token_from_fragment;
///
/// assert_eq!(token_from_fragment("#xyz123|extra").unwrap().expose(), "xyz123");
/// assert!(token_from_fragment("#").is_none());
/// ```
pub fn token_from_fragment(fragment: &str) -> Option<CapabilityToken> {
    let fragment = fragment.strip_prefix('#').unwrap_or(fragment);
    let token = fragment.split('|').next().unwrap_or_default();
    if token.is_empty() {
        None
    } else {
        Some(CapabilityToken::new(token))
    }
}

/// Extracts the fragment token of a full URL; no fragment means no token.
pub fn token_from_url(url: &str) -> Option<CapabilityToken> {
    let (_, fragment) = url.split_once('#')?;
    token_from_fragment(fragment)
}
