//! Classification of URLs as source or protected.
//!
//! Protected matching is host based: a URL is protected when its host equals
//! a protected host, is a subdomain of one, or the URL text starts with a
//! configured protected URL. Source matching is a plain prefix test on the
//! URL text. The two are intentionally not symmetric.
//!
//! When a URL does not parse, classification falls back to substring
//! matching. The fallback may over-match; callers treat a false positive as
//! "ask for proof", which is safe.

use url::Url;

use crate::config::AccessConfig;

#[derive(Debug, Clone)]
struct ProtectedPattern {
    raw: String,
    host: Option<String>,
}

impl ProtectedPattern {
    fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            host: host_of(raw),
        }
    }

    /// Substring test used when either side fails to parse.
    fn matches_loosely(&self, url: &str) -> bool {
        url.contains(&self.raw) || url.contains(strip_scheme(&self.raw))
    }
}

/// Decides whether URLs are protected or belong to the source page.
#[derive(Debug, Clone)]
pub struct UrlClassifier {
    source_url: String,
    protected: Vec<ProtectedPattern>,
    allow_subdomains: bool,
    strict: bool,
}

impl UrlClassifier {
    /// Builds a classifier from the configured patterns and matching flags.
    pub fn new(config: &AccessConfig) -> Self {
        Self {
            source_url: config.source_url.clone(),
            protected: config
                .protected_urls
                .iter()
                .map(|raw| ProtectedPattern::new(raw))
                .collect(),
            allow_subdomains: config.allow_subdomains,
            strict: config.strict_domain_matching,
        }
    }

    /// Returns true if `url` points at a protected resource.
    ///
    /// # Examples
    ///
    /// ```
    /// use referral_gate::{AccessConfig, UrlClassifier};
    ///
    /// let config = AccessConfig::new("https://source.example/", ["https://protected.example"]);
    /// let classifier = UrlClassifier::new(&config);
    ///
    /// assert!(classifier.is_protected_url("https://protected.example/page"));
    /// assert!(classifier.is_protected_url("https://docs.protected.example/"));
    /// assert!(!classifier.is_protected_url("https://unprotected.example/"));
    /// ```
    pub fn is_protected_url(&self, url: &str) -> bool {
        if url.is_empty() {
            return false;
        }

        let Some(host) = host_of(url) else {
            return self.protected.iter().any(|p| p.matches_loosely(url));
        };

        self.protected.iter().any(|pattern| match &pattern.host {
            Some(protected_host) => {
                self.host_matches(&host, protected_host) || url.starts_with(&pattern.raw)
            }
            None => pattern.matches_loosely(url),
        })
    }

    /// Returns true if `url` starts with the configured source URL.
    pub fn is_source_url(&self, url: &str) -> bool {
        url.starts_with(&self.source_url)
    }

    fn host_matches(&self, host: &str, protected_host: &str) -> bool {
        if host == protected_host {
            return true;
        }
        if self.allow_subdomains
            && host
                .strip_suffix(protected_host)
                .is_some_and(|prefix| prefix.ends_with('.'))
        {
            return true;
        }
        !self.strict && host.contains(protected_host)
    }
}

/// Returns the lowercase host of `url`, if it parses and has one.
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_ascii_lowercase))
}

/// Returns the domain a session for `url` is keyed on.
///
/// Uses the parsed host when possible, otherwise the text between the scheme
/// and the first path, query, fragment or port delimiter.
pub fn domain_key(url: &str) -> String {
    if let Some(host) = host_of(url) {
        return host;
    }
    let rest = strip_scheme(url);
    let end = rest
        .find(|c| matches!(c, '/' | '?' | '#' | ':'))
        .unwrap_or(rest.len());
    rest[..end].to_ascii_lowercase()
}

fn strip_scheme(url: &str) -> &str {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
}
