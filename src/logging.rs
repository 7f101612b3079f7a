use std::borrow::Cow;
use std::fmt;

use crate::browser::TabId;

/// Tab-scoped logger used while deciding on one navigation.
///
/// Every event carries the `tab_id` and `url` fields. The URL fragment is
/// replaced with `[REDACTED]` because in the token variant it holds the
/// capability token.
#[derive(Debug)]
pub(crate) struct TabLog<'a> {
    tab_id: TabId,
    url: Cow<'a, str>,
}

impl<'a> TabLog<'a> {
    pub(crate) fn new(tab_id: TabId, url: &'a str) -> Self {
        Self {
            tab_id,
            url: redact_fragment(url),
        }
    }

    pub(crate) fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(tab_id = %self.tab_id, url = %self.url, "{}", args);
    }

    pub(crate) fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(tab_id = %self.tab_id, url = %self.url, "{}", args);
    }

    pub(crate) fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(tab_id = %self.tab_id, url = %self.url, "{}", args);
    }
}

/// Replaces everything after the first `#` with `[REDACTED]`.
pub(crate) fn redact_fragment(url: &str) -> Cow<'_, str> {
    match url.split_once('#') {
        Some((base, fragment)) if !fragment.is_empty() => Cow::Owned(format!("{base}#[REDACTED]")),
        _ => Cow::Borrowed(url),
    }
}
