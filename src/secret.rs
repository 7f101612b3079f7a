use std::fmt;

/// A capability token value that never shows up in logs.
///
/// Tokens travel from the source page to the protected page through the
/// shared secret slot. Anyone who reads one can replay it until the slot is
/// cleared, so the value is kept out of every formatted output.
///
/// # Security Properties
///
/// - Debug and Display output is always `[REDACTED]`
/// - No `Deref`, `AsRef` or `Borrow`; the value is read through
///   [`expose`](Self::expose) only
/// - Equality is exact, byte for byte
///
/// # Examples
///
/// ```
/// use referral_gate::CapabilityToken;
///
/// let token = CapabilityToken::new("xyz123");
/// assert_eq!(format!("{token:?}"), "[REDACTED]");
/// assert_eq!(token.expose(), "xyz123");
/// ```
// Do NOT derive Debug or implement Display with the value; see below.
#[derive(Clone, PartialEq, Eq)]
pub struct CapabilityToken {
    // Must stay private: a public field would bypass redaction.
    value: String,
}

impl CapabilityToken {
    /// Wraps a token value.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Returns the raw token value.
    ///
    /// Callers must not log or display the result.
    pub fn expose(&self) -> &str {
        &self.value
    }

    /// Returns true if `candidate` is exactly this token.
    pub fn matches(&self, candidate: &str) -> bool {
        self.value == candidate
    }
}

impl fmt::Debug for CapabilityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for CapabilityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}
