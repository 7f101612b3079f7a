//! Access event schema.

use std::fmt;

use crate::browser::TabId;
use crate::capability::ProofKind;
use crate::validator::DenyReason;

/// Kind of access transition being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessEventKind {
    /// A session was granted
    Granted,
    /// A navigation was refused and redirected
    Denied,
    /// A session was revoked explicitly
    Revoked,
    /// A session's timer ran out
    Expired,
    /// The periodic sweep removed a session whose timer was lost
    Swept,
    /// A session ended because its tab closed
    TabClosed,
    /// A navigation was let through by the development bypass
    Bypassed,
}

impl fmt::Display for AccessEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessEventKind::Granted => write!(f, "granted"),
            AccessEventKind::Denied => write!(f, "denied"),
            AccessEventKind::Revoked => write!(f, "revoked"),
            AccessEventKind::Expired => write!(f, "expired"),
            AccessEventKind::Swept => write!(f, "swept"),
            AccessEventKind::TabClosed => write!(f, "tab_closed"),
            AccessEventKind::Bypassed => write!(f, "bypassed"),
        }
    }
}

/// One recorded access transition.
///
/// ```
/// use referral_gate::TabId;
/// use referral_gate::audit::{AccessEvent, AccessEventKind};
///
/// let event = AccessEvent::new(TabId(3), "protected.example", AccessEventKind::Revoked);
/// assert_eq!(event.to_string(), "AccessEvent[kind=revoked, tab=3, domain=protected.example]");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEvent {
    tab_id: TabId,
    domain: String,
    kind: AccessEventKind,
    proof: Option<ProofKind>,
    reason: Option<DenyReason>,
}

impl AccessEvent {
    /// Creates an event with no proof or reason attached.
    pub fn new(tab_id: TabId, domain: impl Into<String>, kind: AccessEventKind) -> Self {
        Self {
            tab_id,
            domain: domain.into(),
            kind,
            proof: None,
            reason: None,
        }
    }

    /// Attaches the evidence a grant was based on.
    pub fn with_proof(mut self, proof: ProofKind) -> Self {
        self.proof = Some(proof);
        self
    }

    /// Attaches the reason for a denial.
    pub fn with_reason(mut self, reason: DenyReason) -> Self {
        self.reason = Some(reason);
        self
    }

    /// Tab concerned.
    pub fn tab_id(&self) -> TabId {
        self.tab_id
    }

    /// Protected host concerned.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// What happened.
    pub fn kind(&self) -> AccessEventKind {
        self.kind
    }

    /// Evidence of a grant, if any.
    pub fn proof(&self) -> Option<ProofKind> {
        self.proof
    }

    /// Reason of a denial, if any.
    pub fn reason(&self) -> Option<DenyReason> {
        self.reason
    }

    /// Emits the event on the `access_audit` tracing target.
    pub fn emit(&self) {
        tracing::info!(
            target: "access_audit",
            tab_id = %self.tab_id,
            domain = %self.domain,
            kind = %self.kind,
            proof = ?self.proof,
            reason = ?self.reason,
            "access event"
        );
    }
}

impl fmt::Display for AccessEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AccessEvent[kind={}, tab={}, domain={}",
            self.kind, self.tab_id, self.domain
        )?;
        if let Some(proof) = self.proof {
            write!(f, ", proof={:?}", proof)?;
        }
        if let Some(reason) = self.reason {
            write!(f, ", reason={}", reason)?;
        }
        write!(f, "]")
    }
}
