//! In-memory session records and their expiry timers.
//!
//! Each (tab, domain) pair has at most one [`SessionRecord`], and each record
//! owns exactly one expiry timer. The timer is a spawned sleep that, when it
//! wakes, posts an [`Expiry`] message back to the owner of the store instead
//! of touching the store itself; all mutation stays with the owner.
//!
//! Removing a record by any path cancels its timer. A timer that already
//! fired before the cancellation is recognised by its generation number and
//! ignored by [`SessionStore::expire`].

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::browser::TabId;
use crate::capability::{ArrivalCap, ProofKind};

/// Composite key of a session: tab plus protected host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Tab holding the session
    pub tab_id: TabId,
    /// Protected host the session covers
    pub domain: String,
}

impl SessionKey {
    /// Creates a key.
    pub fn new(tab_id: TabId, domain: impl Into<String>) -> Self {
        Self {
            tab_id,
            domain: domain.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.tab_id, self.domain)
    }
}

/// Message posted by a session's timer when its window has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry {
    key: SessionKey,
    generation: u64,
}

impl Expiry {
    /// The session this expiry is for.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }
}

#[derive(Debug)]
struct ExpiryTimer(AbortHandle);

impl ExpiryTimer {
    fn cancel(&self) {
        self.0.abort();
    }

    fn is_live(&self) -> bool {
        !self.0.is_finished()
    }
}

impl Drop for ExpiryTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Authorization of one tab for one protected host.
#[derive(Debug)]
pub struct SessionRecord {
    key: SessionKey,
    authorized_at: Instant,
    proof: ProofKind,
    generation: u64,
    timer: ExpiryTimer,
}

impl SessionRecord {
    /// Tab holding the session.
    pub fn tab_id(&self) -> TabId {
        self.key.tab_id
    }

    /// Protected host the session covers.
    pub fn domain(&self) -> &str {
        &self.key.domain
    }

    /// When the session was (last) granted.
    pub fn authorized_at(&self) -> Instant {
        self.authorized_at
    }

    /// Evidence the session was granted on.
    pub fn proof(&self) -> ProofKind {
        self.proof
    }

    fn detach(self) -> Self {
        self.timer.cancel();
        self
    }
}

/// The table of active sessions.
///
/// Only the methods below touch the table or its timers.
#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<SessionKey, SessionRecord>,
    access_duration: Duration,
    expiries: UnboundedSender<Expiry>,
    next_generation: u64,
}

impl SessionStore {
    /// Creates an empty store whose timers post to `expiries`.
    pub fn new(access_duration: Duration, expiries: UnboundedSender<Expiry>) -> Self {
        Self {
            sessions: HashMap::new(),
            access_duration,
            expiries,
            next_generation: 0,
        }
    }

    /// Returns true if `tab_id` holds a session for `domain`.
    pub fn is_authorized(&self, tab_id: TabId, domain: &str) -> bool {
        self.sessions.contains_key(&SessionKey::new(tab_id, domain))
    }

    /// Returns the session of `tab_id` for `domain`, if any.
    pub fn get(&self, tab_id: TabId, domain: &str) -> Option<&SessionRecord> {
        self.sessions.get(&SessionKey::new(tab_id, domain))
    }

    /// Grants `tab_id` access to `domain` for the configured duration.
    ///
    /// An existing session for the same key is replaced: its timer is
    /// cancelled and the clock restarts. Must be called within a Tokio
    /// runtime.
    pub fn grant(&mut self, tab_id: TabId, domain: &str, cap: ArrivalCap) -> &SessionRecord {
        let key = SessionKey::new(tab_id, domain);
        let generation = self.next_generation;
        self.next_generation += 1;

        let expiry = Expiry {
            key: key.clone(),
            generation,
        };
        let sender = self.expiries.clone();
        let authorized_at = Instant::now();
        let deadline = authorized_at + self.access_duration;
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // the owner may already be gone; nothing left to expire then
            let _ = sender.send(expiry);
        });

        let record = SessionRecord {
            key: key.clone(),
            authorized_at,
            proof: cap.kind(),
            generation,
            timer: ExpiryTimer(handle.abort_handle()),
        };

        if let Some(previous) = self.sessions.insert(key.clone(), record) {
            previous.timer.cancel();
            tracing::debug!(session = %key, "replaced existing session");
        }

        &self.sessions[&key]
    }

    /// Removes the session of `tab_id` for `domain` and cancels its timer.
    ///
    /// Returns the removed record; revoking a missing session is a no-op.
    pub fn revoke(&mut self, tab_id: TabId, domain: &str) -> Option<SessionRecord> {
        self.sessions
            .remove(&SessionKey::new(tab_id, domain))
            .map(SessionRecord::detach)
    }

    /// Removes every session of `tab_id`, whatever the domain.
    pub fn cleanup_tab(&mut self, tab_id: TabId) -> Vec<SessionRecord> {
        let keys: Vec<SessionKey> = self
            .sessions
            .keys()
            .filter(|key| key.tab_id == tab_id)
            .cloned()
            .collect();

        keys.iter()
            .filter_map(|key| self.sessions.remove(key))
            .map(SessionRecord::detach)
            .collect()
    }

    /// Keys of sessions granted more than the access duration before `now`.
    pub fn expired(&self, now: Instant) -> Vec<SessionKey> {
        self.sessions
            .values()
            .filter(|record| {
                now.saturating_duration_since(record.authorized_at) > self.access_duration
            })
            .map(|record| record.key.clone())
            .collect()
    }

    /// Applies a timer's expiry message.
    ///
    /// Returns the removed record, or `None` if the session was already
    /// removed or re-granted after the timer was scheduled.
    pub fn expire(&mut self, expiry: &Expiry) -> Option<SessionRecord> {
        match self.sessions.get(&expiry.key) {
            Some(record) if record.generation == expiry.generation => {
                self.sessions.remove(&expiry.key).map(SessionRecord::detach)
            }
            _ => None,
        }
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns true if no session is active.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of timers still waiting to fire.
    pub fn live_timers(&self) -> usize {
        self.sessions
            .values()
            .filter(|record| record.timer.is_live())
            .count()
    }
}
