//! Bounded in-memory record of access events.

use std::collections::VecDeque;

use super::{AccessEvent, AccessEventKind};

const DEFAULT_CAPACITY: usize = 1024;

/// Most recent access events, oldest dropped first once full.
///
/// ```
/// use referral_gate::TabId;
/// use referral_gate::audit::{AccessEvent, AccessEventKind, AuditTrail};
///
/// let mut trail = AuditTrail::with_capacity(2);
/// for tab in 1..=3 {
///     trail.record(AccessEvent::new(TabId(tab), "p.example", AccessEventKind::Granted));
/// }
///
/// assert_eq!(trail.len(), 2);
/// assert_eq!(trail.events().next().unwrap().tab_id(), TabId(2));
/// ```
#[derive(Debug, Clone)]
pub struct AuditTrail {
    events: VecDeque<AccessEvent>,
    capacity: usize,
}

impl AuditTrail {
    /// Creates an empty trail with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates an empty trail holding at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Emits `event` and appends it.
    pub fn record(&mut self, event: AccessEvent) {
        event.emit();
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Recorded events, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &AccessEvent> {
        self.events.iter()
    }

    /// Recorded events of one kind, oldest first.
    pub fn of_kind(&self, kind: AccessEventKind) -> impl Iterator<Item = &AccessEvent> {
        self.events.iter().filter(move |event| event.kind() == kind)
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drops every recorded event.
    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}
