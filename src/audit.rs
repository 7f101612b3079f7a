//! Audit records of access decisions.
//!
//! Every security-relevant transition of the gatekeeper produces an
//! [`AccessEvent`]. Events are emitted as structured `tracing` events on the
//! `access_audit` target and kept in a bounded in-memory [`AuditTrail`].
//!
//! Events hold only tab ids, hosts and reasons; never tokens or full URLs.

mod event;
mod trail;

pub use event::{AccessEvent, AccessEventKind};
pub use trail::AuditTrail;
