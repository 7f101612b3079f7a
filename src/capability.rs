/// Which kind of evidence produced an [`ArrivalCap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofKind {
    /// The page's referrer named a source domain
    Referrer,
    /// The URL carried the current shared secret
    Token,
}

/// Proof that a tab arrived at a protected page through an authorized path.
///
/// A session can only be granted with one of these in hand. It cannot be
/// constructed outside this crate; the [`Validator`](crate::Validator) hands
/// one out after a referrer or token has checked out.
///
/// ```compile_fail
/// # use referral_gate::{ArrivalCap, ProofKind};
/// // Does not compile: the constructor is private to the crate.
/// let cap = ArrivalCap { kind: ProofKind::Referrer, _private: () };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrivalCap {
    kind: ProofKind,
    // Private field prevents construction outside the crate
    _private: (),
}

impl ArrivalCap {
    /// Creates a new capability.
    ///
    /// Only validation code may call this.
    pub(crate) fn new(kind: ProofKind) -> Self {
        Self { kind, _private: () }
    }

    /// The evidence this capability was issued for.
    pub fn kind(&self) -> ProofKind {
        self.kind
    }
}
