#![forbid(unsafe_code)]

//! Two-counter revision bookkeeping.
//!
//! # Design
//!
//! Every identity carries a **structural** and a **carried** revision, both
//! starting at 1. Structural moves only when the set/order/identity of
//! directly-contained children changes or availability transitions; carried
//! moves whenever anything inside the subtree moves. A structural change is
//! also a carried change, so `bump_structural` advances both counters.
//!
//! # Invariants
//!
//! 1. Counters are monotonic and never reset while the identity lives.
//! 2. `carried >= structural` movement: any structural bump is visible in
//!    both counters.
//! 3. Equality of a previously observed [`Revision`] pair is proof nothing
//!    changed since that observation.

use ahash::AHashMap;

use crate::identity::Identity;

/// Snapshot of the two revision counters for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revision {
    pub structural: u64,
    pub carried: u64,
}

impl Revision {
    /// Counters start at 1 for a freshly minted identity.
    pub const INITIAL: Self = Self {
        structural: 1,
        carried: 1,
    };
}

/// Pure revision bookkeeping; no side effects beyond the counters.
#[derive(Debug, Default)]
pub struct RevisionTracker {
    revs: AHashMap<Identity, Revision>,
}

impl RevisionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the structural counter (and, implicitly, the carried one).
    pub fn bump_structural(&mut self, id: Identity) -> Revision {
        let rev = self.revs.entry(id).or_insert(Revision::INITIAL);
        rev.structural += 1;
        rev.carried += 1;
        *rev
    }

    /// Advance the carried counter only.
    pub fn bump_carried(&mut self, id: Identity) -> Revision {
        let rev = self.revs.entry(id).or_insert(Revision::INITIAL);
        rev.carried += 1;
        *rev
    }

    /// Current counters. Identities never bumped sit at [`Revision::INITIAL`].
    #[must_use]
    pub fn read(&self, id: Identity) -> Revision {
        self.revs.get(&id).copied().unwrap_or(Revision::INITIAL)
    }

    /// Drop counters for a released identity.
    pub fn forget(&mut self, id: Identity) {
        self.revs.remove(&id);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityRegistry;
    use crate::value::TypeTag;

    fn fresh() -> (RevisionTracker, Identity) {
        let mut reg = IdentityRegistry::new();
        (RevisionTracker::new(), reg.allocate(TypeTag::List))
    }

    #[test]
    fn starts_at_one_one() {
        let (revs, id) = fresh();
        assert_eq!(revs.read(id), Revision::INITIAL);
        assert_eq!(Revision::INITIAL.structural, 1);
        assert_eq!(Revision::INITIAL.carried, 1);
    }

    #[test]
    fn structural_bump_advances_both() {
        let (mut revs, id) = fresh();
        let rev = revs.bump_structural(id);
        assert_eq!(rev.structural, 2);
        assert_eq!(rev.carried, 2);
    }

    #[test]
    fn carried_bump_leaves_structural() {
        let (mut revs, id) = fresh();
        let rev = revs.bump_carried(id);
        assert_eq!(rev.structural, 1);
        assert_eq!(rev.carried, 2);
    }

    #[test]
    fn counters_are_monotonic() {
        let (mut revs, id) = fresh();
        let mut last = revs.read(id);
        for step in 0..20 {
            let rev = if step % 3 == 0 {
                revs.bump_structural(id)
            } else {
                revs.bump_carried(id)
            };
            assert!(rev.structural >= last.structural);
            assert!(rev.carried > last.carried);
            last = rev;
        }
    }

    #[test]
    fn equality_means_unchanged() {
        let (mut revs, id) = fresh();
        revs.bump_structural(id);
        let observed = revs.read(id);
        assert_eq!(revs.read(id), observed);
        revs.bump_carried(id);
        assert_ne!(revs.read(id), observed);
    }

    #[test]
    fn forget_resets_to_initial_for_new_tenant() {
        let (mut revs, id) = fresh();
        revs.bump_structural(id);
        revs.forget(id);
        // A forgotten identity is gone; reads report the initial pair. The
        // registry never reuses identities, so no live observer can confuse
        // the two tenancies.
        assert_eq!(revs.read(id), Revision::INITIAL);
    }
}
