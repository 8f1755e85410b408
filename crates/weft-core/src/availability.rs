#![forbid(unsafe_code)]

//! Availability lifecycle: loading / ready / error.
//!
//! # Design
//!
//! Availability is data, not an exception channel. In-flight values sit at
//! `Loading`, producer failures surface as `Error(fault)`, and both compose
//! across dependency chains by the severity rule `Error > Loading > Ready`
//! (most severe wins, first error encountered is kept).
//!
//! Setting a new availability is itself a structural event: [`set`]
//! advances the structural revision of the same identity. When availability
//! leaves `Ready` the payload becomes undefined; clearing the stored payload
//! is the caller's side of that contract, signalled by the return value.
//!
//! [`set`]: AvailabilityTracker::set

use std::sync::Arc;

use ahash::AHashMap;

use crate::identity::Identity;
use crate::revision::RevisionTracker;

/// Domain-level failure details carried by `Availability::Error`.
///
/// This is data that flows through the graph like any other value, not an
/// engine fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    message: Arc<str>,
}

impl Fault {
    #[must_use]
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Whether a datum's payload is currently defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    /// Value is in flight; payload undefined.
    Loading,
    /// Payload is defined.
    Ready,
    /// A failure occurred somewhere upstream; payload undefined.
    Error(Fault),
}

impl Availability {
    #[must_use]
    pub fn error(message: impl Into<Arc<str>>) -> Self {
        Self::Error(Fault::new(message))
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Severity rank: `Error > Loading > Ready`.
    #[must_use]
    pub fn severity(&self) -> u8 {
        match self {
            Self::Ready => 0,
            Self::Loading => 1,
            Self::Error(_) => 2,
        }
    }

    /// Fold two availabilities, keeping the most severe. On equal-severity
    /// errors the left (first observed) fault wins.
    #[must_use]
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

/// Per-identity availability state and the propagation rule.
#[derive(Debug, Default)]
pub struct AvailabilityTracker {
    states: AHashMap<Identity, Availability>,
}

impl AvailabilityTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current availability. Identities never set are `Ready` (constants and
    /// plain data nodes are born with a defined payload).
    #[must_use]
    pub fn get(&self, id: Identity) -> Availability {
        self.states.get(&id).cloned().unwrap_or(Availability::Ready)
    }

    /// Transition an identity's availability.
    ///
    /// A genuine transition is a structural event and bumps the structural
    /// revision of `id`. Returns `true` when the state actually changed; if
    /// the transition left `Ready`, the caller must mark the payload
    /// undefined.
    pub fn set(
        &mut self,
        revisions: &mut RevisionTracker,
        id: Identity,
        availability: Availability,
    ) -> bool {
        let previous = self.get(id);
        if previous == availability {
            return false;
        }
        self.states.insert(id, availability);
        revisions.bump_structural(id);
        true
    }

    /// Initialize state for a freshly created identity without treating it
    /// as a transition; no revision bump, no caller obligations.
    pub fn seed(&mut self, id: Identity, availability: Availability) {
        self.states.insert(id, availability);
    }

    /// Apply the severity rule over a dependency set.
    ///
    /// An empty set yields `Ready` (constant derived stores).
    #[must_use]
    pub fn derive<I>(&self, dependencies: I) -> Availability
    where
        I: IntoIterator<Item = Identity>,
    {
        let mut worst = Availability::Ready;
        for dep in dependencies {
            worst = worst.worst(self.get(dep));
            if let Availability::Error(_) = worst {
                break;
            }
        }
        worst
    }

    /// Drop state for a released identity.
    pub fn forget(&mut self, id: Identity) {
        self.states.remove(&id);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityRegistry;
    use crate::revision::RevisionTracker;
    use crate::value::TypeTag;

    fn ids(n: usize) -> Vec<Identity> {
        let mut reg = IdentityRegistry::new();
        (0..n).map(|_| reg.allocate(TypeTag::Int)).collect()
    }

    #[test]
    fn severity_ordering() {
        assert!(Availability::error("boom").severity() > Availability::Loading.severity());
        assert!(Availability::Loading.severity() > Availability::Ready.severity());
    }

    #[test]
    fn worst_prefers_first_error() {
        let a = Availability::error("first");
        let b = Availability::error("second");
        assert_eq!(a.clone().worst(b), a);
    }

    #[test]
    fn default_is_ready() {
        let avail = AvailabilityTracker::new();
        let id = ids(1)[0];
        assert!(avail.get(id).is_ready());
    }

    #[test]
    fn set_is_a_structural_event() {
        let mut avail = AvailabilityTracker::new();
        let mut revs = RevisionTracker::new();
        let id = ids(1)[0];
        let before = revs.read(id);
        assert!(avail.set(&mut revs, id, Availability::Loading));
        let after = revs.read(id);
        assert_eq!(after.structural, before.structural + 1);
    }

    #[test]
    fn redundant_set_is_silent() {
        let mut avail = AvailabilityTracker::new();
        let mut revs = RevisionTracker::new();
        let id = ids(1)[0];
        avail.set(&mut revs, id, Availability::Loading);
        let before = revs.read(id);
        assert!(!avail.set(&mut revs, id, Availability::Loading));
        assert_eq!(revs.read(id), before);
    }

    #[test]
    fn derive_empty_is_ready() {
        let avail = AvailabilityTracker::new();
        assert_eq!(avail.derive(std::iter::empty()), Availability::Ready);
    }

    #[test]
    fn derive_loading_beats_ready() {
        let mut avail = AvailabilityTracker::new();
        let mut revs = RevisionTracker::new();
        let deps = ids(2);
        avail.set(&mut revs, deps[1], Availability::Loading);
        assert_eq!(avail.derive(deps), Availability::Loading);
    }

    #[test]
    fn derive_error_beats_loading() {
        let mut avail = AvailabilityTracker::new();
        let mut revs = RevisionTracker::new();
        let deps = ids(3);
        avail.set(&mut revs, deps[0], Availability::Loading);
        avail.set(&mut revs, deps[2], Availability::error("fetch failed"));
        assert_eq!(avail.derive(deps), Availability::error("fetch failed"));
    }

    #[test]
    fn derive_all_ready_is_ready() {
        let avail = AvailabilityTracker::new();
        assert_eq!(avail.derive(ids(4)), Availability::Ready);
    }

    #[test]
    fn fault_displays_message() {
        assert_eq!(Fault::new("no route").to_string(), "no route");
    }
}
