#![forbid(unsafe_code)]

//! Identity tokens and the registry that mints them.
//!
//! # Design
//!
//! An [`Identity`] is an opaque process-unique `u64`. Two minting paths exist:
//!
//! - [`IdentityRegistry::intern`] hash-conses leaf constants: equal leaves
//!   map to the same identity, and interned identities are never released.
//! - [`IdentityRegistry::allocate`] hands out fresh identities for mutable
//!   composites. An allocated identity stays stable across in-place content
//!   changes and is never reused after release.
//!
//! # Invariants
//!
//! 1. `intern(l) == intern(l)` for equal leaves `l` (deduplication).
//! 2. `allocate` never returns an identity that was ever minted before.
//! 3. Releasing an identity that is not a member, or an interned identity,
//!    is a logic fault (debug assertion; silently ignored in release builds).

use ahash::AHashMap;

use crate::value::{Leaf, TypeTag};

/// Stable, process-unique handle for a datum, independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(u64);

impl Identity {
    /// Raw numeric token, for diagnostics and logging only.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How an identity was minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    /// Hash-consed leaf constant; immortal, payload immutable.
    Interned,
    /// Monotonically allocated composite; mutable in place, releasable.
    Allocated,
}

#[derive(Debug, Clone, Copy)]
struct Member {
    tag: TypeTag,
    kind: IdentityKind,
}

/// Mints and owns identities. One registry per engine instance.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    next: u64,
    members: AHashMap<Identity, Member>,
    interned: AHashMap<Leaf, Identity>,
}

impl IdentityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh identity for a mutable composite value.
    pub fn allocate(&mut self, tag: TypeTag) -> Identity {
        let id = self.mint();
        self.members.insert(
            id,
            Member {
                tag,
                kind: IdentityKind::Allocated,
            },
        );
        id
    }

    /// Return the canonical identity for a leaf constant, minting one on
    /// first use. Equal leaves always map to the same identity.
    pub fn intern(&mut self, leaf: Leaf) -> Identity {
        if let Some(&id) = self.interned.get(&leaf) {
            return id;
        }
        let id = self.mint();
        self.members.insert(
            id,
            Member {
                tag: leaf.type_tag(),
                kind: IdentityKind::Interned,
            },
        );
        self.interned.insert(leaf, id);
        id
    }

    /// Remove an allocated identity when its owning scope is torn down.
    ///
    /// The caller is responsible for cascading removal in the revision,
    /// availability, ownership, and subscription structures. Releasing a
    /// non-member or an interned identity is a logic fault.
    pub fn release(&mut self, id: Identity) {
        match self.members.get(&id) {
            Some(m) if m.kind == IdentityKind::Allocated => {
                self.members.remove(&id);
            }
            Some(_) => debug_assert!(false, "released interned identity {id}"),
            None => debug_assert!(false, "released non-member identity {id}"),
        }
    }

    /// Whether the identity is a current member of the registry.
    #[must_use]
    pub fn contains(&self, id: Identity) -> bool {
        self.members.contains_key(&id)
    }

    #[must_use]
    pub fn kind_of(&self, id: Identity) -> Option<IdentityKind> {
        self.members.get(&id).map(|m| m.kind)
    }

    #[must_use]
    pub fn type_of(&self, id: Identity) -> Option<TypeTag> {
        self.members.get(&id).map(|m| m.tag)
    }

    /// Number of live members (interned and allocated).
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn mint(&mut self) -> Identity {
        self.next += 1;
        Identity(self.next)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_is_unique() {
        let mut reg = IdentityRegistry::new();
        let a = reg.allocate(TypeTag::List);
        let b = reg.allocate(TypeTag::List);
        assert_ne!(a, b);
        assert_eq!(reg.kind_of(a), Some(IdentityKind::Allocated));
    }

    #[test]
    fn intern_deduplicates() {
        let mut reg = IdentityRegistry::new();
        let a = reg.intern(Leaf::Int(42));
        let b = reg.intern(Leaf::Int(42));
        let c = reg.intern(Leaf::Int(43));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(reg.kind_of(a), Some(IdentityKind::Interned));
    }

    #[test]
    fn intern_distinguishes_types() {
        let mut reg = IdentityRegistry::new();
        let int = reg.intern(Leaf::Int(1));
        let boolean = reg.intern(Leaf::Bool(true));
        assert_ne!(int, boolean);
        assert_eq!(reg.type_of(int), Some(TypeTag::Int));
        assert_eq!(reg.type_of(boolean), Some(TypeTag::Bool));
    }

    #[test]
    fn float_interns_by_bit_pattern() {
        let mut reg = IdentityRegistry::new();
        let a = reg.intern(Leaf::float(1.5));
        let b = reg.intern(Leaf::float(1.5));
        let c = reg.intern(Leaf::float(-1.5));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn release_removes_membership() {
        let mut reg = IdentityRegistry::new();
        let a = reg.allocate(TypeTag::Record);
        assert!(reg.contains(a));
        reg.release(a);
        assert!(!reg.contains(a));
    }

    #[test]
    fn released_identity_is_never_reused() {
        let mut reg = IdentityRegistry::new();
        let a = reg.allocate(TypeTag::List);
        reg.release(a);
        let b = reg.allocate(TypeTag::List);
        assert_ne!(a, b);
    }

    #[test]
    #[should_panic(expected = "non-member")]
    #[cfg(debug_assertions)]
    fn release_of_non_member_asserts() {
        let mut reg = IdentityRegistry::new();
        let a = reg.allocate(TypeTag::List);
        reg.release(a);
        reg.release(a);
    }

    #[test]
    #[should_panic(expected = "interned")]
    #[cfg(debug_assertions)]
    fn release_of_interned_asserts() {
        let mut reg = IdentityRegistry::new();
        let a = reg.intern(Leaf::Bool(false));
        reg.release(a);
    }

    #[test]
    fn display_is_hash_prefixed() {
        let mut reg = IdentityRegistry::new();
        let a = reg.allocate(TypeTag::Map);
        assert_eq!(format!("{a}"), format!("#{}", a.raw()));
    }
}
