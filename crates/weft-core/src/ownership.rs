#![forbid(unsafe_code)]

//! Single-parent containment forest.
//!
//! # Design
//!
//! Ownership carries deep changes upward: when a child's revision moves, the
//! engine walks the child's ancestor chain and bumps each ancestor's carried
//! revision. The relation is a forest — every identity has at most one
//! owner, and attachment refuses both a second owner and any attachment that
//! would make an identity its own ancestor. With those refusals in place,
//! [`walk_ancestors`] always terminates and no runtime cycle detection is
//! needed here.
//!
//! Non-owning references never enter this structure; they are `Value::Ref`
//! leaves that participate only in subscriptions.
//!
//! [`walk_ancestors`]: OwnershipTree::walk_ancestors

use ahash::AHashMap;

use crate::error::EngineError;
use crate::identity::Identity;

/// The single-parent containment relation.
#[derive(Debug, Default)]
pub struct OwnershipTree {
    parent: AHashMap<Identity, Identity>,
}

impl OwnershipTree {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `parent` as the owner of `child`.
    ///
    /// Re-attaching to the current owner is a no-op. Attaching to a second
    /// owner is an [`EngineError::OwnershipConflict`]; the caller must
    /// deep-copy on assign or use a non-owning ref instead. Attachments that
    /// would make `child` its own ancestor are refused the same way.
    pub fn attach(&mut self, child: Identity, parent: Identity) -> Result<(), EngineError> {
        if let Some(&existing) = self.parent.get(&child) {
            if existing == parent {
                return Ok(());
            }
            #[cfg(feature = "tracing")]
            tracing::trace!(%child, %existing, %parent, "attach refused: already owned");
            return Err(EngineError::OwnershipConflict {
                child,
                existing,
                requested: parent,
            });
        }
        if child == parent || self.walk_ancestors(parent).any(|a| a == child) {
            return Err(EngineError::OwnershipConflict {
                child,
                existing: parent,
                requested: parent,
            });
        }
        self.parent.insert(child, parent);
        Ok(())
    }

    /// Remove `child` from its container. Returns the former owner.
    pub fn detach(&mut self, child: Identity) -> Option<Identity> {
        self.parent.remove(&child)
    }

    /// Current owner, if any.
    #[must_use]
    pub fn owner(&self, child: Identity) -> Option<Identity> {
        self.parent.get(&child).copied()
    }

    /// Ancestors from the immediate owner to the root. Terminates because
    /// the relation is a forest.
    pub fn walk_ancestors(&self, id: Identity) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            cursor: self.owner(id),
        }
    }

    /// Whether `ancestor` contains `id` at any depth.
    #[must_use]
    pub fn is_ancestor(&self, ancestor: Identity, id: Identity) -> bool {
        self.walk_ancestors(id).any(|a| a == ancestor)
    }
}

/// Iterator over an identity's ancestor chain, nearest first.
#[derive(Debug)]
pub struct Ancestors<'a> {
    tree: &'a OwnershipTree,
    cursor: Option<Identity>,
}

impl Iterator for Ancestors<'_> {
    type Item = Identity;

    fn next(&mut self) -> Option<Identity> {
        let current = self.cursor?;
        self.cursor = self.tree.owner(current);
        Some(current)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
