#![forbid(unsafe_code)]

//! Engine fault taxonomy.
//!
//! These are programming errors in the constructed graph, reported
//! synchronously to the graph producer. Domain-level failures (a producer's
//! failed fetch, an upstream still loading) are **not** here: they travel
//! through [`crate::availability::Availability`] like any other data.

use thiserror::Error;

use crate::identity::Identity;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A composite value was assigned into a second owning position without a
    /// copy. Recover by deep-copying on assign or using a non-owning ref.
    #[error("ownership conflict: {child} is owned by {existing}, cannot attach to {requested}")]
    OwnershipConflict {
        child: Identity,
        existing: Identity,
        requested: Identity,
    },

    /// A drain exceeded its pass bound. The implicated identities are the
    /// ones still unsettled; the producer must break the cycle before the
    /// next drain can succeed.
    #[error("cyclic dependency: drain did not settle; implicated identities {implicated:?}")]
    CyclicDependency { implicated: Vec<Identity> },

    /// An identity that is not a member of the engine was used.
    #[error("unknown identity: {0}")]
    UnknownIdentity(Identity),

    /// A disposed store was written or subscribed.
    #[error("store {0} is disposed")]
    Disposed(Identity),

    /// An operation expected a different payload shape (e.g. a field write
    /// against a non-record).
    #[error("identity {id} does not hold a {expected} payload")]
    ShapeMismatch {
        id: Identity,
        expected: &'static str,
    },

    /// A keyed subscription or keyed write against a payload that has no
    /// such key.
    #[error("identity {id} has no field or key `{key}`")]
    UnknownKey { id: Identity, key: String },

    /// A positional list write past the end of the list.
    #[error("index {index} out of bounds for list {id} of length {len}")]
    IndexOutOfBounds {
        id: Identity,
        index: usize,
        len: usize,
    },
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityRegistry;
    use crate::value::TypeTag;

    #[test]
    fn display_names_identities() {
        let mut reg = IdentityRegistry::new();
        let child = reg.allocate(TypeTag::Record);
        let a = reg.allocate(TypeTag::List);
        let b = reg.allocate(TypeTag::List);
        let err = EngineError::OwnershipConflict {
            child,
            existing: a,
            requested: b,
        };
        let text = err.to_string();
        assert!(text.contains(&child.to_string()));
        assert!(text.contains(&a.to_string()));
        assert!(text.contains(&b.to_string()));
    }

    #[test]
    fn cyclic_lists_implicated() {
        let mut reg = IdentityRegistry::new();
        let id = reg.allocate(TypeTag::Int);
        let err = EngineError::CyclicDependency {
            implicated: vec![id],
        };
        assert!(err.to_string().contains("did not settle"));
    }
}
