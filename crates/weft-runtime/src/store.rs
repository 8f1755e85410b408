#![forbid(unsafe_code)]

//! Store disciplines and their typed handles.
//!
//! # Design
//!
//! Four disciplines share the subscription graph and the revision and
//! availability trackers but differ in who may write the payload and when
//! recomputation fires:
//!
//! | discipline | payload written by | recompute |
//! |---|---|---|
//! | `Derived`  | engine, via derivation | on tracked dependency change |
//! | `Mutable`  | external caller | never |
//! | `Hybrid`   | both; overrides are transient | as Derived, manual write wins the cycle |
//! | `Producer` | asynchronous agent via the mailbox | never |
//!
//! Writes into a Derived store are rejected at the type level: only
//! [`Mutable`] and [`Hybrid`] handles implement [`Writable`], so there is no
//! API through which a Derived handle can reach `Engine::set`.
//!
//! # Lifecycle
//!
//! `Uninitialized → Active { dirty } → Disposed` (terminal). `Active`'s
//! dirty flag is scheduler state: set when the store is enqueued, cleared
//! when it settles.

use std::rc::Rc;

use weft_core::identity::Identity;
use weft_core::value::Value;

use crate::engine::EvalCx;

/// Recompute function for Derived and Hybrid stores.
///
/// A derivation reads its dependencies through the [`EvalCx`] and either
/// produces a payload or halts because a dependency was unavailable.
pub(crate) type DerivationFn = Rc<dyn Fn(&EvalCx<'_>) -> Result<Value, Halt>>;

/// Opaque token returned when a derivation cannot produce a value.
///
/// Only [`EvalCx`] mints these (from an unavailable dependency read or an
/// explicit [`EvalCx::fail`]), so a derivation cannot claim unavailability
/// without the engine having recorded why.
#[derive(Debug)]
pub struct Halt {
    _priv: (),
}

impl Halt {
    pub(crate) fn new() -> Self {
        Self { _priv: () }
    }
}

/// Per-store lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Created but never settled by a drain.
    Uninitialized,
    /// Live. `dirty` means the scheduler has the store enqueued.
    Active { dirty: bool },
    /// Torn down; terminal. All subscriptions severed.
    Disposed,
}

impl StoreState {
    #[must_use]
    pub fn is_disposed(self) -> bool {
        matches!(self, Self::Disposed)
    }
}

/// Who writes the payload and when recompute happens.
pub(crate) enum Discipline {
    /// Interned leaf constant; payload immutable.
    Const,
    /// External writes only; also the discipline of plain data nodes inside
    /// a mutable state tree.
    Mutable,
    /// Engine-only writes via the derivation.
    Derived { derivation: DerivationFn },
    /// Derivation normally; a pending external write wins its drain cycle
    /// and is discarded by the next dependency-driven recompute.
    Hybrid {
        derivation: DerivationFn,
        pending: Option<Value>,
    },
    /// Written by an asynchronous agent through the delivery mailbox.
    Producer,
}

impl std::fmt::Debug for Discipline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Const => "Const",
            Self::Mutable => "Mutable",
            Self::Derived { .. } => "Derived",
            Self::Hybrid { .. } => "Hybrid",
            Self::Producer => "Producer",
        };
        f.write_str(name)
    }
}

/// One datum's runtime record.
#[derive(Debug)]
pub(crate) struct Store {
    pub(crate) discipline: Discipline,
    pub(crate) state: StoreState,
    /// Defined only while availability is `Ready`.
    pub(crate) payload: Option<Value>,
    /// Set when the store was enqueued because a dependency changed (as
    /// opposed to a pending manual write); tells the scheduler whether the
    /// derivation must run.
    pub(crate) dep_dirty: bool,
}

impl Store {
    pub(crate) fn new(discipline: Discipline, payload: Option<Value>) -> Self {
        let state = if payload.is_some() {
            StoreState::Active { dirty: false }
        } else {
            StoreState::Uninitialized
        };
        Self {
            discipline,
            state,
            payload,
            dep_dirty: false,
        }
    }

    pub(crate) fn mark_scheduled(&mut self) {
        if let StoreState::Active { dirty } = &mut self.state {
            *dirty = true;
        }
    }

    pub(crate) fn mark_settled(&mut self) {
        self.state = StoreState::Active { dirty: false };
        self.dep_dirty = false;
    }
}

// ─── Typed handles ───────────────────────────────────────────────────────────

macro_rules! handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name {
            pub(crate) id: Identity,
        }

        impl $name {
            /// The underlying identity, for subscriptions and reads.
            #[must_use]
            pub fn id(self) -> Identity {
                self.id
            }
        }

        impl From<$name> for Identity {
            fn from(handle: $name) -> Identity {
                handle.id
            }
        }
    };
}

handle! {
    /// Handle to a store written only by external callers.
    Mutable
}
handle! {
    /// Handle to a store recomputed from its dependencies; no write API
    /// accepts this handle.
    Derived
}
handle! {
    /// Handle to a store that recomputes like `Derived` but also accepts
    /// transient external overrides.
    Hybrid
}
handle! {
    /// Handle to a store fed by an asynchronous producer agent.
    Producer
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Mutable {}
    impl Sealed for super::Hybrid {}
    impl Sealed for super::Derived {}
}

/// Stores that accept external writes. Implemented for [`Mutable`] and
/// [`Hybrid`] only; Derived stores have no write path by construction.
pub trait Writable: sealed::Sealed + Copy {
    fn id(self) -> Identity;
}

impl Writable for Mutable {
    fn id(self) -> Identity {
        self.id
    }
}

impl Writable for Hybrid {
    fn id(self) -> Identity {
        self.id
    }
}

/// Stores that carry a derivation function.
pub trait Derivable: sealed::Sealed + Copy {
    fn id(self) -> Identity;
}

impl Derivable for Derived {
    fn id(self) -> Identity {
        self.id
    }
}

impl Derivable for Hybrid {
    fn id(self) -> Identity {
        self.id
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
