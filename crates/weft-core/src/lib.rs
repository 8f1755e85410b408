#![forbid(unsafe_code)]

//! Core primitives for the Weft reactive dataflow engine.
//!
//! This crate holds the bookkeeping layers that the runtime drains are built
//! on top of:
//!
//! - [`identity`]: stable identity tokens, hash-consed for leaf constants and
//!   monotonically allocated for mutable composites.
//! - [`value`]: the dynamic payload model (leaf scalars, non-owning refs, and
//!   composites that reference children by identity).
//! - [`revision`]: the two-counter (structural/carried) revision state.
//! - [`availability`]: the loading/ready/error lifecycle and its severity
//!   propagation rule.
//! - [`ownership`]: the single-parent containment forest used to carry deep
//!   changes upward.
//! - [`subscription`]: selector-filtered dependency edges and notification
//!   fan-out.
//!
//! Nothing in this crate schedules work. Recomputation, store disciplines,
//! and drain cycles live in `weft-runtime`.

pub mod availability;
pub mod error;
pub mod identity;
pub mod ownership;
pub mod revision;
pub mod subscription;
pub mod value;

pub use availability::{Availability, AvailabilityTracker, Fault};
pub use error::{EngineError, Result};
pub use identity::{Identity, IdentityKind, IdentityRegistry};
pub use ownership::OwnershipTree;
pub use revision::{Revision, RevisionTracker};
pub use subscription::{RevisionDelta, Selector, SubscriptionGraph};
pub use value::{Leaf, TypeTag, Value};
