#![forbid(unsafe_code)]

//! Weft public facade crate.
//!
//! This crate provides the stable, ergonomic surface area for users.

pub mod prelude {
    pub use weft_core as core;
    #[cfg(feature = "runtime")]
    pub use weft_runtime as runtime;

    pub use weft_core::availability::{Availability, Fault};
    pub use weft_core::error::{EngineError, Result};
    pub use weft_core::identity::Identity;
    pub use weft_core::revision::Revision;
    pub use weft_core::subscription::Selector;
    pub use weft_core::value::{Leaf, TypeTag, Value};
    #[cfg(feature = "runtime")]
    pub use weft_runtime::{Engine, EvalCx, Halt, ObserverId, ProducerHandle};
}
