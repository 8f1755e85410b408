#![forbid(unsafe_code)]

//! Reactive runtime: stores, the engine context, and the propagation
//! scheduler.
//!
//! Built on [`weft_core`]'s bookkeeping (identity, revisions,
//! availability, ownership, subscriptions), this crate adds the stateful
//! half: store disciplines with typed handles, the [`Engine`] that owns
//! all reactive state, the pass-based drain that keeps propagation
//! glitch-free, and the mailbox through which asynchronous producers
//! deliver values back onto the engine thread.
//!
//! # Quick start
//!
//! ```
//! use weft_runtime::Engine;
//! use weft_core::value::Value;
//!
//! let mut engine = Engine::new();
//! let price = engine.mutable(Value::Float(2.5))?;
//! let quantity = engine.mutable(Value::Int(4))?;
//! let total = engine.derived(move |cx| {
//!     Ok(Value::Float(cx.float(price)? * cx.int(quantity)? as f64))
//! });
//! engine.flush()?;
//! assert_eq!(engine.get(total), Some(&Value::Float(10.0)));
//!
//! engine.set(quantity, Value::Int(6))?;
//! assert_eq!(engine.get(total), Some(&Value::Float(15.0)));
//! # Ok::<(), weft_core::error::EngineError>(())
//! ```

pub mod engine;
pub mod producer;
pub mod scheduler;
pub mod store;

pub use engine::{Engine, EvalCx, ObserverId};
pub use producer::ProducerHandle;
pub use scheduler::{cycle_faults_total, drains_total, recomputes_total};
pub use store::{Derivable, Derived, Halt, Hybrid, Mutable, Producer, StoreState, Writable};
