#![forbid(unsafe_code)]

//! Asynchronous delivery into producer stores.
//!
//! # Design
//!
//! Producer agents run outside the drain (background threads, async tasks)
//! and push `Result<Value, Fault>` outcomes through a single marshalled
//! entry point: a mutex-guarded mailbox owned by the engine. Delivery never
//! touches engine state directly; the engine applies queued deliveries and
//! runs one drain when its owning thread calls `Engine::pump`.
//!
//! The handle holds the mailbox weakly, so agents outliving their engine
//! deliver into nothing and report it. Deliveries for a disposed store are
//! dropped at apply time; stopping notifications is the engine's obligation,
//! aborting in-flight agent work is the agent's own contract.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use weft_core::availability::Fault;
use weft_core::identity::Identity;
use weft_core::value::Value;

/// One queued producer outcome.
#[derive(Debug, Clone)]
pub(crate) struct Delivery {
    pub(crate) target: Identity,
    pub(crate) outcome: Result<Value, Fault>,
}

pub(crate) type Mailbox = Arc<Mutex<VecDeque<Delivery>>>;

/// Cross-thread delivery handle for one producer store.
///
/// Cheaply cloneable and `Send`; any number of clones may exist, but callers
/// must not deliver for the same identity from two threads concurrently.
#[derive(Debug, Clone)]
pub struct ProducerHandle {
    target: Identity,
    mailbox: Weak<Mutex<VecDeque<Delivery>>>,
}

impl ProducerHandle {
    pub(crate) fn new(target: Identity, mailbox: &Mailbox) -> Self {
        Self {
            target,
            mailbox: Arc::downgrade(mailbox),
        }
    }

    /// Queue an outcome for the next `Engine::pump`.
    ///
    /// Returns `false` when the engine is gone; the delivery is dropped.
    pub fn deliver(&self, outcome: Result<Value, Fault>) -> bool {
        let Some(mailbox) = self.mailbox.upgrade() else {
            return false;
        };
        let Ok(mut queue) = mailbox.lock() else {
            return false;
        };
        queue.push_back(Delivery {
            target: self.target,
            outcome,
        });
        true
    }

    /// Deliver a successful value.
    pub fn ready(&self, value: Value) -> bool {
        self.deliver(Ok(value))
    }

    /// Deliver a failure; it surfaces as `Availability::Error` on the store.
    pub fn error(&self, message: impl Into<std::sync::Arc<str>>) -> bool {
        self.deliver(Err(Fault::new(message)))
    }

    /// The store this handle feeds.
    #[must_use]
    pub fn target(&self) -> Identity {
        self.target
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
