#![forbid(unsafe_code)]

//! Pass-based propagation: the drain loop and its glitch-freedom rule.
//!
//! # Design
//!
//! Dirty stores accumulate in a worklist between drains. A drain runs in
//! passes: each pass settles every dirty store none of whose dependencies
//! are still dirty, so a store with two dirty inputs (a diamond) waits
//! until both have settled and recomputes exactly once. A store whose
//! settled value is unchanged does not wake its subscribers, so redundant
//! recomputation is cut off as early as possible.
//!
//! # Invariants
//!
//! - Exactly one recompute per store per drain, absent cycles.
//! - No derivation ever reads a dependency that is dirty in the same drain.
//! - Observers fire only after the whole drain has settled, one firing per
//!   drain regardless of how many deltas admitted them.
//! - A drain that exceeds `2 × edge_count + 4` passes, or reaches a pass
//!   where every dirty store waits on another dirty store, aborts with
//!   [`EngineError::CyclicDependency`] naming the implicated identities.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashSet;
use tracing::{debug, warn};

use weft_core::availability::Availability;
use weft_core::error::{EngineError, Result};
use weft_core::identity::Identity;
use weft_core::value::Value;

use crate::engine::{Engine, EvalCx};
use crate::store::{DerivationFn, Discipline};

static DRAINS_TOTAL: AtomicU64 = AtomicU64::new(0);
static RECOMPUTES_TOTAL: AtomicU64 = AtomicU64::new(0);
static CYCLE_FAULTS_TOTAL: AtomicU64 = AtomicU64::new(0);

/// Completed drains, process-wide.
#[must_use]
pub fn drains_total() -> u64 {
    DRAINS_TOTAL.load(Ordering::Relaxed)
}

/// Derivation runs, process-wide.
#[must_use]
pub fn recomputes_total() -> u64 {
    RECOMPUTES_TOTAL.load(Ordering::Relaxed)
}

/// Drains aborted by a cyclic dependency, process-wide.
#[must_use]
pub fn cycle_faults_total() -> u64 {
    CYCLE_FAULTS_TOTAL.load(Ordering::Relaxed)
}

/// Worklist state between and during drains.
pub(crate) struct Scheduler {
    queue: Vec<Identity>,
    queued: AHashSet<Identity>,
    /// Observers admitted during this drain; fired after it settles.
    fired: Vec<Identity>,
    draining: bool,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            queue: Vec::new(),
            queued: AHashSet::new(),
            fired: Vec::new(),
            draining: false,
        }
    }

    pub(crate) fn enqueue(&mut self, id: Identity) {
        if self.queued.insert(id) {
            self.queue.push(id);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn reset(&mut self) {
        self.queue.clear();
        self.queued.clear();
    }
}

impl Engine {
    /// Drain the worklist to quiescence, then fire observers.
    ///
    /// Re-entrant calls (a write issued while a drain is in progress) are
    /// absorbed into the running drain.
    pub(crate) fn drain(&mut self) -> Result<()> {
        if self.scheduler.draining || self.scheduler.is_empty() {
            return Ok(());
        }
        self.scheduler.draining = true;
        let outcome = self.drain_inner();
        self.scheduler.draining = false;
        let fired = std::mem::take(&mut self.scheduler.fired);
        self.fire_observers(fired);
        outcome
    }

    fn drain_inner(&mut self) -> Result<()> {
        let mut passes = 0usize;
        while !self.scheduler.queue.is_empty() {
            passes += 1;
            let bound = 2 * self.subscriptions.edge_count() + 4;
            if passes > bound {
                return Err(self.cycle_fault());
            }
            let pending = std::mem::take(&mut self.scheduler.queue);
            let mut ready = Vec::with_capacity(pending.len());
            let mut blocked = Vec::new();
            for id in pending {
                let waits = self
                    .subscriptions
                    .dependencies_of(id)
                    .any(|dep| self.scheduler.queued.contains(&dep));
                if waits {
                    blocked.push(id);
                } else {
                    ready.push(id);
                }
            }
            self.scheduler.queue = blocked;
            if ready.is_empty() {
                // Every dirty store waits on another dirty store.
                return Err(self.cycle_fault());
            }
            for id in ready {
                self.scheduler.queued.remove(&id);
                self.settle(id);
            }
        }
        DRAINS_TOTAL.fetch_add(1, Ordering::Relaxed);
        debug!(passes, "drain settled");
        Ok(())
    }

    fn cycle_fault(&mut self) -> EngineError {
        let mut implicated: Vec<Identity> = self.scheduler.queued.iter().copied().collect();
        implicated.sort_unstable();
        CYCLE_FAULTS_TOTAL.fetch_add(1, Ordering::Relaxed);
        warn!(?implicated, "drain did not settle; aborting");
        self.scheduler.reset();
        EngineError::CyclicDependency { implicated }
    }

    /// Settle one dirty store: recompute it if its discipline calls for it,
    /// otherwise just clear its dirty state. Producers and mutables were
    /// already written when they were enqueued.
    fn settle(&mut self, id: Identity) {
        if self.observers.contains_key(&id) {
            self.scheduler.fired.push(id);
            return;
        }
        let Some(store) = self.stores.get_mut(&id) else {
            return;
        };
        if store.state.is_disposed() {
            return;
        }
        let dep_dirty = std::mem::take(&mut store.dep_dirty);
        let work = match &mut store.discipline {
            Discipline::Const | Discipline::Mutable | Discipline::Producer => {
                store.mark_settled();
                return;
            }
            Discipline::Derived { derivation } => (Rc::clone(derivation), None),
            Discipline::Hybrid {
                derivation,
                pending,
            } => (Rc::clone(derivation), pending.take()),
        };
        let (derivation, pending) = work;
        self.recompute(id, derivation, pending, dep_dirty);
    }

    /// Run one store's computation cycle.
    ///
    /// A pending manual write wins the cycle: the derivation still runs
    /// (when dependencies changed) so its tracked edges stay current, but
    /// its result is discarded in favor of the override. The override is
    /// itself discarded by the next dependency-driven recompute.
    fn recompute(
        &mut self,
        id: Identity,
        derivation: DerivationFn,
        pending: Option<Value>,
        dep_dirty: bool,
    ) {
        if !dep_dirty {
            // Only a manual override is pending; no dependency moved.
            match pending {
                Some(value) => self.apply_ready(id, value),
                None => {
                    if let Some(store) = self.stores.get_mut(&id) {
                        store.mark_settled();
                    }
                }
            }
            return;
        }
        let deps: Vec<Identity> = self.subscriptions.dependencies_of(id).collect();
        let upstream = self
            .availability
            .derive(deps.iter().copied());
        if !upstream.is_ready() {
            // Unavailability propagates without running the derivation.
            match pending {
                Some(value) => self.apply_ready(id, value),
                None => self.apply_unready(id, upstream),
            }
            return;
        }
        RECOMPUTES_TOTAL.fetch_add(1, Ordering::Relaxed);
        let cx = EvalCx::new(self);
        let outcome = derivation(&cx);
        let (reads, worst) = cx.into_parts();
        self.subscriptions.retrack(id, &reads);
        match (pending, outcome) {
            (Some(value), _) => self.apply_ready(id, value),
            (None, Ok(value)) => self.apply_ready(id, value),
            (None, Err(_)) => {
                let worst = if worst.is_ready() {
                    Availability::Loading
                } else {
                    worst
                };
                self.apply_unready(id, worst);
            }
        }
    }

    /// Install a `Ready` payload. When the value and availability are both
    /// unchanged nothing downstream is woken; this is the glitch-freedom
    /// cut-off.
    pub(crate) fn apply_ready(&mut self, id: Identity, value: Value) {
        let was_ready = self.availability.get(id).is_ready();
        let unchanged = was_ready
            && self
                .stores
                .get(&id)
                .and_then(|store| store.payload.as_ref())
                == Some(&value);
        if let Some(store) = self.stores.get_mut(&id) {
            store.payload = Some(value);
            store.mark_settled();
        }
        if unchanged {
            return;
        }
        if was_ready {
            self.revisions.bump_structural(id);
        } else {
            self.availability
                .set(&mut self.revisions, id, Availability::Ready);
        }
        self.propagate_structural(id, Vec::new());
    }

    /// Install a non-`Ready` availability; the payload becomes undefined.
    pub(crate) fn apply_unready(&mut self, id: Identity, availability: Availability) {
        debug_assert!(!availability.is_ready());
        let changed = self
            .availability
            .set(&mut self.revisions, id, availability);
        if let Some(store) = self.stores.get_mut(&id) {
            if changed {
                store.payload = None;
            }
            store.mark_settled();
        }
        if changed {
            self.propagate_structural(id, Vec::new());
        }
    }

    fn fire_observers(&mut self, fired: Vec<Identity>) {
        for observer in fired {
            let Some(entry) = self.observers.get(&observer) else {
                // Unobserved between admission and firing.
                continue;
            };
            let callback = Rc::clone(&entry.callback);
            let Some(dep) = self.subscriptions.dependencies_of(observer).next() else {
                continue;
            };
            let (availability, payload) = self.read(dep);
            let payload = payload.cloned();
            (callback.borrow_mut())(availability, payload);
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
