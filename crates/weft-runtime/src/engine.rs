#![forbid(unsafe_code)]

//! The engine context: an explicit, injected owner for all reactive state.
//!
//! # Design
//!
//! [`Engine`] owns the identity registry, the revision/availability
//! trackers, the ownership tree, the subscription graph, the store table,
//! and the producer mailbox. It is deliberately **not** a process global:
//! hosts create one per top-level scope (tests create many) and tear it
//! down deterministically.
//!
//! The engine is single-threaded: store constructors hand out `Rc`-based
//! derivations, so `Engine` is `!Send + !Sync` by construction. The one
//! cross-thread entry point is the producer mailbox (see
//! [`crate::producer`]), applied on the engine thread by [`Engine::pump`].
//!
//! # Drain boundaries
//!
//! External mutation sites (`set`, the composite write ops, `pump`) trigger
//! one drain per call. [`Engine::batch`] coalesces everything written inside
//! one entry point into a single drain. Graph construction (interning,
//! store constructors, `subscribe`, `observe`) schedules work but never
//! drains; call [`Engine::flush`] once the graph is wired.
//!
//! # Ownership and copy-on-assign
//!
//! Assigning an already-owned composite into a second owning position deep
//! copies it with fresh identities; the original's ownership is untouched.
//! That is what lets an editable draft be committed into a structure
//! repeatedly while keeping its own reactive identity. Ownership applies to
//! mutable data trees; values computed by derivations are views and never
//! claim their children.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};

use ahash::{AHashMap, AHashSet};
use tracing::{trace, warn};

use weft_core::availability::{Availability, AvailabilityTracker};
use weft_core::error::{EngineError, Result};
use weft_core::identity::{Identity, IdentityKind, IdentityRegistry};
use weft_core::ownership::OwnershipTree;
use weft_core::revision::{Revision, RevisionTracker};
use weft_core::subscription::{RevisionDelta, Selector, SubscriptionGraph};
use weft_core::value::{Leaf, TypeTag, Value};

use crate::producer::{Delivery, Mailbox, ProducerHandle};
use crate::scheduler::Scheduler;
use crate::store::{
    Derivable, Derived, DerivationFn, Discipline, Halt, Hybrid, Mutable, Producer, Store,
    StoreState, Writable,
};

// ─── EvalCx ──────────────────────────────────────────────────────────────────

/// Read context handed to derivation functions.
///
/// Every read is recorded; after the run the engine replaces the store's
/// tracked subscription edges with exactly the set of identities read, so a
/// derivation that branches keeps its edge set current. Reads of an
/// unavailable dependency return [`Halt`], which the derivation propagates
/// with `?`; a derivation never observes a dependency as `Ready` with an
/// undefined payload.
pub struct EvalCx<'a> {
    engine: &'a Engine,
    reads: RefCell<AHashSet<Identity>>,
    worst: RefCell<Availability>,
}

impl<'a> EvalCx<'a> {
    pub(crate) fn new(engine: &'a Engine) -> Self {
        Self {
            engine,
            reads: RefCell::new(AHashSet::new()),
            worst: RefCell::new(Availability::Ready),
        }
    }

    /// Read a dependency's payload, halting if it is not `Ready`.
    pub fn get(&self, id: impl Into<Identity>) -> std::result::Result<Value, Halt> {
        let id = id.into();
        self.reads.borrow_mut().insert(id);
        match self.engine.availability.get(id) {
            Availability::Ready => {
                let payload = self
                    .engine
                    .stores
                    .get(&id)
                    .and_then(|store| store.payload.clone());
                match payload {
                    Some(value) => Ok(value),
                    // Never settled yet; treat as in flight.
                    None => {
                        self.note(Availability::Loading);
                        Err(Halt::new())
                    }
                }
            }
            unready => {
                self.note(unready);
                Err(Halt::new())
            }
        }
    }

    /// Read an integer dependency.
    pub fn int(&self, id: impl Into<Identity>) -> std::result::Result<i64, Halt> {
        let value = self.get(id)?;
        value.as_int().ok_or_else(|| self.fail("expected int"))
    }

    /// Read a float dependency.
    pub fn float(&self, id: impl Into<Identity>) -> std::result::Result<f64, Halt> {
        let value = self.get(id)?;
        value.as_float().ok_or_else(|| self.fail("expected float"))
    }

    /// Read a boolean dependency.
    pub fn bool(&self, id: impl Into<Identity>) -> std::result::Result<bool, Halt> {
        let value = self.get(id)?;
        value.as_bool().ok_or_else(|| self.fail("expected bool"))
    }

    /// Read a text dependency.
    pub fn text(&self, id: impl Into<Identity>) -> std::result::Result<Arc<str>, Halt> {
        match self.get(id)? {
            Value::Text(s) => Ok(s),
            _ => Err(self.fail("expected text")),
        }
    }

    /// Halt this run with a domain failure; it surfaces as
    /// `Availability::Error` on the store.
    pub fn fail(&self, message: &str) -> Halt {
        self.note(Availability::error(message));
        Halt::new()
    }

    fn note(&self, availability: Availability) {
        let mut worst = self.worst.borrow_mut();
        *worst = worst.clone().worst(availability);
    }

    pub(crate) fn into_parts(self) -> (AHashSet<Identity>, Availability) {
        (self.reads.into_inner(), self.worst.into_inner())
    }
}

// ─── Observers ───────────────────────────────────────────────────────────────

/// Handle to a terminal observer registered with [`Engine::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId {
    pub(crate) id: Identity,
}

impl ObserverId {
    #[must_use]
    pub fn id(self) -> Identity {
        self.id
    }
}

impl From<ObserverId> for Identity {
    fn from(handle: ObserverId) -> Identity {
        handle.id
    }
}

pub(crate) type ObserverFn = Rc<RefCell<dyn FnMut(Availability, Option<Value>)>>;

pub(crate) struct ObserverEntry {
    pub(crate) callback: ObserverFn,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// The reactive engine context. See the module docs for the big picture.
pub struct Engine {
    pub(crate) registry: IdentityRegistry,
    pub(crate) revisions: RevisionTracker,
    pub(crate) availability: AvailabilityTracker,
    pub(crate) ownership: OwnershipTree,
    pub(crate) subscriptions: SubscriptionGraph,
    pub(crate) stores: AHashMap<Identity, Store>,
    pub(crate) observers: AHashMap<Identity, ObserverEntry>,
    pub(crate) scheduler: Scheduler,
    pub(crate) mailbox: Mailbox,
    in_batch: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: IdentityRegistry::new(),
            revisions: RevisionTracker::new(),
            availability: AvailabilityTracker::new(),
            ownership: OwnershipTree::new(),
            subscriptions: SubscriptionGraph::new(),
            stores: AHashMap::new(),
            observers: AHashMap::new(),
            scheduler: Scheduler::new(),
            mailbox: Arc::new(Mutex::new(VecDeque::new())),
            in_batch: false,
        }
    }

    // ── Interning ────────────────────────────────────────────────────

    /// Canonical identity for a leaf constant. Equal leaves share one
    /// identity; interned identities are immortal within the engine.
    pub fn intern(&mut self, leaf: Leaf) -> Identity {
        let id = self.registry.intern(leaf.clone());
        self.stores
            .entry(id)
            .or_insert_with(|| Store::new(Discipline::Const, Some(leaf.to_value())));
        id
    }

    pub fn intern_int(&mut self, v: i64) -> Identity {
        self.intern(Leaf::Int(v))
    }

    pub fn intern_bool(&mut self, v: bool) -> Identity {
        self.intern(Leaf::Bool(v))
    }

    pub fn intern_float(&mut self, v: f64) -> Identity {
        self.intern(Leaf::float(v))
    }

    pub fn intern_text(&mut self, v: impl Into<Arc<str>>) -> Identity {
        self.intern(Leaf::Text(v.into()))
    }

    pub fn intern_variant(&mut self, v: impl Into<Arc<str>>) -> Identity {
        self.intern(Leaf::Variant(v.into()))
    }

    /// Non-owning reference to `target`: participates in subscriptions,
    /// never in the ownership tree.
    pub fn intern_ref(&mut self, target: impl Into<Identity>) -> Identity {
        self.intern(Leaf::Ref(target.into()))
    }

    // ── Store constructors ───────────────────────────────────────────

    /// Allocate a store written only by external callers. Composite
    /// payloads claim their children (copy-on-assign when already owned).
    pub fn mutable(&mut self, value: Value) -> Result<Mutable> {
        self.validate_children(&value)?;
        let id = self.registry.allocate(value.type_tag());
        let adopted = self.adopt_value(id, value)?;
        self.stores
            .insert(id, Store::new(Discipline::Mutable, Some(adopted)));
        Ok(Mutable { id })
    }

    /// Allocate a store recomputed from its dependencies. The first
    /// computation happens at the next drain.
    pub fn derived(
        &mut self,
        derivation: impl Fn(&EvalCx<'_>) -> std::result::Result<Value, Halt> + 'static,
    ) -> Derived {
        let id = self.alloc_computation(Discipline::Derived {
            derivation: Rc::new(derivation),
        });
        Derived { id }
    }

    /// Allocate a store that recomputes like `Derived` but also accepts
    /// transient external overrides.
    pub fn hybrid(
        &mut self,
        derivation: impl Fn(&EvalCx<'_>) -> std::result::Result<Value, Halt> + 'static,
    ) -> Hybrid {
        let id = self.alloc_computation(Discipline::Hybrid {
            derivation: Rc::new(derivation),
            pending: None,
        });
        Hybrid { id }
    }

    /// Allocate a store fed by an asynchronous agent. Starts `Loading`; the
    /// returned [`ProducerHandle`] is `Send + Clone` and delivers through
    /// the engine mailbox.
    pub fn producer(&mut self) -> (Producer, ProducerHandle) {
        let id = self.alloc_computation(Discipline::Producer);
        let handle = ProducerHandle::new(id, &self.mailbox);
        (Producer { id }, handle)
    }

    /// Replace the derivation of a Derived or Hybrid store and schedule a
    /// recompute.
    pub fn set_derivation<D: Derivable>(
        &mut self,
        store: D,
        derivation: impl Fn(&EvalCx<'_>) -> std::result::Result<Value, Halt> + 'static,
    ) -> Result<()> {
        let id = store.id();
        let entry = self
            .stores
            .get_mut(&id)
            .ok_or(EngineError::UnknownIdentity(id))?;
        if entry.state.is_disposed() {
            return Err(EngineError::Disposed(id));
        }
        let replacement: DerivationFn = Rc::new(derivation);
        match &mut entry.discipline {
            Discipline::Derived { derivation } => *derivation = replacement,
            Discipline::Hybrid { derivation, .. } => *derivation = replacement,
            _ => {
                return Err(EngineError::ShapeMismatch {
                    id,
                    expected: "derived or hybrid store",
                });
            }
        }
        entry.dep_dirty = true;
        entry.mark_scheduled();
        self.scheduler.enqueue(id);
        Ok(())
    }

    fn alloc_computation(&mut self, discipline: Discipline) -> Identity {
        let id = self.registry.allocate(TypeTag::Computation);
        let schedule = matches!(
            discipline,
            Discipline::Derived { .. } | Discipline::Hybrid { .. }
        );
        let mut store = Store::new(discipline, None);
        if schedule {
            store.dep_dirty = true;
        }
        self.stores.insert(id, store);
        self.availability.seed(id, Availability::Loading);
        if schedule {
            self.scheduler.enqueue(id);
        }
        id
    }

    // ── Graph wiring ─────────────────────────────────────────────────

    /// Declare a dependency edge with a selector. The subscriber is
    /// rescheduled so the edge takes effect at the next drain.
    pub fn subscribe(
        &mut self,
        subscriber: impl Into<Identity>,
        dependency: impl Into<Identity>,
        selector: Selector,
    ) -> Result<()> {
        let (subscriber, dependency) = (subscriber.into(), dependency.into());
        for id in [subscriber, dependency] {
            if !self.registry.contains(id) {
                return Err(EngineError::UnknownIdentity(id));
            }
        }
        if let Some(store) = self.stores.get(&subscriber) {
            if store.state.is_disposed() {
                return Err(EngineError::Disposed(subscriber));
            }
        }
        self.subscriptions.subscribe(subscriber, dependency, selector);
        self.mark_dirty_from_dep(subscriber);
        Ok(())
    }

    pub fn unsubscribe(&mut self, subscriber: impl Into<Identity>, dependency: impl Into<Identity>) {
        self.subscriptions
            .unsubscribe(subscriber.into(), dependency.into());
    }

    /// Register a terminal observer: a side-effecting callback invoked
    /// after the drain settles, with the dependency's current
    /// `(availability, payload)`. This is the only sanctioned point where
    /// the engine hands control to imperative code outside a derivation.
    pub fn observe(
        &mut self,
        dependency: impl Into<Identity>,
        selector: Selector,
        callback: impl FnMut(Availability, Option<Value>) + 'static,
    ) -> Result<ObserverId> {
        let dependency = dependency.into();
        if !self.registry.contains(dependency) {
            return Err(EngineError::UnknownIdentity(dependency));
        }
        let id = self.registry.allocate(TypeTag::Computation);
        self.observers.insert(
            id,
            ObserverEntry {
                callback: Rc::new(RefCell::new(callback)),
            },
        );
        self.subscriptions.subscribe(id, dependency, selector);
        Ok(ObserverId { id })
    }

    /// Remove an observer and release its identity.
    pub fn unobserve(&mut self, observer: ObserverId) {
        let id = observer.id;
        if self.observers.remove(&id).is_some() {
            self.subscriptions.sever(id);
            self.revisions.forget(id);
            self.availability.forget(id);
            self.registry.release(id);
        }
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Write a payload into a Mutable or Hybrid store.
    ///
    /// Mutable writes apply immediately (one drain per write outside a
    /// batch). Hybrid writes are transient overrides: the override wins its
    /// drain cycle and is discarded by the next dependency-driven
    /// recompute. Derived stores have no write path at all.
    pub fn set<W: Writable>(&mut self, store: W, value: Value) -> Result<()> {
        let id = store.id();
        let entry = self
            .stores
            .get(&id)
            .ok_or(EngineError::UnknownIdentity(id))?;
        if entry.state.is_disposed() {
            return Err(EngineError::Disposed(id));
        }
        let is_hybrid = match entry.discipline {
            Discipline::Mutable => false,
            Discipline::Hybrid { .. } => true,
            _ => {
                return Err(EngineError::ShapeMismatch {
                    id,
                    expected: "writable store",
                });
            }
        };
        if is_hybrid {
            self.validate_children(&value)?;
            if let Some(entry) = self.stores.get_mut(&id) {
                if let Discipline::Hybrid { pending, .. } = &mut entry.discipline {
                    *pending = Some(value);
                }
                entry.mark_scheduled();
            }
            self.scheduler.enqueue(id);
        } else {
            self.write_mutable(id, value)?;
        }
        self.maybe_drain()
    }

    fn write_mutable(&mut self, id: Identity, value: Value) -> Result<()> {
        self.validate_children(&value)?;
        let old = self.stores.get(&id).and_then(|store| store.payload.clone());
        if let Some(old) = &old {
            self.orphan_children(old);
        }
        let adopted = self.adopt_value(id, value)?;
        let was_ready = self.availability.get(id).is_ready();
        let unchanged = was_ready && old.as_ref() == Some(&adopted);
        if let Some(store) = self.stores.get_mut(&id) {
            store.payload = Some(adopted);
            store.mark_settled();
        }
        if unchanged {
            // Setting an equal value is a no-op: no revision bump, no
            // notifications.
            return Ok(());
        }
        if was_ready {
            self.revisions.bump_structural(id);
        } else {
            self.availability
                .set(&mut self.revisions, id, Availability::Ready);
        }
        self.propagate_structural(id, Vec::new());
        Ok(())
    }

    // ── Composite writes ─────────────────────────────────────────────

    /// Rebind a record field. Returns the identity actually stored, which
    /// differs from `child` when copy-on-assign kicked in.
    pub fn set_field(
        &mut self,
        record: impl Into<Identity>,
        key: &str,
        child: impl Into<Identity>,
    ) -> Result<Identity> {
        let (record, child) = (record.into(), child.into());
        if !self.registry.contains(child) {
            return Err(EngineError::UnknownIdentity(child));
        }
        let entry = self.writable_composite(record, "record")?;
        let Some(Value::Record(fields)) = &entry.payload else {
            return Err(EngineError::ShapeMismatch {
                id: record,
                expected: "record",
            });
        };
        let index = fields
            .iter()
            .position(|(name, _)| name.as_ref() == key)
            .ok_or_else(|| EngineError::UnknownKey {
                id: record,
                key: key.to_owned(),
            })?;
        let (name, old) = (fields[index].0.clone(), fields[index].1);
        if old == child {
            return Ok(old);
        }
        self.detach_allocated(old);
        let chosen = self.claim(child, record)?;
        if let Some(store) = self.stores.get_mut(&record) {
            if let Some(Value::Record(fields)) = &mut store.payload {
                fields[index].1 = chosen;
            }
        }
        self.revisions.bump_structural(record);
        self.propagate_structural(record, vec![name]);
        self.maybe_drain()?;
        Ok(chosen)
    }

    /// Append to a list.
    pub fn list_push(
        &mut self,
        list: impl Into<Identity>,
        child: impl Into<Identity>,
    ) -> Result<Identity> {
        let list = list.into();
        let len = self.list_len(list)?;
        self.list_insert(list, len, child)
    }

    /// Insert into a list at `index`.
    pub fn list_insert(
        &mut self,
        list: impl Into<Identity>,
        index: usize,
        child: impl Into<Identity>,
    ) -> Result<Identity> {
        let (list, child) = (list.into(), child.into());
        if !self.registry.contains(child) {
            return Err(EngineError::UnknownIdentity(child));
        }
        let len = self.list_len(list)?;
        if index > len {
            return Err(EngineError::IndexOutOfBounds { id: list, index, len });
        }
        let chosen = self.claim(child, list)?;
        if let Some(store) = self.stores.get_mut(&list) {
            if let Some(Value::List(items)) = &mut store.payload {
                items.insert(index, chosen);
            }
        }
        self.revisions.bump_structural(list);
        self.propagate_structural(list, Vec::new());
        self.maybe_drain()?;
        Ok(chosen)
    }

    /// Remove the element at `index`. The removed child is detached, not
    /// released.
    pub fn list_remove(&mut self, list: impl Into<Identity>, index: usize) -> Result<Identity> {
        let list = list.into();
        let len = self.list_len(list)?;
        if index >= len {
            return Err(EngineError::IndexOutOfBounds { id: list, index, len });
        }
        let mut removed = None;
        if let Some(store) = self.stores.get_mut(&list) {
            if let Some(Value::List(items)) = &mut store.payload {
                removed = Some(items.remove(index));
            }
        }
        let removed = removed.ok_or(EngineError::ShapeMismatch {
            id: list,
            expected: "list",
        })?;
        self.detach_allocated(removed);
        self.revisions.bump_structural(list);
        self.propagate_structural(list, Vec::new());
        self.maybe_drain()?;
        Ok(removed)
    }

    /// Replace the element at `index`.
    pub fn list_set(
        &mut self,
        list: impl Into<Identity>,
        index: usize,
        child: impl Into<Identity>,
    ) -> Result<Identity> {
        let (list, child) = (list.into(), child.into());
        if !self.registry.contains(child) {
            return Err(EngineError::UnknownIdentity(child));
        }
        let len = self.list_len(list)?;
        if index >= len {
            return Err(EngineError::IndexOutOfBounds { id: list, index, len });
        }
        let old = match self.stores.get(&list).and_then(|s| s.payload.as_ref()) {
            Some(Value::List(items)) => items[index],
            _ => {
                return Err(EngineError::ShapeMismatch {
                    id: list,
                    expected: "list",
                });
            }
        };
        if old == child {
            return Ok(old);
        }
        self.detach_allocated(old);
        let chosen = self.claim(child, list)?;
        if let Some(store) = self.stores.get_mut(&list) {
            if let Some(Value::List(items)) = &mut store.payload {
                items[index] = chosen;
            }
        }
        self.revisions.bump_structural(list);
        self.propagate_structural(list, Vec::new());
        self.maybe_drain()?;
        Ok(chosen)
    }

    /// Insert or rebind a map key.
    pub fn map_insert(
        &mut self,
        map: impl Into<Identity>,
        key: impl Into<Arc<str>>,
        child: impl Into<Identity>,
    ) -> Result<Identity> {
        let (map, key, child) = (map.into(), key.into(), child.into());
        if !self.registry.contains(child) {
            return Err(EngineError::UnknownIdentity(child));
        }
        let entry = self.writable_composite(map, "map")?;
        let old = match &entry.payload {
            Some(Value::Map(entries)) => entries.get(&key).copied(),
            _ => {
                return Err(EngineError::ShapeMismatch {
                    id: map,
                    expected: "map",
                });
            }
        };
        if old == Some(child) {
            return Ok(child);
        }
        if let Some(old) = old {
            self.detach_allocated(old);
        }
        let chosen = self.claim(child, map)?;
        if let Some(store) = self.stores.get_mut(&map) {
            if let Some(Value::Map(entries)) = &mut store.payload {
                entries.insert(key.clone(), chosen);
            }
        }
        self.revisions.bump_structural(map);
        self.propagate_structural(map, vec![key]);
        self.maybe_drain()?;
        Ok(chosen)
    }

    /// Remove a map key. The removed child is detached, not released.
    pub fn map_remove(
        &mut self,
        map: impl Into<Identity>,
        key: &str,
    ) -> Result<Identity> {
        let map = map.into();
        let entry = self.writable_composite(map, "map")?;
        let Some(Value::Map(entries)) = &entry.payload else {
            return Err(EngineError::ShapeMismatch {
                id: map,
                expected: "map",
            });
        };
        let name: Arc<str> = entries
            .keys()
            .find(|k| k.as_ref() == key)
            .cloned()
            .ok_or_else(|| EngineError::UnknownKey {
                id: map,
                key: key.to_owned(),
            })?;
        let mut removed = None;
        if let Some(store) = self.stores.get_mut(&map) {
            if let Some(Value::Map(entries)) = &mut store.payload {
                removed = entries.remove(&name);
            }
        }
        let removed = removed.ok_or(EngineError::UnknownKey {
            id: map,
            key: key.to_owned(),
        })?;
        self.detach_allocated(removed);
        self.revisions.bump_structural(map);
        self.propagate_structural(map, vec![name]);
        self.maybe_drain()?;
        Ok(removed)
    }

    // ── Drafts ───────────────────────────────────────────────────────

    /// Editable scratch copy: a deep structural copy with fresh identities
    /// and no owner. Interned constants are shared, not copied.
    pub fn draft(&mut self, source: impl Into<Identity>) -> Result<Identity> {
        let source = source.into();
        match self.registry.kind_of(source) {
            Some(IdentityKind::Interned) => Ok(source),
            Some(IdentityKind::Allocated) => self.copy_allocated(source),
            None => Err(EngineError::UnknownIdentity(source)),
        }
    }

    /// Commit a draft into a record field. Always copies, so the draft
    /// keeps its own reactive identity and can be committed again.
    pub fn commit_draft(
        &mut self,
        draft: impl Into<Identity>,
        record: impl Into<Identity>,
        key: &str,
    ) -> Result<Identity> {
        let copy = self.draft(draft)?;
        self.set_field(record, key, copy)
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Current availability. Identities never set are `Ready`.
    #[must_use]
    pub fn availability(&self, id: impl Into<Identity>) -> Availability {
        self.availability.get(id.into())
    }

    /// Current payload, defined only while `Ready`.
    #[must_use]
    pub fn get(&self, id: impl Into<Identity>) -> Option<&Value> {
        let id = id.into();
        if !self.availability.get(id).is_ready() {
            return None;
        }
        self.stores.get(&id).and_then(|store| store.payload.as_ref())
    }

    /// The `(availability, payload)` pair host observers read.
    #[must_use]
    pub fn read(&self, id: impl Into<Identity>) -> (Availability, Option<&Value>) {
        let id = id.into();
        (self.availability.get(id), self.get(id))
    }

    #[must_use]
    pub fn revision(&self, id: impl Into<Identity>) -> Revision {
        self.revisions.read(id.into())
    }

    #[must_use]
    pub fn state_of(&self, id: impl Into<Identity>) -> Option<StoreState> {
        self.stores.get(&id.into()).map(|store| store.state)
    }

    #[must_use]
    pub fn owner(&self, id: impl Into<Identity>) -> Option<Identity> {
        self.ownership.owner(id.into())
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Coalesce every write inside `f` into a single drain.
    pub fn batch<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> Result<R> {
        if self.in_batch {
            return Ok(f(self));
        }
        self.in_batch = true;
        let out = f(self);
        self.in_batch = false;
        self.drain()?;
        Ok(out)
    }

    /// Drain pending work. Call once after wiring the graph, or any time
    /// scheduled work should settle.
    pub fn flush(&mut self) -> Result<()> {
        self.drain()
    }

    /// Apply queued producer deliveries, then drain. Returns how many
    /// deliveries were applied; deliveries for disposed stores and
    /// deliveries carrying unknown child identities are dropped.
    pub fn pump(&mut self) -> Result<usize> {
        let deliveries: Vec<Delivery> = {
            let mut queue = self
                .mailbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            queue.drain(..).collect()
        };
        let mut applied = 0;
        for delivery in deliveries {
            let Some(store) = self.stores.get(&delivery.target) else {
                trace!(id = %delivery.target, "delivery for unknown store dropped");
                continue;
            };
            if store.state.is_disposed() || !matches!(store.discipline, Discipline::Producer) {
                trace!(id = %delivery.target, "delivery for dead store dropped");
                continue;
            }
            match delivery.outcome {
                // A delivery is a write: composite payloads are validated and
                // their children adopted exactly as a manual `set` would.
                Ok(value) => {
                    if let Err(error) = self.write_mutable(delivery.target, value) {
                        warn!(id = %delivery.target, %error, "malformed delivery dropped");
                        continue;
                    }
                }
                Err(fault) => {
                    let payload = self
                        .stores
                        .get(&delivery.target)
                        .and_then(|store| store.payload.clone());
                    if let Some(payload) = payload {
                        self.orphan_children(&payload);
                    }
                    self.apply_unready(delivery.target, Availability::Error(fault));
                }
            }
            applied += 1;
        }
        if self.in_batch {
            return Ok(applied);
        }
        self.drain()?;
        Ok(applied)
    }

    /// Tear down a store: terminal. Subscriptions it holds are released,
    /// subscriptions against it are severed, and no further notifications
    /// are delivered for it.
    pub fn dispose(&mut self, target: impl Into<Identity>) {
        let id = target.into();
        if self.observers.remove(&id).is_some() {
            self.subscriptions.sever(id);
            self.revisions.forget(id);
            self.availability.forget(id);
            self.registry.release(id);
            return;
        }
        let Some(store) = self.stores.get_mut(&id) else {
            debug_assert!(false, "disposed non-member identity {id}");
            return;
        };
        if store.state.is_disposed() {
            return;
        }
        if matches!(store.discipline, Discipline::Const) {
            debug_assert!(false, "disposed interned constant {id}");
            return;
        }
        let payload = store.payload.take();
        store.state = StoreState::Disposed;
        if let Discipline::Hybrid { pending, .. } = &mut store.discipline {
            *pending = None;
        }
        if let Some(payload) = payload {
            self.orphan_children(&payload);
        }
        self.ownership.detach(id);
        self.subscriptions.sever(id);
        self.availability.forget(id);
        self.revisions.forget(id);
        self.registry.release(id);
    }

    // ── Internal helpers ─────────────────────────────────────────────

    pub(crate) fn maybe_drain(&mut self) -> Result<()> {
        if self.in_batch {
            return Ok(());
        }
        self.drain()
    }

    /// Make `child` a directly-contained child of `parent`, deep copying
    /// when the child is already owned (or the attachment would close an
    /// ownership loop). Returns the identity actually attached.
    fn claim(&mut self, child: Identity, parent: Identity) -> Result<Identity> {
        if !self.registry.contains(child) {
            return Err(EngineError::UnknownIdentity(child));
        }
        if self.registry.kind_of(child) == Some(IdentityKind::Interned) {
            return Ok(child);
        }
        let needs_copy = self.ownership.owner(child).is_some()
            || child == parent
            || self.ownership.is_ancestor(child, parent);
        let chosen = if needs_copy {
            self.copy_allocated(child)?
        } else {
            child
        };
        self.ownership.attach(chosen, parent)?;
        Ok(chosen)
    }

    fn adopt_value(&mut self, parent: Identity, value: Value) -> Result<Value> {
        match value {
            Value::List(items) => {
                let mut adopted = Vec::with_capacity(items.len());
                for child in items {
                    adopted.push(self.claim(child, parent)?);
                }
                Ok(Value::List(adopted))
            }
            Value::Record(fields) => {
                let mut adopted = Vec::with_capacity(fields.len());
                for (name, child) in fields {
                    let chosen = self.claim(child, parent)?;
                    adopted.push((name, chosen));
                }
                Ok(Value::Record(adopted))
            }
            Value::Map(entries) => {
                let mut adopted = BTreeMap::new();
                for (key, child) in entries {
                    let chosen = self.claim(child, parent)?;
                    adopted.insert(key, chosen);
                }
                Ok(Value::Map(adopted))
            }
            leaf => Ok(leaf),
        }
    }

    fn validate_children(&self, value: &Value) -> Result<()> {
        for child in value.children() {
            if !self.registry.contains(child) {
                return Err(EngineError::UnknownIdentity(child));
            }
        }
        Ok(())
    }

    fn orphan_children(&mut self, value: &Value) {
        let children: Vec<Identity> = value.children().collect();
        for child in children {
            self.detach_allocated(child);
        }
    }

    fn detach_allocated(&mut self, id: Identity) {
        if self.registry.kind_of(id) == Some(IdentityKind::Allocated) {
            self.ownership.detach(id);
        }
    }

    fn copy_allocated(&mut self, source: Identity) -> Result<Identity> {
        let tag = self
            .registry
            .type_of(source)
            .ok_or(EngineError::UnknownIdentity(source))?;
        let payload = self
            .stores
            .get(&source)
            .ok_or(EngineError::UnknownIdentity(source))?
            .payload
            .clone();
        let availability = self.availability.get(source);
        let copy = self.registry.allocate(tag);
        let copied = match payload {
            Some(value) => Some(self.copy_value_into(value, copy)?),
            None => None,
        };
        self.stores
            .insert(copy, Store::new(Discipline::Mutable, copied));
        self.availability.seed(copy, availability);
        Ok(copy)
    }

    fn copy_value_into(&mut self, value: Value, parent: Identity) -> Result<Value> {
        match value {
            Value::List(items) => {
                let mut copied = Vec::with_capacity(items.len());
                for child in items {
                    copied.push(self.copy_child(child, parent)?);
                }
                Ok(Value::List(copied))
            }
            Value::Record(fields) => {
                let mut copied = Vec::with_capacity(fields.len());
                for (name, child) in fields {
                    let fresh = self.copy_child(child, parent)?;
                    copied.push((name, fresh));
                }
                Ok(Value::Record(copied))
            }
            Value::Map(entries) => {
                let mut copied = BTreeMap::new();
                for (key, child) in entries {
                    let fresh = self.copy_child(child, parent)?;
                    copied.insert(key, fresh);
                }
                Ok(Value::Map(copied))
            }
            leaf => Ok(leaf),
        }
    }

    fn copy_child(&mut self, child: Identity, parent: Identity) -> Result<Identity> {
        if self.registry.kind_of(child) == Some(IdentityKind::Interned) {
            return Ok(child);
        }
        let fresh = self.copy_allocated(child)?;
        self.ownership.attach(fresh, parent)?;
        Ok(fresh)
    }

    /// Bump-free notification fan-out: the structural bump on `id` has
    /// already happened; wake its subscribers and carry the change up the
    /// ownership chain.
    pub(crate) fn propagate_structural(&mut self, id: Identity, keys: Vec<Arc<str>>) {
        let delta = RevisionDelta::structural(keys);
        for subscriber in self.subscriptions.notify(id, &delta) {
            self.mark_dirty_from_dep(subscriber);
        }
        let ancestors: Vec<Identity> = self.ownership.walk_ancestors(id).collect();
        let carried = RevisionDelta::carried();
        for ancestor in ancestors {
            self.revisions.bump_carried(ancestor);
            for subscriber in self.subscriptions.notify(ancestor, &carried) {
                self.mark_dirty_from_dep(subscriber);
            }
        }
    }

    pub(crate) fn mark_dirty_from_dep(&mut self, subscriber: Identity) {
        if let Some(store) = self.stores.get_mut(&subscriber) {
            if store.state.is_disposed() {
                return;
            }
            store.dep_dirty = true;
            store.mark_scheduled();
        }
        self.scheduler.enqueue(subscriber);
    }

    fn writable_composite(&self, id: Identity, expected: &'static str) -> Result<&Store> {
        let store = self
            .stores
            .get(&id)
            .ok_or(EngineError::UnknownIdentity(id))?;
        if store.state.is_disposed() {
            return Err(EngineError::Disposed(id));
        }
        if !matches!(store.discipline, Discipline::Mutable) {
            return Err(EngineError::ShapeMismatch { id, expected });
        }
        Ok(store)
    }

    fn list_len(&self, list: Identity) -> Result<usize> {
        let store = self.writable_composite(list, "list")?;
        match &store.payload {
            Some(Value::List(items)) => Ok(items.len()),
            _ => Err(EngineError::ShapeMismatch {
                id: list,
                expected: "list",
            }),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
