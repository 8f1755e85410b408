#![forbid(unsafe_code)]

//! Dependency edges with selectors, and notification fan-out.
//!
//! # Design
//!
//! An edge runs from a **subscriber** to a **dependency** and carries a
//! [`Selector`] deciding which revision deltas wake the subscriber. Edges
//! are either *declared* (the graph producer called `subscribe`) or
//! *tracked* (recorded from the reads a derivation performed on its last
//! run). Declared edges persist until unsubscribed; tracked edges are
//! replaced wholesale after every recompute via [`retrack`], so a
//! derivation that branches onto different dependencies keeps its edge set
//! current.
//!
//! # Selector semantics
//!
//! - `Everything` fires on either counter moving.
//! - `StructuralOnly` fires only when structural moved.
//! - `CarriedOnly` fires when carried moved and structural did **not** — a
//!   strict subtraction, not a superset.
//! - `Key(k)` fires only when the named field or map key changed. List
//!   positions are never addressable: positional subscriptions would
//!   silently re-target a different logical element after an
//!   insertion/removal.
//!
//! [`retrack`]: SubscriptionGraph::retrack

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};

use crate::identity::Identity;

/// Filter a subscriber applies to a dependency's revision changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Either revision counter moving satisfies the edge.
    Everything,
    /// Only structural movement.
    StructuralOnly,
    /// Carried movement without structural movement.
    CarriedOnly,
    /// Only a change to the named record field or map key.
    Key(Arc<str>),
}

impl Selector {
    #[must_use]
    pub fn key(k: impl Into<Arc<str>>) -> Self {
        Self::Key(k.into())
    }

    /// Whether this selector is satisfied by the observed delta.
    #[must_use]
    pub fn admits(&self, delta: &RevisionDelta) -> bool {
        match self {
            Self::Everything => delta.structural || delta.carried,
            Self::StructuralOnly => delta.structural,
            Self::CarriedOnly => delta.carried && !delta.structural,
            Self::Key(k) => delta.keys.iter().any(|changed| changed == k),
        }
    }
}

/// The revision movement just observed on a dependency.
#[derive(Debug, Clone, Default)]
pub struct RevisionDelta {
    pub structural: bool,
    pub carried: bool,
    /// Record fields or map keys whose binding changed, when known.
    pub keys: Vec<Arc<str>>,
}

impl RevisionDelta {
    /// A structural event (which is always also carried).
    #[must_use]
    pub fn structural(keys: Vec<Arc<str>>) -> Self {
        Self {
            structural: true,
            carried: true,
            keys,
        }
    }

    /// A carried-only event (something moved deeper inside).
    #[must_use]
    pub fn carried() -> Self {
        Self {
            structural: false,
            carried: true,
            keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct Edge {
    selector: Selector,
    /// Recorded from a derivation's reads rather than declared by the
    /// graph producer.
    tracked: bool,
}

/// Dependency edges and notification fan-out.
#[derive(Debug, Default)]
pub struct SubscriptionGraph {
    /// subscriber → dependency → edge
    deps: AHashMap<Identity, AHashMap<Identity, Edge>>,
    /// dependency → subscribers
    rdeps: AHashMap<Identity, AHashSet<Identity>>,
    edges: usize,
}

impl SubscriptionGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an edge. Re-subscribing replaces the selector (and converts a
    /// tracked edge into a declared one).
    pub fn subscribe(&mut self, subscriber: Identity, dependency: Identity, selector: Selector) {
        self.insert(subscriber, dependency, selector, false);
    }

    /// Record an edge observed from a derivation's reads. Never downgrades a
    /// declared edge.
    pub fn subscribe_tracked(&mut self, subscriber: Identity, dependency: Identity) {
        if let Some(edges) = self.deps.get(&subscriber) {
            if edges.contains_key(&dependency) {
                return;
            }
        }
        self.insert(subscriber, dependency, Selector::Everything, true);
    }

    fn insert(
        &mut self,
        subscriber: Identity,
        dependency: Identity,
        selector: Selector,
        tracked: bool,
    ) {
        let edge = Edge { selector, tracked };
        if self
            .deps
            .entry(subscriber)
            .or_default()
            .insert(dependency, edge)
            .is_none()
        {
            self.edges += 1;
        }
        self.rdeps.entry(dependency).or_default().insert(subscriber);
    }

    pub fn unsubscribe(&mut self, subscriber: Identity, dependency: Identity) {
        let mut removed = false;
        if let Some(edges) = self.deps.get_mut(&subscriber) {
            removed = edges.remove(&dependency).is_some();
            if edges.is_empty() {
                self.deps.remove(&subscriber);
            }
        }
        if removed {
            self.edges -= 1;
            if let Some(subs) = self.rdeps.get_mut(&dependency) {
                subs.remove(&subscriber);
                if subs.is_empty() {
                    self.rdeps.remove(&dependency);
                }
            }
        }
    }

    /// Replace the subscriber's tracked edges with exactly `reads`.
    /// Declared edges are left alone.
    pub fn retrack(&mut self, subscriber: Identity, reads: &AHashSet<Identity>) {
        let stale: Vec<Identity> = self
            .deps
            .get(&subscriber)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|(dep, edge)| edge.tracked && !reads.contains(dep))
                    .map(|(dep, _)| *dep)
                    .collect()
            })
            .unwrap_or_default();
        for dep in stale {
            self.unsubscribe(subscriber, dep);
        }
        for &dep in reads {
            self.subscribe_tracked(subscriber, dep);
        }
    }

    /// The dependencies of a subscriber, in no particular order.
    pub fn dependencies_of(&self, subscriber: Identity) -> impl Iterator<Item = Identity> + '_ {
        self.deps
            .get(&subscriber)
            .into_iter()
            .flat_map(|edges| edges.keys().copied())
    }

    /// The subscribers of a dependency, in no particular order.
    pub fn subscribers_of(&self, dependency: Identity) -> impl Iterator<Item = Identity> + '_ {
        self.rdeps
            .get(&dependency)
            .into_iter()
            .flat_map(|subs| subs.iter().copied())
    }

    #[must_use]
    pub fn selector_of(&self, subscriber: Identity, dependency: Identity) -> Option<&Selector> {
        self.deps
            .get(&subscriber)
            .and_then(|edges| edges.get(&dependency))
            .map(|edge| &edge.selector)
    }

    /// Enumerate the subscribers whose selector admits the delta just
    /// observed on `dependency`. The scheduler marks these dirty.
    #[must_use]
    pub fn notify(&self, dependency: Identity, delta: &RevisionDelta) -> Vec<Identity> {
        let Some(subs) = self.rdeps.get(&dependency) else {
            return Vec::new();
        };
        subs.iter()
            .filter(|sub| {
                self.deps
                    .get(sub)
                    .and_then(|edges| edges.get(&dependency))
                    .is_some_and(|edge| edge.selector.admits(delta))
            })
            .copied()
            .collect()
    }

    /// Sever every edge touching `id`, in both directions. Called when an
    /// identity is released.
    pub fn sever(&mut self, id: Identity) {
        let held: Vec<Identity> = self.dependencies_of(id).collect();
        for dep in held {
            self.unsubscribe(id, dep);
        }
        let against: Vec<Identity> = self.subscribers_of(id).collect();
        for sub in against {
            self.unsubscribe(sub, id);
        }
    }

    /// Total live edge count; the scheduler derives its pass bound from it.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityRegistry;
    use crate::value::TypeTag;

    fn ids(n: usize) -> Vec<Identity> {
        let mut reg = IdentityRegistry::new();
        (0..n).map(|_| reg.allocate(TypeTag::Int)).collect()
    }

    #[test]
    fn everything_admits_both_kinds() {
        let sel = Selector::Everything;
        assert!(sel.admits(&RevisionDelta::structural(vec![])));
        assert!(sel.admits(&RevisionDelta::carried()));
        assert!(!sel.admits(&RevisionDelta::default()));
    }

    #[test]
    fn structural_only_ignores_carried() {
        let sel = Selector::StructuralOnly;
        assert!(sel.admits(&RevisionDelta::structural(vec![])));
        assert!(!sel.admits(&RevisionDelta::carried()));
    }

    #[test]
    fn carried_only_is_a_strict_subtraction() {
        let sel = Selector::CarriedOnly;
        assert!(sel.admits(&RevisionDelta::carried()));
        // Structural changes are also carried, but CarriedOnly must not fire.
        assert!(!sel.admits(&RevisionDelta::structural(vec![])));
    }

    #[test]
    fn key_selector_matches_named_key_only() {
        let sel = Selector::key("price");
        assert!(sel.admits(&RevisionDelta::structural(vec![Arc::from("price")])));
        assert!(!sel.admits(&RevisionDelta::structural(vec![Arc::from("qty")])));
        assert!(!sel.admits(&RevisionDelta::carried()));
    }

    #[test]
    fn notify_filters_by_selector() {
        let mut graph = SubscriptionGraph::new();
        let v = ids(4);
        let dep = v[0];
        graph.subscribe(v[1], dep, Selector::Everything);
        graph.subscribe(v[2], dep, Selector::StructuralOnly);
        graph.subscribe(v[3], dep, Selector::CarriedOnly);

        let mut woken = graph.notify(dep, &RevisionDelta::carried());
        woken.sort();
        assert_eq!(woken, vec![v[1], v[3]]);

        let mut woken = graph.notify(dep, &RevisionDelta::structural(vec![]));
        woken.sort();
        assert_eq!(woken, vec![v[1], v[2]]);
    }

    #[test]
    fn resubscribe_replaces_selector() {
        let mut graph = SubscriptionGraph::new();
        let v = ids(2);
        graph.subscribe(v[1], v[0], Selector::StructuralOnly);
        graph.subscribe(v[1], v[0], Selector::CarriedOnly);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(
            graph.selector_of(v[1], v[0]),
            Some(&Selector::CarriedOnly)
        );
    }

    #[test]
    fn tracked_never_downgrades_declared() {
        let mut graph = SubscriptionGraph::new();
        let v = ids(2);
        graph.subscribe(v[1], v[0], Selector::StructuralOnly);
        graph.subscribe_tracked(v[1], v[0]);
        assert_eq!(
            graph.selector_of(v[1], v[0]),
            Some(&Selector::StructuralOnly)
        );
    }

    #[test]
    fn retrack_swaps_tracked_edges() {
        let mut graph = SubscriptionGraph::new();
        let v = ids(4);
        let sub = v[3];
        graph.subscribe(sub, v[0], Selector::Everything); // declared
        graph.subscribe_tracked(sub, v[1]);

        let mut reads = AHashSet::new();
        reads.insert(v[2]);
        graph.retrack(sub, &reads);

        let mut deps: Vec<_> = graph.dependencies_of(sub).collect();
        deps.sort();
        // Declared v[0] stays, tracked v[1] dropped, read v[2] added.
        assert_eq!(deps, vec![v[0], v[2]]);
    }

    #[test]
    fn sever_removes_both_directions() {
        let mut graph = SubscriptionGraph::new();
        let v = ids(3);
        graph.subscribe(v[1], v[0], Selector::Everything);
        graph.subscribe(v[2], v[1], Selector::Everything);
        graph.sever(v[1]);
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.notify(v[0], &RevisionDelta::structural(vec![])).is_empty());
        assert!(graph.notify(v[1], &RevisionDelta::structural(vec![])).is_empty());
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let mut graph = SubscriptionGraph::new();
        let v = ids(2);
        graph.subscribe(v[1], v[0], Selector::Everything);
        graph.unsubscribe(v[1], v[0]);
        graph.unsubscribe(v[1], v[0]);
        assert_eq!(graph.edge_count(), 0);
    }
}
