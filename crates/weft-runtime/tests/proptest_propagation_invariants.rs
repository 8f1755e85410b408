#![forbid(unsafe_code)]

//! Property-based invariant tests for propagation.
//!
//! These check invariants that must hold for **any** write sequence:
//!
//! 1. Revisions never move backwards, and a structural bump always moves
//!    the carried counter with it.
//! 2. After every drain, a derived store equals its derivation applied to
//!    the current inputs (no stale or mixed reads survive a drain).
//! 3. A diamond join recomputes at most once per write, for any write
//!    sequence.
//! 4. Interning is stable: equal leaves map to one identity across
//!    arbitrary interleavings.
//! 5. A draft never aliases its source: arbitrary draft edits leave the
//!    source payload untouched.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use proptest::prelude::*;

use weft_core::identity::Identity;
use weft_core::revision::Revision;
use weft_core::value::{Leaf, Value};
use weft_runtime::Engine;

fn int_writes() -> impl Strategy<Value = Vec<i64>> {
    proptest::collection::vec(-1000i64..1000, 1..40)
}

fn rev_monotone(before: Revision, after: Revision) -> bool {
    after.structural >= before.structural && after.carried >= before.carried
}

// ── 1. Revision monotonicity ────────────────────────────────────────────

proptest! {
    #[test]
    fn revisions_never_move_backwards(writes in int_writes()) {
        let mut engine = Engine::new();
        let base = engine.mutable(Value::Int(0)).unwrap();
        let doubled = engine.derived(move |cx| Ok(Value::Int(cx.int(base)? * 2)));
        engine.flush().unwrap();

        let mut base_prev = engine.revision(base);
        let mut derived_prev = engine.revision(doubled);
        for w in writes {
            engine.set(base, Value::Int(w)).unwrap();
            let base_now = engine.revision(base);
            let derived_now = engine.revision(doubled);
            prop_assert!(rev_monotone(base_prev, base_now));
            prop_assert!(rev_monotone(derived_prev, derived_now));
            // Structural movement implies carried movement.
            prop_assert!(base_now.carried >= base_now.structural);
            base_prev = base_now;
            derived_prev = derived_now;
        }
    }
}

// ── 2. Drain leaves no stale reads ──────────────────────────────────────

proptest! {
    #[test]
    fn derived_matches_inputs_after_every_drain(
        writes in proptest::collection::vec((0usize..2, -1000i64..1000), 1..40)
    ) {
        let mut engine = Engine::new();
        let a = engine.mutable(Value::Int(0)).unwrap();
        let b = engine.mutable(Value::Int(0)).unwrap();
        let sum = engine.derived(move |cx| Ok(Value::Int(cx.int(a)? + cx.int(b)?)));
        engine.flush().unwrap();

        let (mut va, mut vb) = (0i64, 0i64);
        for (which, w) in writes {
            if which == 0 {
                engine.set(a, Value::Int(w)).unwrap();
                va = w;
            } else {
                engine.set(b, Value::Int(w)).unwrap();
                vb = w;
            }
            prop_assert_eq!(engine.get(sum), Some(&Value::Int(va + vb)));
        }
    }
}

// ── 3. Exactly-once diamonds ────────────────────────────────────────────

proptest! {
    #[test]
    fn diamond_join_runs_at_most_once_per_write(writes in int_writes()) {
        let mut engine = Engine::new();
        let base = engine.mutable(Value::Int(0)).unwrap();
        let left = engine.derived(move |cx| Ok(Value::Int(cx.int(base)? + 1)));
        let right = engine.derived(move |cx| Ok(Value::Int(cx.int(base)? * 3)));
        let runs = Rc::new(Cell::new(0u64));
        let counter = Rc::clone(&runs);
        let join = engine.derived(move |cx| {
            counter.set(counter.get() + 1);
            Ok(Value::Int(cx.int(left)? + cx.int(right)?))
        });
        engine.flush().unwrap();
        let baseline = runs.get();

        let mut changes = 0u64;
        let mut prev = 0i64;
        for w in &writes {
            engine.set(base, Value::Int(*w)).unwrap();
            if *w != prev {
                changes += 1;
            }
            prev = *w;
        }
        let last = *writes.last().unwrap();
        prop_assert_eq!(engine.get(join), Some(&Value::Int(4 * last + 1)));
        // One recompute per value-changing write, never more.
        prop_assert!(runs.get() - baseline <= changes);
    }
}

// ── 4. Interning stability ──────────────────────────────────────────────

proptest! {
    #[test]
    fn equal_leaves_share_one_identity(values in proptest::collection::vec(-50i64..50, 1..60)) {
        let mut engine = Engine::new();
        let mut first: std::collections::HashMap<i64, Identity> = std::collections::HashMap::new();
        for v in values {
            let id = engine.intern(Leaf::Int(v));
            let canonical = *first.entry(v).or_insert(id);
            prop_assert_eq!(id, canonical);
        }
    }
}

// ── 5. Draft isolation ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn draft_edits_never_leak_into_the_source(edits in int_writes()) {
        let mut engine = Engine::new();
        let initial = engine.intern_int(7);
        let source = engine
            .mutable(Value::Record(vec![(Arc::from("v"), initial)]))
            .unwrap();
        let draft = engine.draft(source).unwrap();

        for e in edits {
            let leaf = engine.intern_int(e);
            engine.set_field(draft, "v", leaf).unwrap();
            match engine.get(source) {
                Some(Value::Record(fields)) => prop_assert_eq!(fields[0].1, initial),
                other => prop_assert!(false, "expected record, got {:?}", other),
            }
        }
    }
}
