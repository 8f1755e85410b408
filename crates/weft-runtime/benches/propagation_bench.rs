//! Propagation throughput: linear chains, fan-out diamonds, and keyed
//! record writes.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::hint::black_box;
use std::sync::Arc;

use weft_core::value::Value;
use weft_runtime::Engine;

fn chain_engine(depth: usize) -> (Engine, weft_runtime::Mutable, weft_runtime::Derived) {
    let mut engine = Engine::new();
    let base = engine.mutable(Value::Int(0)).expect("mutable");
    let mut tail = engine.derived(move |cx| Ok(Value::Int(cx.int(base)? + 1)));
    for _ in 1..depth {
        let prev = tail;
        tail = engine.derived(move |cx| Ok(Value::Int(cx.int(prev)? + 1)));
    }
    engine.flush().expect("initial drain");
    (engine, base, tail)
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("chain");
    for depth in [8usize, 64, 256] {
        group.bench_function(format!("depth_{depth}"), |b| {
            b.iter_batched(
                || chain_engine(depth),
                |(mut engine, base, tail)| {
                    engine.set(base, Value::Int(1)).expect("drain");
                    black_box(engine.get(tail).cloned())
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");
    for width in [8usize, 64, 256] {
        group.bench_function(format!("width_{width}"), |b| {
            b.iter_batched(
                || {
                    let mut engine = Engine::new();
                    let base = engine.mutable(Value::Int(0)).expect("mutable");
                    let arms: Vec<_> = (0..width)
                        .map(|i| {
                            engine.derived(move |cx| {
                                Ok(Value::Int(cx.int(base)? + i as i64))
                            })
                        })
                        .collect();
                    let join = engine.derived(move |cx| {
                        let mut sum = 0i64;
                        for arm in &arms {
                            sum += cx.int(*arm)?;
                        }
                        Ok(Value::Int(sum))
                    });
                    engine.flush().expect("initial drain");
                    (engine, base, join)
                },
                |(mut engine, base, join)| {
                    engine.set(base, Value::Int(7)).expect("drain");
                    black_box(engine.get(join).cloned())
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_keyed_writes(c: &mut Criterion) {
    c.bench_function("record_field_write", |b| {
        b.iter_batched(
            || {
                let mut engine = Engine::new();
                let zero = engine.intern_int(0);
                let one = engine.intern_int(1);
                let fields: Vec<_> = (0..32)
                    .map(|i| (Arc::from(format!("f{i}").as_str()), zero))
                    .collect();
                let row = engine.mutable(Value::Record(fields)).expect("mutable");
                engine.flush().expect("initial drain");
                (engine, row, one)
            },
            |(mut engine, row, one)| {
                engine.set_field(row, "f17", one).expect("write");
                black_box(engine.revision(row))
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_chain, bench_fanout, bench_keyed_writes);
criterion_main!(benches);
