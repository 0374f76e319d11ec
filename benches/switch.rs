//! Context-switch throughput benchmarks.
//!
//! Every yield between two runnable threads costs two swaps (out and back),
//! so the round-trip benchmark approximates raw switch cost once divided by
//! the yield count.

use criterion::{criterion_group, criterion_main, Criterion};
use weft::{join, spawn, yield_now};

const YIELDS: usize = 64;

fn yield_round_trips(c: &mut Criterion) {
    c.bench_function("yield_pair_round_trips", |b| {
        b.iter(|| {
            let ping = spawn("ping", || {
                for _ in 0..YIELDS {
                    yield_now();
                }
            });
            let pong = spawn("pong", || {
                for _ in 0..YIELDS {
                    yield_now();
                }
            });
            join(ping);
            join(pong);
        })
    });
}

fn spawn_and_reap(c: &mut Criterion) {
    c.bench_function("spawn_and_reap", |b| {
        b.iter(|| {
            let tid = spawn("ephemeral", || {});
            join(tid);
        })
    });
}

criterion_group!(benches, yield_round_trips, spawn_and_reap);
criterion_main!(benches);
