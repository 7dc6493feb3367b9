//! Trampoline benchmarks for weft-runtime
//!
//! These benchmarks measure the per-step cost of the interpreter on long
//! composition chains, where every step goes through the handler registry
//! and the continuation stack.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use weft_effects::{Effect, Schedule};
use weft_runtime::{Runtime, VirtualClock};

fn left_nested(depth: u64) -> Effect<u64, ()> {
    let mut effect = Effect::succeed(0);
    for _ in 0..depth {
        effect = effect.flat_map(|n| Effect::succeed(n + 1));
    }
    effect
}

fn countdown(n: u64) -> Effect<u64, ()> {
    Effect::succeed(n).flat_map(|n| {
        if n == 0 {
            Effect::succeed(0)
        } else {
            countdown(n - 1)
        }
    })
}

// ============================================================================
// Chains
// ============================================================================

fn bench_flat_map_chains(c: &mut Criterion) {
    let runtime: Runtime<()> = Runtime::new();
    let mut group = c.benchmark_group("flat_map_chain");

    for depth in [1_000u64, 10_000] {
        group.throughput(Throughput::Elements(depth));

        let effect = left_nested(depth);
        group.bench_with_input(BenchmarkId::new("left_nested", depth), &effect, |b, effect| {
            b.iter(|| black_box(runtime.run(effect)))
        });

        let effect = countdown(depth);
        group.bench_with_input(BenchmarkId::new("tail_recursive", depth), &effect, |b, effect| {
            b.iter(|| black_box(runtime.run(effect)))
        });
    }

    group.finish();
}

// ============================================================================
// Policies
// ============================================================================

fn bench_retry_under_virtual_clock(c: &mut Criterion) {
    let runtime: Runtime<()> = Runtime::builder().clock(VirtualClock::new(0)).build();
    let effect = Effect::<u64, ()>::fail(())
        .retry_with(Schedule::exponential_backoff(Duration::from_millis(10)).up_to_max_retries(10))
        .or_else(Effect::succeed(1));

    c.bench_function("retry_ten_times", |b| b.iter(|| black_box(runtime.run(&effect))));
}

criterion_group!(benches, bench_flat_map_chains, bench_retry_under_virtual_clock);
criterion_main!(benches);
