//! Benchmarks for the Trellis matrix engine
//!
//! Measures performance of:
//! - Spillover placement into a nearly full window
//! - Matrix view building
//! - Commission calculation up a full chain

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use trellis_engine::{Investment, InvestmentStatus, ManualClock, MemoryStore, Participant, ReferralMatrix};
use trellis_matrix::{InvestmentId, Money, TierRateTable, UserId};

/// A root with `members` placed below it, plus one spare unplaced participant.
fn network(members: u64) -> ReferralMatrix<MemoryStore> {
    let matrix = ReferralMatrix::new(MemoryStore::new(), TierRateTable::standard()).with_clock(ManualClock::new(0));
    for id in 1..=members + 2 {
        matrix
            .register_participant(&Participant::new(UserId(id)).with_tier("Elite"))
            .expect("register");
    }
    for id in 2..=members + 1 {
        matrix.find_or_create_position(UserId(1), UserId(id)).expect("place");
    }
    matrix
}

/// Benchmark placing the last user into a window with `members` taken slots
fn bench_spillover_placement(c: &mut Criterion) {
    let mut group = c.benchmark_group("spillover_placement");

    for &members in &[3u64, 12, 38] {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(members), &members, |b, &members| {
            b.iter_batched(
                || network(members),
                |matrix| {
                    matrix
                        .find_or_create_position(UserId(1), black_box(UserId(members + 2)))
                        .expect("place")
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

/// Benchmark building views of a full window
fn bench_matrix_view(c: &mut Criterion) {
    let matrix = network(39);
    let mut group = c.benchmark_group("matrix_view");

    for &depth in &[1u8, 2, 3] {
        group.bench_with_input(BenchmarkId::new("depth", depth), &depth, |b, &depth| {
            b.iter(|| matrix.build_matrix_view(black_box(UserId(1)), depth).expect("view"))
        });
    }
    group.bench_function("statistics", |b| {
        b.iter(|| matrix.matrix_statistics(black_box(UserId(1))).expect("statistics"))
    });
    group.finish();
}

/// Benchmark commission calculation at the bottom of a full window
fn bench_commission_calculation(c: &mut Criterion) {
    let matrix = network(39);
    let investment = Investment::new(InvestmentId(1), UserId(40), Money::from_major(10_000), InvestmentStatus::Active);

    c.bench_function("calculate_commissions", |b| {
        b.iter(|| matrix.calculate_commissions(black_box(&investment)).expect("calculate"))
    });
}

criterion_group!(
    benches,
    bench_spillover_placement,
    bench_matrix_view,
    bench_commission_calculation,
);
criterion_main!(benches);
