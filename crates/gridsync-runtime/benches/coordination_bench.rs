//! Benchmarks for the coordination hot paths.
//!
//! Run with: cargo bench -p gridsync-runtime --bench coordination_bench
//!
//! | Scenario                 | What is measured                              |
//! |--------------------------|-----------------------------------------------|
//! | content_hash/N           | canonical hash of an N-item page              |
//! | coalesce/N               | N drag updates under one key, then one poll   |
//! | gesture_commit/N         | begin, move, end, commit of an N-item page    |

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use gridsync_layout::{
    Breakpoint, ChangeSource, GridItem, LayoutChangeOrigin, LayoutItem, OperationId,
    OperationKind, ResponsiveLayouts, content_hash,
};
use gridsync_runtime::{
    CoordinationConfig, InteractionController, LayoutChangeManager, NullPersister,
    UnifiedLayoutState,
};

// ============================================================================
// Setup helpers
// ============================================================================

/// A page with `n` 2x2 items packed twelve columns wide, on two breakpoints.
fn page(n: u32) -> ResponsiveLayouts {
    let items = |cols: u32| -> Vec<LayoutItem> {
        (0..n)
            .map(|i| {
                LayoutItem::new(format!("m{i}"), format!("module-{}", i % 7), "core")
                    .at((i * 2) % cols, (i * 2) / cols * 2)
                    .sized(2, 2)
            })
            .collect()
    };
    ResponsiveLayouts::new()
        .with_breakpoint(Breakpoint::Desktop, items(12))
        .with_breakpoint(Breakpoint::Mobile, items(4))
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_content_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_hash");
    for &n in &[8u32, 64, 256] {
        let layouts = page(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &layouts, |b, layouts| {
            b.iter(|| black_box(content_hash(black_box(layouts))));
        });
    }
    group.finish();
}

fn bench_coalesce(c: &mut Criterion) {
    let mut group = c.benchmark_group("coalesce");
    let base = page(32);
    for &n in &[10u64, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut manager = LayoutChangeManager::default();
                let op = OperationId::new(1);
                for ts in 0..n {
                    let mut layouts = base.clone();
                    layouts.apply_grid_items(
                        Breakpoint::Desktop,
                        &[GridItem::new("m0", (ts % 10) as u32, 0, 2, 2)],
                    );
                    let origin =
                        LayoutChangeOrigin::new(ChangeSource::UserDrag, ts).with_operation(op);
                    manager.queue_layout_change(layouts, origin, None, None, ts);
                }
                black_box(manager.poll(n))
            });
        });
    }
    group.finish();
}

fn bench_gesture_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("gesture_commit");
    let config = CoordinationConfig::default();
    for &n in &[8u32, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let layout = UnifiedLayoutState::new(Some(page(n)), NullPersister, &config);
                let mut ctl = InteractionController::new(layout, config.interaction, config.bounce);
                ctl.begin_gesture(OperationKind::Drag, Breakpoint::Desktop, 0);
                for step in 1..=20u32 {
                    ctl.apply_grid_change(
                        Breakpoint::Desktop,
                        &[GridItem::new("m0", step % 10, step / 10, 2, 2)],
                        u64::from(step),
                    );
                }
                ctl.end_gesture(25);
                black_box(ctl.tick(25 + config.interaction.commit_delay()))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_content_hash, bench_coalesce, bench_gesture_commit);
criterion_main!(benches);
