use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use tessera_core::geometry::{Aabb, Point};
use tessera_core::{shapes_in_box, HistoryManager, ObjectStore, Shape, ShapePatch, ShapeType};

fn populated(count: usize) -> ObjectStore {
    let mut store = ObjectStore::new();
    let kinds = [
        ShapeType::Rectangle,
        ShapeType::Circle,
        ShapeType::Line,
        ShapeType::Text,
    ];
    for i in 0..count {
        let mut shape = Shape::with_defaults(kinds[i % kinds.len()], format!("s{i}"), "bench", i as i64);
        shape.apply_patch(&ShapePatch {
            rotation: Some((i % 90) as f64),
            ..ShapePatch::position((i % 50) as f64 * 40.0, (i / 50) as f64 * 40.0)
        });
        store.add(shape);
    }
    store
}

fn bench_guarded_update(c: &mut Criterion) {
    let mut store = populated(1_000);
    store.lock("s1", "someone-else");
    let patch = ShapePatch::position(12.0, 34.0);

    c.bench_function("store_update_applied", |b| {
        b.iter(|| black_box(store.update(black_box("s500"), "bench", &patch)))
    });
    c.bench_function("store_update_locked", |b| {
        b.iter(|| black_box(store.update(black_box("s1"), "bench", &patch)))
    });
}

fn bench_snapshot_and_undo(c: &mut Criterion) {
    let store = populated(1_000);

    c.bench_function("snapshot_1k_shapes", |b| {
        b.iter(|| black_box(store.snapshot()))
    });

    c.bench_function("history_push_undo_redo_1k", |b| {
        let mut history = HistoryManager::default();
        b.iter(|| {
            history.push_state(store.snapshot());
            history.push_state(store.snapshot());
            black_box(history.undo());
            black_box(history.redo());
        })
    });
}

fn bench_marquee(c: &mut Criterion) {
    let store = populated(5_000);
    let marquee = Aabb::from_corners(Point::new(100.0, 100.0), Point::new(900.0, 900.0));

    c.bench_function("marquee_5k_shapes", |b| {
        b.iter(|| black_box(shapes_in_box(store.iter(), black_box(&marquee), "bench")))
    });
}

criterion_group!(benches, bench_guarded_update, bench_snapshot_and_undo, bench_marquee);
criterion_main!(benches);
