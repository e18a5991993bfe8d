//! Benchmark for store hot paths: spawn, in-place update, migration, delete,
//! and bulk column access.
//!
//! Run with: cargo bench --package tessera_core --bench store_benchmark

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tessera_core::{ComponentSchema, ComponentValues, ScalarKind, SchemaFragment, Shape, Store, Value};

const ENTITY_COUNT: u32 = 10_000;

fn schema() -> SchemaFragment {
    SchemaFragment::new()
        .with_component("position", ComponentSchema::new(Shape::array(ScalarKind::F32, 3)))
        .with_component("velocity", ComponentSchema::new(Shape::array(ScalarKind::F32, 3)))
        .with_component("mass", ComponentSchema::new(Shape::F32))
        .with_archetype("particle", ["position", "velocity"])
}

fn position(x: f32) -> ComponentValues {
    let mut values = ComponentValues::new();
    values.insert("position".into(), Value::f32s(&[x, 0.0, 0.0]));
    values
}

fn populated() -> Store {
    let mut store = Store::new(schema()).unwrap();
    let particle = store.named_archetype("particle").unwrap();
    for i in 0..ENTITY_COUNT {
        store.insert(particle, &position(i as f32)).unwrap();
    }
    store
}

fn benchmark_spawn(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn");
    group.throughput(Throughput::Elements(u64::from(ENTITY_COUNT)));
    group.sample_size(20);

    group.bench_function("10k_particles", |b| {
        b.iter_batched(
            || Store::new(schema()).unwrap(),
            |mut store| {
                let particle = store.named_archetype("particle").unwrap();
                let values = position(1.0);
                for _ in 0..ENTITY_COUNT {
                    black_box(store.insert(particle, &values).unwrap());
                }
                store
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn benchmark_update_in_place(c: &mut Criterion) {
    let mut store = populated();
    let entities = store.select(&["position"], &[]).unwrap();
    let values = position(7.0);

    c.bench_function("update_in_place", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % entities.len();
            store.update(black_box(entities[i]), &values).unwrap();
        });
    });
}

fn benchmark_migrate_and_back(c: &mut Criterion) {
    let mut store = populated();
    let entities = store.select(&["position"], &[]).unwrap();
    let mut add = ComponentValues::new();
    add.insert("mass".into(), Value::F32(2.0));
    let mut remove = ComponentValues::new();
    remove.insert("mass".into(), Value::Undefined);

    c.bench_function("migrate_add_remove", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % entities.len();
            store.update(entities[i], &add).unwrap();
            store.update(entities[i], &remove).unwrap();
        });
    });
}

fn benchmark_delete_respawn(c: &mut Criterion) {
    let mut store = populated();
    let particle = store.named_archetype("particle").unwrap();
    let values = position(3.0);

    c.bench_function("delete_respawn", |b| {
        let mut victim = store.select(&["position"], &[]).unwrap()[0];
        b.iter(|| {
            store.delete(victim).unwrap();
            victim = store.insert(particle, &values).unwrap();
        });
    });
}

fn benchmark_leaf_scan(c: &mut Criterion) {
    let store = populated();
    let query = store.query(&["position"], &[]).unwrap();

    c.bench_function("sum_position_x_leaf", |b| {
        b.iter(|| {
            let mut sum = 0.0f32;
            for id in &query {
                let column = store.archetype(id).unwrap().column("position").unwrap();
                if let Some(xs) = column.leaf(0).and_then(|l| l.as_f32()) {
                    sum += xs.iter().sum::<f32>();
                }
            }
            black_box(sum)
        });
    });
}

criterion_group!(
    benches,
    benchmark_spawn,
    benchmark_update_in_place,
    benchmark_migrate_and_back,
    benchmark_delete_respawn,
    benchmark_leaf_scan
);
criterion_main!(benches);
