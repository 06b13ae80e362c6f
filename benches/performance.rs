//! Performance benchmarks for the profile store.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use profile_replication::{
    ProfilePath, ProfileStore, ProfileStoreConfig, SessionId, SubscriptionConfig, Value,
};
use serde_json::json;
use tempfile::TempDir;

fn template() -> Value {
    Value::from_json(json!({
        "gold": 0,
        "inventory": {"weapons": [], "armor": []},
        "settings": {"music": true, "volume": 0.5}
    }))
    .unwrap()
}

fn memory_store() -> ProfileStore {
    let store = ProfileStore::in_memory(ProfileStoreConfig::default());
    store.initialize("PlayerData", template()).unwrap();
    store
}

/// Build a profile with `width` entries in a nested list
fn populate(store: &ProfileStore, session: SessionId, width: usize) {
    for i in 0..width {
        let weapon = Value::from_json(json!({"id": i, "damage": 10, "name": format!("weapon-{}", i)})).unwrap();
        store
            .add_table(session, "inventory.weapons", weapon, None)
            .unwrap();
    }
}

/// Benchmark increments on a live profile
fn bench_increment(c: &mut Criterion) {
    let store = memory_store();
    store.load(SessionId(1)).unwrap();

    c.bench_function("increment", |b| {
        b.iter(|| {
            black_box(store.increment(SessionId(1), "gold", 1).unwrap());
        });
    });
}

/// Benchmark increments while a replication subscriber is attached
fn bench_increment_replicated(c: &mut Criterion) {
    let store = memory_store();
    store.load(SessionId(1)).unwrap();
    let handle = store.signals().subscribe(SubscriptionConfig::default());

    c.bench_function("increment_replicated", |b| {
        b.iter(|| {
            black_box(store.increment(SessionId(1), "gold", 1).unwrap());
            black_box(handle.drain());
        });
    });
}

/// Benchmark deep path writes with varying list sizes
fn bench_nested_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("nested_set");

    for width in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("weapons", width), &width, |b, &width| {
            let store = memory_store();
            store.load(SessionId(1)).unwrap();
            populate(&store, SessionId(1), width);
            let path = ProfilePath::parse(&format!("inventory.weapons.{}.damage", width / 2)).unwrap();

            b.iter(|| {
                store.set(SessionId(1), &path, 42).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark path parsing
fn bench_path_parse(c: &mut Criterion) {
    c.bench_function("path_parse", |b| {
        b.iter(|| {
            black_box(ProfilePath::parse("inventory.weapons.12.enchantments.fire.level").unwrap());
        });
    });
}

/// Benchmark saving profiles of varying size to disk
fn bench_file_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_save");

    for width in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("weapons", width), &width, |b, &width| {
            let dir = TempDir::new().unwrap();
            let store = ProfileStore::open(ProfileStoreConfig::default(), dir.path()).unwrap();
            store.initialize("PlayerData", template()).unwrap();
            store.load(SessionId(1)).unwrap();
            populate(&store, SessionId(1), width);

            b.iter(|| {
                store.save(SessionId(1)).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark a full load/release cycle against disk
fn bench_load_release(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = ProfileStore::open(ProfileStoreConfig::default(), dir.path()).unwrap();
    store.initialize("PlayerData", template()).unwrap();

    c.bench_function("load_release", |b| {
        b.iter(|| {
            black_box(store.load(SessionId(1)).unwrap());
            store.release(SessionId(1)).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_increment,
    bench_increment_replicated,
    bench_nested_set,
    bench_path_parse,
    bench_file_save,
    bench_load_release,
);

criterion_main!(benches);
