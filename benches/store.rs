//! Store Benchmarks
//!
//! Measures the hot paths of the engine:
//! - set: one appended record plus the 8-byte meta update
//! - get: dictionary lookup after the change check
//! - reopen: map, CRC-validate, and decode a populated store
//!
//! ## Running Benchmarks
//!
//! ```bash
//! cargo bench --bench store
//! cargo bench --bench store -- "set"
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use pagekv::{Store, SyncMode};
use tempfile::tempdir;

static STORE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn fresh_id() -> String {
    format!("bench-{}", STORE_COUNTER.fetch_add(1, Ordering::Relaxed))
}

fn open_store_with_id(dir: &tempfile::TempDir, id: &str) -> Arc<Store> {
    pagekv::initialize(std::env::temp_dir().join(format!("pagekv-bench-{}", std::process::id())));
    Store::builder(id).directory(dir.path()).open().unwrap()
}

fn open_store(dir: &tempfile::TempDir) -> Arc<Store> {
    open_store_with_id(dir, &fresh_id())
}

fn bench_set(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));
    let mut i = 0u64;
    group.bench_function("string_64b", |b| {
        let value = "v".repeat(64);
        b.iter(|| {
            i += 1;
            store.set_string(&format!("key-{}", i % 10_000), black_box(&value))
        });
    });
    group.bench_function("i64", |b| {
        b.iter(|| {
            i += 1;
            store.set_i64(&format!("num-{}", i % 10_000), black_box(i as i64))
        });
    });
    group.finish();
    store.close();
}

fn bench_get(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = open_store(&dir);
    for i in 0..10_000 {
        store.set_string(&format!("key-{}", i), "some stable value");
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));
    let mut i = 0u64;
    group.bench_function("string_hit", |b| {
        b.iter(|| {
            i += 1;
            black_box(store.get_string(&format!("key-{}", i % 10_000)))
        });
    });
    group.bench_function("string_miss", |b| {
        b.iter(|| black_box(store.get_string("absent-key")));
    });
    group.finish();
    store.close();
}

fn bench_reopen(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let id = fresh_id();
    let store = open_store_with_id(&dir, &id);
    for i in 0..10_000 {
        store.set_string(&format!("key-{}", i), "some stable value");
    }
    store.sync(SyncMode::Sync);
    store.close();

    c.bench_function("reopen_10k_keys", |b| {
        b.iter(|| {
            let store = open_store_with_id(&dir, &id);
            assert_eq!(store.count(), 10_000);
            store.close();
        });
    });
}

criterion_group!(benches, bench_set, bench_get, bench_reopen);
criterion_main!(benches);
