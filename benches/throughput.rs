//! Throughput Benchmark for SnowKV
//!
//! Measures the core store operations and the binary codec under
//! representative payload sizes.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use snowkv::codec::{decode, encode, Value};
use snowkv::config::Config;
use snowkv::storage::Store;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn bench_store(dir: &tempfile::TempDir, rt: &Runtime) -> Arc<Store> {
    let mut config = Config::default();
    config.dir.database = dir.path().to_path_buf();
    config.persistent.enabled = false;
    Arc::new(rt.block_on(Store::open(&config, "SNOWKV01")).unwrap())
}

/// Benchmark set operations
fn bench_set(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = bench_store(&dir, &rt);

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key-{}", i);
            rt.block_on(store.set(&key, Value::from("small_value")));
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut i = 0u64;
        let value = Value::from("x".repeat(1024).as_str()); // 1KB value
        b.iter(|| {
            let key = format!("key-{}", i);
            rt.block_on(store.set(&key, value.clone()));
            i += 1;
        });
    });

    group.bench_function("set_overwrite", |b| {
        b.iter(|| {
            rt.block_on(store.set("hot_key", Value::Int(7)));
        });
    });

    group.finish();
}

/// Benchmark get operations
fn bench_get(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let store = bench_store(&dir, &rt);

    // Pre-populate with data
    rt.block_on(async {
        for i in 0..10_000 {
            store
                .set(&format!("key-{}", i), Value::from(format!("value-{}", i)))
                .await;
        }
    });

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_hit", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key-{}", i % 10_000);
            black_box(rt.block_on(store.get(&key)));
            i += 1;
        });
    });

    group.bench_function("get_miss", |b| {
        b.iter(|| {
            black_box(rt.block_on(store.get("absent_key")));
        });
    });

    group.finish();
}

/// Benchmark the binary codec
fn bench_codec(c: &mut Criterion) {
    let value = Value::Map(vec![
        ("name".to_string(), Value::from("snowkv")),
        ("count".to_string(), Value::Int(42)),
        (
            "items".to_string(),
            Value::Seq((0..32).map(Value::Int).collect()),
        ),
        ("payload".to_string(), Value::from("x".repeat(512).as_str())),
    ]);
    let encoded = encode(&value);

    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Bytes(encoded.len() as u64));

    group.bench_function("encode", |b| {
        b.iter(|| black_box(encode(black_box(&value))));
    });

    group.bench_function("decode", |b| {
        b.iter(|| black_box(decode(black_box(&encoded)).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_set, bench_get, bench_codec);
criterion_main!(benches);
