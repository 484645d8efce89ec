use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;

use xacto::data::{Blob, Key};
use xacto::store::Store;
use xacto::transaction::TransactionManager;

fn generate_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Repeated writes by one transaction overwrite its version in place, so
/// the chain stays short and the numbers reflect steady-state cost.
fn bench_store_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_put");

    for size in [16, 256, 4096, 65536] {
        let value = generate_data(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("same_key", size), &value, |b, value| {
            let manager = TransactionManager::new();
            let store = Store::new();
            let txn = manager.begin();
            b.iter(|| store.put(&txn, Key::new(Blob::new(b"bench")), Blob::new(black_box(value))));
        });
    }

    group.finish();
}

fn bench_store_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_get");

    for size in [16, 256, 4096, 65536] {
        let value = generate_data(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("same_key", size), &value, |b, value| {
            let manager = TransactionManager::new();
            let store = Store::new();
            let txn = manager.begin();
            store.put(&txn, Key::new(Blob::new(b"bench")), Blob::new(value));
            b.iter(|| store.get(&txn, Key::new(Blob::new(black_box(b"bench")))));
        });
    }

    group.finish();
}

/// A chain of transactions writing the same key and committing in ID
/// order, which exercises dependency registration and the wake path.
fn bench_commit_chain(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("commit_chain");

    for depth in [2usize, 8, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| {
                rt.block_on(async {
                    let manager = TransactionManager::new();
                    let store = Store::new();
                    let mut txns = Vec::with_capacity(depth);
                    for i in 0..depth {
                        let txn = manager.begin();
                        store.put(&txn, Key::new(Blob::new(b"k")), Blob::new(&[i as u8]));
                        txns.push(txn);
                    }
                    for txn in &txns {
                        txn.commit().await;
                    }
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_store_put, bench_store_get, bench_commit_chain);
criterion_main!(benches);
