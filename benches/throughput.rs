//! Throughput benchmarks for the copy-on-write cell.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use petek::{DefaultAllocator, LockFreeCell};
use std::sync::{Arc, RwLock};
use std::thread;

fn bench_read_scope(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_scope");
    group.throughput(Throughput::Elements(1));

    let cell: LockFreeCell<_, DefaultAllocator> = LockFreeCell::new(42u64);
    group.bench_function("petek_read_only", |b| {
        b.iter(|| {
            let reader = cell.read_only();
            black_box(*reader)
        })
    });

    let lock = RwLock::new(42u64);
    group.bench_function("rwlock_read", |b| {
        b.iter(|| {
            let guard = lock.read().unwrap();
            black_box(*guard)
        })
    });

    group.finish();
}

fn bench_write_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_paths");
    group.throughput(Throughput::Elements(1));

    let cell: LockFreeCell<_, DefaultAllocator> = LockFreeCell::new(0u64);
    group.bench_function("petek_invoke", |b| {
        b.iter(|| {
            cell.invoke(|v| {
                *v = v.wrapping_add(1);
                *v
            })
        })
    });
    group.bench_function("petek_try_write", |b| {
        b.iter(|| {
            let mut writer = cell.try_write();
            let next = writer.wrapping_add(1);
            *writer = next;
            writer.commit()
        })
    });

    let lock = RwLock::new(0u64);
    group.bench_function("rwlock_write", |b| {
        b.iter(|| {
            let mut guard = lock.write().unwrap();
            let next = guard.wrapping_add(1);
            *guard = next;
            *guard
        })
    });

    group.finish();
}

fn bench_contended_readers(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_readers");

    for readers in [2usize, 4] {
        group.throughput(Throughput::Elements((readers * 1_000) as u64));
        group.bench_with_input(
            BenchmarkId::new("petek", readers),
            &readers,
            |b, &readers| {
                let cell: Arc<LockFreeCell<_, DefaultAllocator>> = Arc::new(LockFreeCell::new(vec![7u64; 16]));
                b.iter(|| {
                    let mut handles = Vec::new();
                    for _ in 0..readers {
                        let cell = Arc::clone(&cell);
                        handles.push(thread::spawn(move || {
                            let mut acc = 0u64;
                            for _ in 0..1_000 {
                                let reader = cell.read_only();
                                acc = acc.wrapping_add(reader[0]);
                            }
                            acc
                        }));
                    }
                    let mut total = 0u64;
                    for handle in handles {
                        total = total.wrapping_add(handle.join().unwrap());
                    }
                    black_box(total)
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_read_scope,
    bench_write_paths,
    bench_contended_readers
);
criterion_main!(benches);
