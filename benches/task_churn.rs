//! Task churn benchmark using criterion.
//!
//! Measures creation-to-completion throughput for independent tasks
//! (stealing-heavy) and for a serialized dependency chain.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use taskweave::{GlobalPtr, Runtime, TaskDep, UnitId};

fn bench_independent_tasks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("independent_tasks");
    group.sample_size(10);

    for total in [1_000usize, 10_000] {
        group.throughput(Throughput::Elements(total as u64));
        group.bench_with_input(BenchmarkId::from_parameter(total), &total, |b, &total| {
            b.iter(|| {
                let count = Arc::new(AtomicUsize::new(0));
                for _ in 0..total {
                    let count = count.clone();
                    rt.create_task(
                        move |_| {
                            count.fetch_add(1, Ordering::Relaxed);
                        },
                        &[],
                    )
                    .unwrap();
                }
                rt.task_complete().unwrap();
                assert_eq!(count.load(Ordering::Relaxed), total);
            });
        });
    }
    group.finish();
    rt.shutdown().unwrap();
}

fn bench_dependency_chain(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let g = GlobalPtr::new(UnitId(0), 0, 0x40);

    let mut group = c.benchmark_group("dependency_chain");
    group.sample_size(10);

    for total in [100usize, 1_000] {
        group.throughput(Throughput::Elements(total as u64));
        group.bench_with_input(BenchmarkId::from_parameter(total), &total, |b, &total| {
            b.iter(|| {
                let count = Arc::new(AtomicUsize::new(0));
                for _ in 0..total {
                    let count = count.clone();
                    rt.create_task(
                        move |_| {
                            count.fetch_add(1, Ordering::Relaxed);
                        },
                        &[TaskDep::inout(g)],
                    )
                    .unwrap();
                }
                rt.task_complete().unwrap();
                assert_eq!(count.load(Ordering::Relaxed), total);
            });
        });
    }
    group.finish();
    rt.shutdown().unwrap();
}

criterion_group!(benches, bench_independent_tasks, bench_dependency_chain);
criterion_main!(benches);
