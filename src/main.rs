use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use taskweave::{GlobalPtr, Runtime, TaskDep, UnitId};

fn main() {
    println!("taskweave - Bulk-Synchronous SPMD Task Runtime\n");

    let rt = Runtime::new().expect("runtime init");
    println!("Initialized unit {} with {} worker threads\n", rt.unit().0, rt.num_threads());

    // Example 1: a dependency chain on one location
    println!("Example 1: serialized producer/consumer chain");
    let g = GlobalPtr::new(UnitId(0), 0, 0x40);
    let acc = Arc::new(AtomicUsize::new(0));

    for _ in 0..100 {
        let acc = acc.clone();
        rt.create_task(
            move |_| {
                acc.fetch_add(1, Ordering::SeqCst);
            },
            &[TaskDep::inout(g)],
        )
        .expect("create task");
    }
    rt.task_complete().expect("barrier");
    println!("  Chain of 100 tasks accumulated: {}\n", acc.load(Ordering::SeqCst));

    // Example 2: independent parallel tasks
    println!("Example 2: parallel fan-out");
    let sum = Arc::new(AtomicUsize::new(0));
    let num_tasks = 10_000;

    let start = Instant::now();
    for i in 0..num_tasks {
        let sum = sum.clone();
        rt.create_task(
            move |_| {
                sum.fetch_add(i, Ordering::SeqCst);
            },
            &[],
        )
        .expect("create task");
    }
    rt.task_complete().expect("barrier");

    let expected: usize = (0..num_tasks).sum();
    println!("  Executed {} tasks in {:?}", num_tasks, start.elapsed());
    println!("  Sum: {} (expected {})\n", sum.load(Ordering::SeqCst), expected);

    // Example 3: phases defer work until the next barrier
    println!("Example 3: phase-deferred work");
    rt.phase().expect("phase advance");
    let late = Arc::new(AtomicUsize::new(0));
    let late_clone = late.clone();
    rt.create_task(
        move |_| {
            late_clone.store(1, Ordering::SeqCst);
        },
        &[],
    )
    .expect("create task");
    println!("  Before the barrier: {}", late.load(Ordering::SeqCst));
    rt.task_complete().expect("barrier");
    println!("  After the barrier:  {}\n", late.load(Ordering::SeqCst));

    rt.shutdown().expect("shutdown");
    println!("Done.");
}
