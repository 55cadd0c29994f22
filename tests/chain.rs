//! Ordering guarantees for dependency chains on a single location.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use taskweave::{GlobalPtr, Runtime, TaskDep, UnitId};

fn gptr(offset: u64) -> GlobalPtr {
    GlobalPtr::new(UnitId(0), 0, offset)
}

#[test]
fn test_inout_chain_runs_in_creation_order() {
    let rt = Runtime::builder().threads(4).build().unwrap();
    let g = gptr(0x100);
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..100 {
        let order = order.clone();
        rt.create_task(
            move |_| {
                order.lock().unwrap().push(i);
            },
            &[TaskDep::inout(g)],
        )
        .unwrap();
    }
    rt.task_complete().unwrap();

    let order = order.lock().unwrap();
    assert_eq!(order.len(), 100);
    assert!(
        order.windows(2).all(|w| w[0] < w[1]),
        "read-modify-write chain executed out of creation order: {:?}",
        &order[..]
    );
    rt.shutdown().unwrap();
}

#[test]
fn test_reader_observes_its_producer() {
    let rt = Runtime::builder().threads(4).build().unwrap();
    let g = gptr(0x200);
    let value = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(AtomicUsize::new(0));

    let produced = value.clone();
    rt.create_task(
        move |_| {
            produced.store(7, Ordering::SeqCst);
        },
        &[TaskDep::output(g)],
    )
    .unwrap();

    let read = value.clone();
    let seen = observed.clone();
    rt.create_task(
        move |_| {
            seen.store(read.load(Ordering::SeqCst), Ordering::SeqCst);
        },
        &[TaskDep::input(g)],
    )
    .unwrap();

    rt.task_complete().unwrap();
    assert_eq!(observed.load(Ordering::SeqCst), 7);
    rt.shutdown().unwrap();
}

#[test]
fn test_writer_waits_for_earlier_readers() {
    let rt = Runtime::builder().threads(4).build().unwrap();
    let g = gptr(0x300);
    let flag = Arc::new(AtomicUsize::new(0));
    let reader_saw = Arc::new(AtomicUsize::new(usize::MAX));

    let read = flag.clone();
    let saw = reader_saw.clone();
    rt.create_task(
        move |_| {
            // Give the writer every chance to jump the queue if the
            // serialization were broken.
            thread::sleep(Duration::from_millis(30));
            saw.store(read.load(Ordering::SeqCst), Ordering::SeqCst);
        },
        &[TaskDep::input(g)],
    )
    .unwrap();

    let write = flag.clone();
    rt.create_task(
        move |_| {
            write.store(1, Ordering::SeqCst);
        },
        &[TaskDep::output(g)],
    )
    .unwrap();

    rt.task_complete().unwrap();
    assert_eq!(reader_saw.load(Ordering::SeqCst), 0);
    assert_eq!(flag.load(Ordering::SeqCst), 1);
    rt.shutdown().unwrap();
}

#[test]
fn test_direct_dependency_and_task_wait() {
    let rt = Runtime::builder().threads(4).build().unwrap();
    let first_done = Arc::new(AtomicUsize::new(0));

    let done = first_done.clone();
    let handle = rt
        .create_task_handle(
            move |_| {
                thread::sleep(Duration::from_millis(10));
                done.store(1, Ordering::SeqCst);
            },
            &[],
        )
        .unwrap();

    let check = first_done.clone();
    let ordered = Arc::new(AtomicUsize::new(0));
    let ordered_clone = ordered.clone();
    rt.create_task(
        move |_| {
            ordered_clone.store(check.load(Ordering::SeqCst), Ordering::SeqCst);
        },
        &[TaskDep::direct(&handle)],
    )
    .unwrap();

    rt.task_complete().unwrap();
    assert_eq!(ordered.load(Ordering::SeqCst), 1);

    // The handle survived the barrier; task_wait retires it.
    rt.task_wait(handle).unwrap();
    rt.shutdown().unwrap();
}

#[test]
fn test_task_wait_executes_until_finished() {
    let rt = Runtime::builder().threads(2).build().unwrap();
    let done = Arc::new(AtomicUsize::new(0));

    let flag = done.clone();
    let handle = rt
        .create_task_handle(
            move |_| {
                flag.store(1, Ordering::SeqCst);
            },
            &[],
        )
        .unwrap();

    rt.task_wait(handle).unwrap();
    assert_eq!(done.load(Ordering::SeqCst), 1);

    rt.task_complete().unwrap();
    rt.shutdown().unwrap();
}

#[test]
fn test_nested_tasks_complete_with_their_parent() {
    let rt = Runtime::builder().threads(4).build().unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    let outer = count.clone();
    rt.create_task(
        move |scope| {
            for _ in 0..10 {
                let inner = outer.clone();
                scope
                    .create_task(
                        move |_| {
                            inner.fetch_add(1, Ordering::SeqCst);
                        },
                        &[],
                    )
                    .unwrap();
            }
            // The implicit wait on return would cover this too; the
            // explicit call exercises the scope API.
            scope.task_complete().unwrap();
            assert_eq!(outer.load(Ordering::SeqCst), 10);
        },
        &[],
    )
    .unwrap();

    rt.task_complete().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 10);
    rt.shutdown().unwrap();
}
