//! Phase semantics: work created past a phase advance stays deferred
//! until the next barrier moves the phase bound.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use taskweave::{Error, GlobalPtr, Runtime, RuntimeBuilder, TaskDep, UnitId};

fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn test_phase_advance_defers_new_tasks() {
    let rt = Runtime::builder().threads(2).build().unwrap();
    let g = GlobalPtr::new(UnitId(0), 0, 0x500);

    let early = Arc::new(AtomicUsize::new(0));
    let late = Arc::new(AtomicUsize::new(0));

    // Two phase-0 tasks with a cross-dependency: runnable right away.
    let produced = early.clone();
    rt.create_task(
        move |_| {
            produced.fetch_add(1, Ordering::SeqCst);
        },
        &[TaskDep::output(g)],
    )
    .unwrap();
    let consumed = early.clone();
    rt.create_task(
        move |_| {
            consumed.fetch_add(1, Ordering::SeqCst);
        },
        &[TaskDep::input(g)],
    )
    .unwrap();

    assert_eq!(rt.current_phase(), 0);
    rt.phase().unwrap();
    assert_eq!(rt.current_phase(), 1);

    // Two phase-1 tasks without dependencies: held at the phase bound.
    for _ in 0..2 {
        let late = late.clone();
        rt.create_task(
            move |_| {
                late.fetch_add(1, Ordering::SeqCst);
            },
            &[],
        )
        .unwrap();
    }

    // The workers drain the phase-0 pair without any barrier...
    assert!(
        wait_until(|| early.load(Ordering::SeqCst) == 2),
        "phase-0 tasks should run before the barrier"
    );
    // ...while the phase-1 pair stays parked.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(late.load(Ordering::SeqCst), 0, "phase-1 tasks ran too early");

    rt.task_complete().unwrap();
    assert_eq!(late.load(Ordering::SeqCst), 2);
    rt.shutdown().unwrap();
}

#[test]
fn test_dependencies_span_phases_after_the_barrier() {
    let rt = Runtime::builder().threads(2).build().unwrap();
    let g = GlobalPtr::new(UnitId(0), 0, 0x600);
    let value = Arc::new(AtomicUsize::new(0));

    let produced = value.clone();
    rt.create_task(
        move |_| {
            produced.store(5, Ordering::SeqCst);
        },
        &[TaskDep::output(g)],
    )
    .unwrap();

    rt.phase().unwrap();

    let observed = Arc::new(AtomicUsize::new(0));
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
    assert_eq!(observed.load(Ordering::SeqCst), 5);
    rt.shutdown().unwrap();
}

#[test]
fn test_builder_rejects_unit_outside_collective() {
    let result = RuntimeBuilder::new().unit(UnitId(3), 2).build();
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn test_builder_defaults() {
    let rt = Runtime::new().unwrap();
    assert!(rt.num_threads() >= 1);
    assert_eq!(rt.thread_num(), 0);
    assert_eq!(rt.unit(), UnitId(0));
    assert_eq!(rt.num_units(), 1);
    assert_eq!(rt.current_phase(), 0);
    rt.shutdown().unwrap();
}
