//! The scheduler core: thread pool, work stealing and the task lifecycle.
//!
//! A fixed pool of OS threads executes tasks cooperatively; a task runs to
//! completion on the worker that started it. `task_complete` and
//! `task_wait` are the only suspension points, and suspension means
//! re-entering the scheduler loop with a termination predicate — the
//! waiting worker keeps executing runnable tasks and stealing from peers.

use crate::datadeps::DataDeps;
use crate::dep::TaskDep;
use crate::error::{Error, Result};
use crate::gptr::UnitId;
use crate::pool::TaskPool;
use crate::remote::{Envelope, RemoteMessage, Transport};
use crate::runtime::TaskScope;
use crate::task::{Task, TaskFn, TaskRef, TaskState};
use crate::taskqueue::{DeferredQueue, QueueStealer, RunQueue};
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace};

/// How long an idle worker naps before re-checking for work. The
/// work-available broadcast usually wakes it much earlier; the timeout only
/// bounds the window between a wake-up condition and the broadcast.
const IDLE_WAIT: Duration = Duration::from_millis(1);

/// The slice of per-worker state visible to every thread.
pub(crate) struct WorkerShared {
    pub(crate) stealer: QueueStealer,
    pub(crate) deferred: DeferredQueue,
}

/// The thread-private side of one worker: its runnable queue and the task
/// it is currently executing. Worker 0 is the master (the thread that
/// initialized the runtime); workers 1..N-1 are spawned.
pub(crate) struct WorkerCtx {
    pub(crate) id: usize,
    pub(crate) sched: Arc<Scheduler>,
    pub(crate) queue: RunQueue,
    pub(crate) current: RefCell<Arc<Task>>,
}

/// Shared scheduler state of one unit.
pub(crate) struct Scheduler {
    unit: UnitId,
    num_units: usize,
    num_threads: usize,
    parallel: AtomicBool,
    /// Frontier up to which releases apply immediately; newer phases defer.
    phase_bound: AtomicU64,
    next_id: AtomicU64,
    root: Arc<Task>,
    shared: Vec<WorkerShared>,
    idle: Mutex<()>,
    task_avail: Condvar,
    pub(crate) deps: DataDeps,
    transport: Box<dyn Transport>,
    tasks: TaskPool,
}

impl Scheduler {
    pub(crate) fn new(
        unit: UnitId,
        num_units: usize,
        num_threads: usize,
        shared: Vec<WorkerShared>,
        transport: Box<dyn Transport>,
    ) -> Self {
        Scheduler {
            unit,
            num_units,
            num_threads,
            parallel: AtomicBool::new(true),
            phase_bound: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            root: Task::new_root(),
            shared,
            idle: Mutex::new(()),
            task_avail: Condvar::new(),
            deps: DataDeps::new(),
            transport,
            tasks: TaskPool::new(),
        }
    }

    pub(crate) fn unit(&self) -> UnitId {
        self.unit
    }

    pub(crate) fn num_units(&self) -> usize {
        self.num_units
    }

    pub(crate) fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub(crate) fn root(&self) -> &Arc<Task> {
        &self.root
    }

    pub(crate) fn parallel(&self) -> bool {
        self.parallel.load(Ordering::Relaxed)
    }

    pub(crate) fn phase_bound(&self) -> u64 {
        self.phase_bound.load(Ordering::SeqCst)
    }

    pub(crate) fn send(&self, envelope: Envelope) -> Result<()> {
        self.transport.send(envelope)
    }

    /// Serve every message pending for this unit.
    pub(crate) fn remote_progress(&self, worker: &WorkerCtx) -> usize {
        let mut served = 0;
        while let Some(env) = self.transport.poll(self.unit) {
            self.dispatch(worker, env);
            served += 1;
        }
        served
    }

    /// Keep serving until a whole pass finds the queue quiescent.
    pub(crate) fn remote_progress_blocking(&self, worker: &WorkerCtx) {
        while self.remote_progress(worker) > 0 {}
    }

    fn dispatch(&self, worker: &WorkerCtx, env: Envelope) {
        match env.msg {
            RemoteMessage::DataDep {
                dep_type,
                gptr,
                phase,
                task,
            } => self
                .deps
                .handle_remote_task(dep_type, gptr, phase, task, env.from),
            RemoteMessage::Release { task, .. } => self.deps.release_remote_dep(self, worker, task),
            RemoteMessage::DirectDep {
                predecessor,
                successor,
            } => self
                .deps
                .handle_remote_direct(self, predecessor, successor, env.from),
        }
    }

    /// Hand a runnable task to its creator's queue, or park it in the
    /// deferred queue when its phase lies beyond the phase bound.
    pub(crate) fn enqueue_runnable(&self, worker: &WorkerCtx, task: Arc<Task>) {
        if task.phase() > self.phase_bound() {
            trace!(
                "deferring task {} from phase {} past the bound",
                task.id(),
                task.phase()
            );
            self.shared[worker.id].deferred.push(task);
        } else {
            worker.queue.push(task);
        }
    }

    /// Pop from the caller's queue, or steal from the tail of the first
    /// non-empty peer, scanning round-robin starting to the right.
    pub(crate) fn next_task(&self, worker: &WorkerCtx) -> Option<Arc<Task>> {
        if let Some(task) = worker.queue.pop() {
            return Some(task);
        }
        for i in 1..self.num_threads {
            let victim = (worker.id + i) % self.num_threads;
            if self.shared[victim].stealer.is_empty() {
                continue;
            }
            if let Some(task) = self.shared[victim].stealer.steal() {
                debug!("worker {} stole task {} from worker {}", worker.id, task.id(), victim);
                return Some(task);
            }
        }
        None
    }

    /// Execute one task through its full lifecycle on this worker.
    pub(crate) fn handle_task(self: &Arc<Self>, worker: &WorkerCtx, task: Arc<Task>) {
        trace!("worker {} executing task {}", worker.id, task.id());
        let previous = worker.current.replace(task.clone());

        let work = {
            let mut inner = task.inner.lock();
            inner.state = TaskState::Running;
            inner.work.take()
        };
        if let Some(work) = work {
            let scope = TaskScope::new(worker);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| work(&scope))) {
                let msg = payload
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("unknown panic payload");
                error!("task {} panicked: {}", task.id(), msg);
            }
        }

        // Implicit wait for child tasks.
        let _ = self.task_complete(worker);

        // Keep the lock across the teardown so racing transport handlers
        // see either an active task or a finished one, never the gap in
        // between.
        let parent = {
            let mut inner = task.inner.lock();
            inner.state = TaskState::Teardown;
            self.deps.release_local_task(self, worker, &task, &mut inner);
            inner.state = TaskState::Finished;
            inner.parent.take()
        };
        if let Some(parent) = parent {
            let left = parent.dec_children();
            trace!("parent of task {} has {} children left", task.id(), left);
        }

        if !task.has_ref() {
            // Referenced tasks are retired by task_wait instead.
            self.tasks.destroy(task);
        }

        worker.current.replace(previous);
    }

    /// Create a task under the worker's current task and register its
    /// dependencies; it becomes runnable once those are resolved.
    pub(crate) fn create_task(
        self: &Arc<Self>,
        worker: &WorkerCtx,
        work: TaskFn,
        deps: &[TaskDep],
        with_ref: bool,
    ) -> Result<Option<TaskRef>> {
        let parent = worker.current.borrow().clone();
        let task = self.tasks.allocate();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        task.prepare(id, work, &parent, with_ref);

        let children = parent.inc_children();
        trace!("parent now has {} children", children);

        self.deps.handle_task(self, &task, &parent, deps)?;

        // Drop the creation guard; whoever reaches zero enqueues, exactly
        // once, regardless of predecessors finishing mid-registration.
        if task.dec_unresolved() == 0 {
            self.enqueue_runnable(worker, task.clone());
        }

        Ok(if with_ref {
            Some(TaskRef::new(task))
        } else {
            None
        })
    }

    /// Wait for all children of the worker's current task, contributing to
    /// execution while waiting. On the root task this is the collective
    /// barrier: remote dependencies are resolved, the phase bound advances,
    /// deferred tasks are released, and afterwards the dependency hash and
    /// the task recycler are reset for the next epoch.
    pub(crate) fn task_complete(self: &Arc<Self>, worker: &WorkerCtx) -> Result<()> {
        let current = worker.current.borrow().clone();
        let is_root = current.is_root();

        if is_root {
            // Make sure every incoming request is served before matching.
            self.remote_progress_blocking(worker);
            self.deps.release_unhandled_remote(self, worker);
            self.phase_bound.store(self.root.phase(), Ordering::SeqCst);
            self.drain_deferred(worker);
        }

        self.task_avail.notify_all();

        while current.num_children() > 0 {
            self.remote_progress(worker);
            match self.next_task(worker) {
                Some(task) => self.handle_task(worker, task),
                None => {
                    if is_root {
                        // A worker may have deferred a release right as the
                        // bound advanced; pick those up too.
                        self.drain_deferred(worker);
                    }
                    std::thread::yield_now();
                }
            }
        }

        if is_root {
            self.deps.reset();
            self.tasks.flip();
        }
        Ok(())
    }

    /// Contribute to execution until the referenced task finishes, then
    /// retire it.
    pub(crate) fn task_wait(self: &Arc<Self>, worker: &WorkerCtx, handle: TaskRef) -> Result<()> {
        let task = handle.into_task();
        match task.state() {
            TaskState::Destroyed => {
                return Err(Error::InvalidArgument("handle refers to a destroyed task"))
            }
            TaskState::Root => return Err(Error::InvalidArgument("cannot wait on the root task")),
            _ => {}
        }

        while task.state() != TaskState::Finished {
            self.remote_progress(worker);
            match self.next_task(worker) {
                Some(next) => self.handle_task(worker, next),
                None => std::thread::yield_now(),
            }
        }

        self.tasks.destroy(task);
        Ok(())
    }

    /// Master-only phase advance on the root task.
    pub(crate) fn phase_advance(&self, worker: &WorkerCtx) -> Result<()> {
        self.remote_progress(worker);
        self.deps.end_phase(self.root.phase());
        let phase = self.root.advance_phase();
        info!("starting task phase {}", phase);
        Ok(())
    }

    fn drain_deferred(&self, worker: &WorkerCtx) {
        for shared in &self.shared {
            shared.deferred.drain_into(&worker.queue);
        }
    }

    fn wait_for_work(&self) {
        let mut guard = self.idle.lock();
        let _ = self.task_avail.wait_for(&mut guard, IDLE_WAIT);
    }

    /// Stop the worker loops and wake every sleeper.
    pub(crate) fn stop(&self) {
        self.parallel.store(false, Ordering::Relaxed);
        self.task_avail.notify_all();
    }

    /// Final teardown after the workers joined.
    pub(crate) fn teardown(&self) {
        self.tasks.drain();
        self.deps.fini();
        self.transport.fini();
    }

    #[cfg(test)]
    pub(crate) fn new_task_for_test(&self, parent: &Arc<Task>) -> Arc<Task> {
        let task = self.tasks.allocate();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        task.prepare(id, Box::new(|_| {}), parent, false);
        task
    }
}

/// The loop run by every spawned worker. The highest-id worker is the
/// designated progress thread: it never sleeps, so message delivery is
/// never starved while the others wait for work.
pub(crate) fn worker_main(ctx: WorkerCtx) {
    let sched = ctx.sched.clone();
    debug!("worker {} entering the scheduler loop", ctx.id);

    while sched.parallel() {
        sched.remote_progress(&ctx);
        match sched.next_task(&ctx) {
            Some(task) => sched.handle_task(&ctx, task),
            None => std::thread::yield_now(),
        }
        // Only rest while no tasks are in flight anywhere.
        if sched.root().num_children() == 0 {
            if ctx.id == sched.num_threads() - 1 {
                sched.remote_progress(&ctx);
            } else {
                sched.wait_for_work();
            }
        }
    }

    debug!("worker {} exiting", ctx.id);
}

/// A scheduler plus a master worker context, without any spawned threads.
/// Lets subsystem tests drive the lifecycle by hand.
#[cfg(test)]
pub(crate) fn test_rig(transport: Box<dyn Transport>) -> (Arc<Scheduler>, WorkerCtx) {
    let queue = RunQueue::new();
    let shared = vec![WorkerShared {
        stealer: queue.stealer(),
        deferred: DeferredQueue::new(),
    }];
    let sched = Arc::new(Scheduler::new(UnitId(0), 2, 1, shared, transport));
    let ctx = WorkerCtx {
        id: 0,
        sched: sched.clone(),
        queue,
        current: RefCell::new(sched.root().clone()),
    };
    (sched, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::NullTransport;

    #[test]
    fn test_create_task_enqueues_when_unblocked() {
        let (sched, worker) = test_rig(Box::new(NullTransport));
        sched
            .create_task(&worker, Box::new(|_| {}), &[], false)
            .unwrap();

        assert_eq!(sched.root().num_children(), 1);
        let task = worker.queue.pop().expect("task is runnable");
        assert_eq!(task.state(), TaskState::Created);
    }

    #[test]
    fn test_handle_task_runs_and_retires() {
        let (sched, worker) = test_rig(Box::new(NullTransport));
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = ran.clone();
        sched
            .create_task(
                &worker,
                Box::new(move |_| flag.store(true, Ordering::SeqCst)),
                &[],
                false,
            )
            .unwrap();

        let task = worker.queue.pop().unwrap();
        sched.handle_task(&worker, task);

        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(sched.root().num_children(), 0);
    }

    #[test]
    fn test_task_past_phase_bound_is_deferred() {
        let (sched, worker) = test_rig(Box::new(NullTransport));
        sched.phase_advance(&worker).unwrap();
        sched
            .create_task(&worker, Box::new(|_| {}), &[], false)
            .unwrap();

        // Phase 1 task against bound 0: parked, not runnable.
        assert!(worker.queue.pop().is_none());
        assert!(!sched.shared[0].deferred.is_empty());

        sched.task_complete(&worker).unwrap();
        assert!(sched.shared[0].deferred.is_empty());
        assert_eq!(sched.root().num_children(), 0);
    }

    #[test]
    fn test_task_wait_rejects_root_handle() {
        let (sched, worker) = test_rig(Box::new(NullTransport));
        let handle = TaskRef::new(sched.root().clone());
        assert!(matches!(
            sched.task_wait(&worker, handle),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_panicking_task_still_retires() {
        let (sched, worker) = test_rig(Box::new(NullTransport));
        sched
            .create_task(&worker, Box::new(|_| panic!("boom")), &[], false)
            .unwrap();

        let task = worker.queue.pop().unwrap();
        sched.handle_task(&worker, task);
        assert_eq!(sched.root().num_children(), 0);
    }
}
