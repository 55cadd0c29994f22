//! The public runtime interface.
//!
//! A [`Runtime`] owns the worker pool of one SPMD unit. The thread that
//! builds it becomes worker 0, the *master*: it is the only thread that may
//! drive the root barrier ([`Runtime::task_complete`]) and advance the
//! phase, which the type enforces by not being `Sync` — master-scope
//! operations simply cannot move to another thread.
//!
//! Inside a task, the same operations (minus the root scope) are available
//! through the [`TaskScope`] passed to the work closure.
//!
//! # Example
//!
//! ```no_run
//! use taskweave::Runtime;
//!
//! let rt = Runtime::new().unwrap();
//! rt.create_task(|_| println!("hello from a task"), &[]).unwrap();
//! rt.task_complete().unwrap();
//! rt.shutdown().unwrap();
//! ```

use crate::dep::TaskDep;
use crate::error::{Error, Result};
use crate::gptr::UnitId;
use crate::remote::{NullTransport, Transport};
use crate::scheduler::{worker_main, Scheduler, WorkerCtx, WorkerShared};
use crate::task::TaskRef;
use crate::taskqueue::{DeferredQueue, RunQueue};
use crate::topology;
use std::cell::RefCell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// Configuration for a [`Runtime`].
pub struct RuntimeBuilder {
    threads: Option<usize>,
    pin_workers: bool,
    unit: UnitId,
    num_units: usize,
    transport: Option<Box<dyn Transport>>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        RuntimeBuilder {
            threads: None,
            pin_workers: false,
            unit: UnitId(0),
            num_units: 1,
            transport: None,
        }
    }

    /// Override the probed worker-thread count.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Pin spawned workers to cores, round-robin, for cache locality.
    pub fn pin_workers(mut self, pin: bool) -> Self {
        self.pin_workers = pin;
        self
    }

    /// This process's position in the SPMD collective.
    pub fn unit(mut self, unit: UnitId, num_units: usize) -> Self {
        self.unit = unit;
        self.num_units = num_units;
        self
    }

    /// The active-message transport linking the collective. Defaults to
    /// [`NullTransport`] for single-unit runs.
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn build(self) -> Result<Runtime> {
        if self.num_units == 0 || self.unit.0 as usize >= self.num_units {
            return Err(Error::InvalidArgument("unit id outside the collective"));
        }
        let num_threads = self
            .threads
            .unwrap_or_else(topology::probe_worker_count)
            .max(1);
        info!("using {} threads on {}", num_threads, self.unit);

        let transport = self
            .transport
            .unwrap_or_else(|| Box::new(NullTransport));

        // Queues and stealers exist before any worker starts, so every
        // worker can reach every victim from its first loop iteration.
        let queues: Vec<RunQueue> = (0..num_threads).map(|_| RunQueue::new()).collect();
        let shared = queues
            .iter()
            .map(|q| WorkerShared {
                stealer: q.stealer(),
                deferred: DeferredQueue::new(),
            })
            .collect();

        let sched = Arc::new(Scheduler::new(
            self.unit,
            self.num_units,
            num_threads,
            shared,
            transport,
        ));

        let core_ids = if self.pin_workers {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut queues = queues.into_iter();
        let master_queue = queues.next().expect("at least one worker");

        let mut handles = Vec::with_capacity(num_threads.saturating_sub(1));
        for (offset, queue) in queues.enumerate() {
            let id = offset + 1;
            let ctx = WorkerCtx {
                id,
                sched: sched.clone(),
                queue,
                current: RefCell::new(sched.root().clone()),
            };
            let core = (!core_ids.is_empty()).then(|| core_ids[id % core_ids.len()]);
            let spawned = thread::Builder::new()
                .name(format!("taskweave-{}", id))
                .spawn(move || {
                    if let Some(core) = core {
                        core_affinity::set_for_current(core);
                    }
                    worker_main(ctx);
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => error!("failed to spawn worker {} of {}: {}", id, num_threads, e),
            }
        }

        let master = WorkerCtx {
            id: 0,
            sched: sched.clone(),
            queue: master_queue,
            current: RefCell::new(sched.root().clone()),
        };

        Ok(Runtime {
            master,
            handles,
            down: false,
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        RuntimeBuilder::new()
    }
}

/// One unit's tasking runtime. See the [module docs](self) for the
/// threading contract.
pub struct Runtime {
    master: WorkerCtx,
    handles: Vec<JoinHandle<()>>,
    down: bool,
}

impl Runtime {
    /// A single-unit runtime with the probed thread count.
    pub fn new() -> Result<Self> {
        RuntimeBuilder::new().build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Submit a task with the given dependencies. It runs once every
    /// dependency is resolved and its phase is within the phase bound.
    pub fn create_task<F>(&self, work: F, deps: &[TaskDep]) -> Result<()>
    where
        F: FnOnce(&TaskScope<'_>) + Send + 'static,
    {
        self.master
            .sched
            .create_task(&self.master, Box::new(work), deps, false)
            .map(|_| ())
    }

    /// Like [`create_task`](Self::create_task), additionally returning a
    /// handle that keeps the task alive until [`task_wait`](Self::task_wait)
    /// retires it.
    pub fn create_task_handle<F>(&self, work: F, deps: &[TaskDep]) -> Result<TaskRef>
    where
        F: FnOnce(&TaskScope<'_>) + Send + 'static,
    {
        let handle = self
            .master
            .sched
            .create_task(&self.master, Box::new(work), deps, true)?;
        Ok(handle.expect("handle requested"))
    }

    /// The collective barrier over all submitted tasks: resolves parked
    /// remote dependencies, advances the phase bound, releases deferred
    /// tasks and executes until every descendant of the root has finished.
    pub fn task_complete(&self) -> Result<()> {
        self.master.sched.task_complete(&self.master)
    }

    /// Execute tasks until the referenced task finishes, then destroy it.
    pub fn task_wait(&self, handle: TaskRef) -> Result<()> {
        self.master.sched.task_wait(&self.master, handle)
    }

    /// Advance to the next phase. New tasks inherit the new phase and stay
    /// deferred until the next barrier moves the phase bound past it.
    pub fn phase(&self) -> Result<()> {
        self.master.sched.phase_advance(&self.master)
    }

    /// A handle to the master's current task (the root, between tasks).
    pub fn current_task(&self) -> TaskRef {
        TaskRef::new(self.master.current.borrow().clone())
    }

    /// The phase new tasks are created in.
    pub fn current_phase(&self) -> u64 {
        self.master.sched.root().phase()
    }

    pub fn unit(&self) -> UnitId {
        self.master.sched.unit()
    }

    pub fn num_units(&self) -> usize {
        self.master.sched.num_units()
    }

    pub fn num_threads(&self) -> usize {
        self.master.sched.num_threads()
    }

    /// The calling thread's worker id; the master is always 0.
    pub fn thread_num(&self) -> usize {
        self.master.id
    }

    /// Cooperative teardown: stop the worker loops, join them, release the
    /// recycled tasks and shut the transport down. In-flight tasks run to
    /// completion first.
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown_inner();
        Ok(())
    }

    fn shutdown_inner(&mut self) {
        if self.down {
            return;
        }
        self.down = true;
        let sched = &self.master.sched;
        sched.stop();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("a worker panicked during execution");
            }
        }
        sched.teardown();
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}

/// Capabilities available to a task while it runs: creating nested tasks
/// and synchronizing on them from the executing worker.
pub struct TaskScope<'a> {
    worker: &'a WorkerCtx,
}

impl<'a> TaskScope<'a> {
    pub(crate) fn new(worker: &'a WorkerCtx) -> Self {
        TaskScope { worker }
    }

    /// Create a child of the current task.
    pub fn create_task<F>(&self, work: F, deps: &[TaskDep]) -> Result<()>
    where
        F: FnOnce(&TaskScope<'_>) + Send + 'static,
    {
        self.worker
            .sched
            .create_task(self.worker, Box::new(work), deps, false)
            .map(|_| ())
    }

    /// Create a child of the current task, keeping a handle to it.
    pub fn create_task_handle<F>(&self, work: F, deps: &[TaskDep]) -> Result<TaskRef>
    where
        F: FnOnce(&TaskScope<'_>) + Send + 'static,
    {
        let handle = self
            .worker
            .sched
            .create_task(self.worker, Box::new(work), deps, true)?;
        Ok(handle.expect("handle requested"))
    }

    /// Wait for every child of the current task, executing other runnable
    /// tasks meanwhile.
    pub fn task_complete(&self) -> Result<()> {
        self.worker.sched.task_complete(self.worker)
    }

    /// Execute tasks until the referenced task finishes, then destroy it.
    pub fn task_wait(&self, handle: TaskRef) -> Result<()> {
        self.worker.sched.task_wait(self.worker, handle)
    }

    /// A handle to the task this scope belongs to.
    pub fn current_task(&self) -> TaskRef {
        TaskRef::new(self.worker.current.borrow().clone())
    }

    /// The executing worker's id.
    pub fn thread_num(&self) -> usize {
        self.worker.id
    }

    pub fn num_threads(&self) -> usize {
        self.worker.sched.num_threads()
    }

    pub fn unit(&self) -> UnitId {
        self.worker.sched.unit()
    }
}
