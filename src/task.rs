//! The task entity and its lifecycle state machine.
//!
//! A task owns a work closure, a back-reference to its parent, the phase it
//! was created in and two successor lists: local tasks to notify on
//! completion and remote tasks to release. The small per-task mutex guards
//! the state field and the successor lists against racing transport
//! handlers; the dependency and child counters are atomics.

use crate::remote::RemoteRelease;
use crate::runtime::TaskScope;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

/// The boxed work closure a task executes. The scope argument lets the
/// closure create nested tasks and synchronize on the worker it runs on.
pub(crate) type TaskFn = Box<dyn FnOnce(&TaskScope<'_>) + Send + 'static>;

/// Lifecycle states of a task.
///
/// `Created → Running → Teardown → Finished → Destroyed`, plus the
/// distinguished `Root` state of the per-process root task that is the
/// ancestor of every user-submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Running,
    Teardown,
    Finished,
    Destroyed,
    Root,
}

impl TaskState {
    /// Active tasks are candidates for dependency matching.
    pub(crate) fn is_active(&self) -> bool {
        matches!(self, TaskState::Created | TaskState::Running)
    }
}

/// Fields guarded by the per-task mutex.
pub(crate) struct TaskInner {
    pub(crate) state: TaskState,
    pub(crate) work: Option<TaskFn>,
    pub(crate) parent: Option<Arc<Task>>,
    /// Local tasks waiting on this one; drained on completion.
    pub(crate) successors: Vec<Arc<Task>>,
    /// Remote tasks to release when this one finishes.
    pub(crate) remote_successors: Vec<RemoteRelease>,
}

/// A unit of work tracked by the scheduler.
pub struct Task {
    /// Token exported to peer units; reassigned on every reuse of the
    /// allocation so stale releases cannot alias a new incarnation.
    id: AtomicU64,
    /// Phase inherited from the parent at creation; advanced in place only
    /// on the root task.
    phase: AtomicU64,
    /// Outstanding predecessors; the task enters a run queue when this
    /// reaches zero.
    unresolved_deps: AtomicI32,
    num_children: AtomicI32,
    /// Set when a user holds a handle; defers destruction to `task_wait`.
    has_ref: AtomicBool,
    pub(crate) inner: Mutex<TaskInner>,
}

impl Task {
    pub(crate) fn new() -> Self {
        Task {
            id: AtomicU64::new(0),
            phase: AtomicU64::new(0),
            unresolved_deps: AtomicI32::new(0),
            num_children: AtomicI32::new(0),
            has_ref: AtomicBool::new(false),
            inner: Mutex::new(TaskInner {
                state: TaskState::Destroyed,
                work: None,
                parent: None,
                successors: Vec::new(),
                remote_successors: Vec::new(),
            }),
        }
    }

    /// The root task of a process: never executed, never destroyed, owner
    /// of the monotonically increasing phase counter.
    pub(crate) fn new_root() -> Arc<Self> {
        let root = Task::new();
        root.inner.lock().state = TaskState::Root;
        Arc::new(root)
    }

    /// Re-initialize a (fresh or recycled) allocation for a new task.
    pub(crate) fn prepare(&self, id: u64, work: TaskFn, parent: &Arc<Task>, has_ref: bool) {
        self.id.store(id, Ordering::SeqCst);
        self.phase.store(parent.phase(), Ordering::SeqCst);
        // The creation guard: holds the count above zero until all
        // dependencies are registered, so a predecessor finishing mid
        // registration cannot enqueue the task a second time.
        self.unresolved_deps.store(1, Ordering::SeqCst);
        self.num_children.store(0, Ordering::SeqCst);
        self.has_ref.store(has_ref, Ordering::SeqCst);

        let mut inner = self.inner.lock();
        inner.state = TaskState::Created;
        inner.work = Some(work);
        inner.parent = Some(parent.clone());
        debug_assert!(inner.successors.is_empty());
        debug_assert!(inner.remote_successors.is_empty());
    }

    /// Reset the allocation after the task retired. The state is left as
    /// `Destroyed` and must not be rewritten until the next `prepare`.
    pub(crate) fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = TaskState::Destroyed;
        inner.work = None;
        inner.parent = None;
        inner.successors.clear();
        inner.remote_successors.clear();
        drop(inner);
        self.phase.store(0, Ordering::SeqCst);
        self.has_ref.store(false, Ordering::SeqCst);
    }

    pub(crate) fn id(&self) -> u64 {
        self.id.load(Ordering::SeqCst)
    }

    pub(crate) fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    pub(crate) fn is_root(&self) -> bool {
        self.state() == TaskState::Root
    }

    pub(crate) fn phase(&self) -> u64 {
        self.phase.load(Ordering::SeqCst)
    }

    /// Master-only phase advance on the root task.
    pub(crate) fn advance_phase(&self) -> u64 {
        self.phase.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn has_ref(&self) -> bool {
        self.has_ref.load(Ordering::SeqCst)
    }

    pub(crate) fn num_children(&self) -> i32 {
        self.num_children.load(Ordering::SeqCst)
    }

    pub(crate) fn inc_children(&self) -> i32 {
        self.num_children.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn dec_children(&self) -> i32 {
        self.num_children.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub(crate) fn unresolved(&self) -> i32 {
        self.unresolved_deps.load(Ordering::SeqCst)
    }

    pub(crate) fn inc_unresolved(&self) -> i32 {
        self.unresolved_deps.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrement the dependency count; the caller enqueues the task when
    /// zero is returned. A negative return indicates a release without a
    /// matching registration.
    pub(crate) fn dec_unresolved(&self) -> i32 {
        let left = self.unresolved_deps.fetch_sub(1, Ordering::SeqCst) - 1;
        debug_assert!(left >= 0, "task released more often than registered");
        left
    }
}

/// A user-held handle to a task created with `create_task_handle`.
///
/// The scheduler keeps exclusive ownership of the task; the handle only
/// defers destruction until [`task_wait`](crate::runtime::Runtime::task_wait)
/// consumes it.
pub struct TaskRef {
    task: Arc<Task>,
}

impl TaskRef {
    pub(crate) fn new(task: Arc<Task>) -> Self {
        TaskRef { task }
    }

    pub(crate) fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub(crate) fn into_task(self) -> Arc<Task> {
        self.task
    }
}
