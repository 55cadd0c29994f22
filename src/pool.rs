//! Object pools: successor-list buffers and the two-stage task recycler.
//!
//! Both pools follow the double-checked freelist discipline: an unguarded
//! emptiness probe before taking the lock, re-verified under the lock.
//! Allocating from an empty pool falls back to a fresh heap allocation, so
//! the probe is an optimization, never a correctness requirement.

use crate::task::Task;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Pool of reusable `Vec` buffers backing the per-task successor lists.
pub(crate) struct ListPool<T> {
    free: Mutex<Vec<Vec<T>>>,
    approx_len: AtomicUsize,
}

impl<T> ListPool<T> {
    pub(crate) fn new() -> Self {
        ListPool {
            free: Mutex::new(Vec::new()),
            approx_len: AtomicUsize::new(0),
        }
    }

    /// An empty buffer, reusing capacity from a returned one when possible.
    pub(crate) fn take(&self) -> Vec<T> {
        if self.approx_len.load(Ordering::Relaxed) > 0 {
            match self.free.lock().pop() {
                Some(buf) => {
                    self.approx_len.fetch_sub(1, Ordering::Relaxed);
                    return buf;
                }
                None => self.approx_len.store(0, Ordering::Relaxed),
            }
        }
        Vec::new()
    }

    /// Return a buffer; its contents are dropped, its capacity kept.
    pub(crate) fn give(&self, mut buf: Vec<T>) {
        buf.clear();
        if buf.capacity() == 0 {
            return;
        }
        self.free.lock().push(buf);
        self.approx_len.fetch_add(1, Ordering::Relaxed);
    }
}

/// The two-stage task recycler.
///
/// Destroyed tasks accumulate on the recycle list while a collective is in
/// flight; the root barrier flips the recycle list into the free list, after
/// which those allocations may be handed out again. An allocation is only
/// reused once nothing else references it; a still-shared allocation is
/// dropped and replaced by a fresh one.
pub(crate) struct TaskPool {
    recycle: Mutex<Vec<Arc<Task>>>,
    free: Mutex<Vec<Arc<Task>>>,
    approx_free: AtomicUsize,
}

impl TaskPool {
    pub(crate) fn new() -> Self {
        TaskPool {
            recycle: Mutex::new(Vec::new()),
            free: Mutex::new(Vec::new()),
            approx_free: AtomicUsize::new(0),
        }
    }

    /// Pop a reusable allocation or make a fresh one.
    pub(crate) fn allocate(&self) -> Arc<Task> {
        if self.approx_free.load(Ordering::Relaxed) > 0 {
            let popped = self.free.lock().pop();
            match popped {
                Some(task) => {
                    self.approx_free.fetch_sub(1, Ordering::Relaxed);
                    if Arc::strong_count(&task) == 1 {
                        return task;
                    }
                    // A stale reference (late release, lingering hash
                    // entry) still points here; let it die out and
                    // allocate fresh.
                }
                None => self.approx_free.store(0, Ordering::Relaxed),
            }
        }
        Arc::new(Task::new())
    }

    /// Reset a retired task and park it on the recycle list.
    pub(crate) fn destroy(&self, task: Arc<Task>) {
        task.reset();
        self.recycle.lock().push(task);
    }

    /// Flip recycled tasks into the free list. Called at the root barrier,
    /// when no task of the previous collective can still be referenced.
    pub(crate) fn flip(&self) {
        let mut recycled = self.recycle.lock();
        let mut free = self.free.lock();
        self.approx_free
            .fetch_add(recycled.len(), Ordering::Relaxed);
        free.append(&mut recycled);
    }

    /// Drop everything; used at teardown.
    pub(crate) fn drain(&self) {
        self.recycle.lock().clear();
        self.free.lock().clear();
        self.approx_free.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;

    #[test]
    fn test_list_pool_reuses_capacity() {
        let pool: ListPool<u32> = ListPool::new();
        let mut buf = pool.take();
        buf.extend([1, 2, 3]);
        let cap = buf.capacity();
        pool.give(buf);

        let reused = pool.take();
        assert!(reused.is_empty());
        assert_eq!(reused.capacity(), cap);
    }

    #[test]
    fn test_list_pool_empty_take_allocates() {
        let pool: ListPool<u32> = ListPool::new();
        assert_eq!(pool.take().capacity(), 0);
    }

    #[test]
    fn test_task_pool_two_stage_recycling() {
        let pool = TaskPool::new();
        let root = Task::new_root();

        let task = pool.allocate();
        task.prepare(1, Box::new(|_| {}), &root, false);
        pool.destroy(task);

        // Not reusable until the flip.
        let other = pool.allocate();
        assert_eq!(other.state(), TaskState::Destroyed);
        drop(other);

        pool.flip();
        let reused = pool.allocate();
        assert_eq!(reused.state(), TaskState::Destroyed);
        reused.prepare(2, Box::new(|_| {}), &root, false);
        assert_eq!(reused.state(), TaskState::Created);
    }

    #[test]
    fn test_task_pool_skips_shared_allocations() {
        let pool = TaskPool::new();
        let task = pool.allocate();
        let stale = task.clone();
        pool.destroy(task);
        pool.flip();

        let fresh = pool.allocate();
        assert!(!Arc::ptr_eq(&fresh, &stale));
    }
}
