//! Per-worker task queues.
//!
//! Every worker owns a LIFO deque: `push` and `pop` work on the head so the
//! most recently created task runs first and stays cache-warm, while idle
//! peers steal from the tail, which is FIFO relative to push order and
//! preserves locality between a parent and its youngest children.
//!
//! Tasks that become runnable beyond the current phase bound are parked in
//! the mutex-guarded deferred queue instead and spliced into the runnable
//! queue when the bound advances.

use crate::task::Task;
use crossbeam::deque::{Steal, Stealer, Worker as Deque};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

const STEAL_RETRIES: usize = 3;

/// The runnable queue owned by one worker thread.
pub(crate) struct RunQueue {
    deque: Deque<Arc<Task>>,
}

impl RunQueue {
    pub(crate) fn new() -> Self {
        RunQueue {
            deque: Deque::new_lifo(),
        }
    }

    pub(crate) fn stealer(&self) -> QueueStealer {
        QueueStealer {
            stealer: self.deque.stealer(),
        }
    }

    /// Insert at the head.
    pub(crate) fn push(&self, task: Arc<Task>) {
        self.deque.push(task);
    }

    /// Remove from the head; `None` if empty.
    pub(crate) fn pop(&self) -> Option<Arc<Task>> {
        self.deque.pop()
    }
}

/// Victim-side handle to another worker's queue.
pub(crate) struct QueueStealer {
    stealer: Stealer<Arc<Task>>,
}

impl QueueStealer {
    /// Take one task from the tail of the victim's queue.
    pub(crate) fn steal(&self) -> Option<Arc<Task>> {
        let mut retries = 0;
        loop {
            match self.stealer.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => {
                    retries += 1;
                    if retries >= STEAL_RETRIES {
                        return None;
                    }
                }
            }
        }
    }

    /// Advisory only; not authoritative without winning the race.
    pub(crate) fn is_empty(&self) -> bool {
        self.stealer.is_empty()
    }
}

/// Holding area for tasks created beyond the phase bound.
pub(crate) struct DeferredQueue {
    tasks: Mutex<VecDeque<Arc<Task>>>,
}

impl DeferredQueue {
    pub(crate) fn new() -> Self {
        DeferredQueue {
            tasks: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn push(&self, task: Arc<Task>) {
        self.tasks.lock().push_back(task);
    }

    /// Splice all deferred tasks into `dst`, emptying this queue.
    pub(crate) fn drain_into(&self, dst: &RunQueue) {
        let mut tasks = self.tasks.lock();
        for task in tasks.drain(..) {
            dst.push(task);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}
