//! Data-dependency management: the local dependency hash and the
//! remote-dependency protocol.
//!
//! The hash maps a dependency key (unit, segment, offset) to a
//! chronologically ordered chain of task/dependency records. Structural
//! edits take the table mutex; state checks on a referenced task take that
//! task's mutex. Lock order is always table, then task — never the
//! reverse.
//!
//! Remote IN dependencies are not matched on receive. They are batched on
//! the unhandled list and resolved by the master inside the root barrier,
//! where each is matched against local OUT/INOUT producers: an earlier
//! phase producer fulfills the dependency, a same-or-later-phase writer
//! becomes a direct anti-dependency that must wait for the remote reader.

use crate::dep::{DepKind, DepType, TaskDep};
use crate::error::Result;
use crate::gptr::{GlobalPtr, UnitId};
use crate::pool::ListPool;
use crate::remote::{Envelope, RemoteMessage, RemoteRelease, TaskToken};
use crate::scheduler::{Scheduler, WorkerCtx};
use crate::task::{Task, TaskInner, TaskState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

const DEPHASH_SIZE: usize = 1024;

/// Bucket index for a dependency key.
///
/// Pointers are assumed 8-byte aligned, so the low 3 offset bits carry no
/// information. The rest is folded with the Marsaglia shift triplet
/// (7, 11, 17); the segment id is mixed in so aliasing segment boundaries
/// cannot collide silently.
fn dephash_slot(key: &GlobalPtr) -> usize {
    let offset = key.offset >> 3;
    let folded = offset ^ (offset >> 7) ^ (offset >> 11) ^ (offset >> 17);
    ((folded ^ u64::from(key.segment)) % DEPHASH_SIZE as u64) as usize
}

/// One record in a bucket chain: a task and one of its dependencies.
struct DepEntry {
    task: Arc<Task>,
    dep_type: DepType,
    key: GlobalPtr,
    phase: u64,
}

/// A remote IN dependency waiting for batched resolution.
struct RemoteDepRecord {
    task: TaskToken,
    key: GlobalPtr,
    phase: u64,
    origin: UnitId,
    dep_type: DepType,
}

/// The dependency subsystem of one unit.
pub(crate) struct DataDeps {
    /// Fixed-size open-chaining table; newest entry last, scanned
    /// newest-first.
    table: Mutex<Vec<Vec<DepEntry>>>,
    /// Remote IN dependencies received but not yet matched.
    unhandled: Mutex<Vec<RemoteDepRecord>>,
    /// Releases that arrived for tasks beyond the phase bound.
    deferred: Mutex<Vec<Arc<Task>>>,
    /// Tokens exported to peers, mapped back to their tasks.
    outstanding: Mutex<HashMap<u64, Arc<Task>>>,
    successor_lists: ListPool<Arc<Task>>,
}

impl DataDeps {
    pub(crate) fn new() -> Self {
        DataDeps {
            table: Mutex::new((0..DEPHASH_SIZE).map(|_| Vec::new()).collect()),
            unhandled: Mutex::new(Vec::new()),
            deferred: Mutex::new(Vec::new()),
            outstanding: Mutex::new(HashMap::new()),
            successor_lists: ListPool::new(),
        }
    }

    fn push_successor(&self, inner: &mut TaskInner, succ: Arc<Task>) {
        if inner.successors.capacity() == 0 {
            inner.successors = self.successor_lists.take();
        }
        inner.successors.push(succ);
    }

    fn register_token(&self, task: &Arc<Task>) {
        self.outstanding.lock().insert(task.id(), task.clone());
    }

    fn send_release(&self, sched: &Scheduler, origin: UnitId, task: TaskToken, dep_type: DepType) {
        let env = Envelope {
            from: sched.unit(),
            to: origin,
            msg: RemoteMessage::Release { task, dep_type },
        };
        if let Err(e) = sched.send(env) {
            error!("failed to release remote task {}: {}", task.0, e);
        }
    }

    /// Register the dependencies of a freshly created task: link it behind
    /// every conflicting predecessor, announce remote dependencies to their
    /// owners, and add its own records to the hash.
    pub(crate) fn handle_task(
        &self,
        sched: &Scheduler,
        task: &Arc<Task>,
        parent: &Arc<Task>,
        deps: &[TaskDep],
    ) -> Result<()> {
        trace!(
            "task {} has {} dependencies in phase {}",
            task.id(),
            deps.len(),
            task.phase()
        );
        for dep in deps {
            match &dep.kind {
                DepKind::Ignore => {}
                DepKind::Direct(target) => self.link_direct(task, target),
                DepKind::Ptr { ty, gptr } => {
                    if gptr.unit != sched.unit() {
                        self.announce_remote(sched, task, parent, *ty, *gptr)?;
                    } else {
                        self.link_local(task, *ty, *gptr);
                    }
                }
            }
        }
        Ok(())
    }

    /// A direct task-to-task precedence edge, not mediated by a pointer.
    fn link_direct(&self, task: &Arc<Task>, target: &Arc<Task>) {
        let mut inner = target.inner.lock();
        if inner.state != TaskState::Finished && inner.state != TaskState::Destroyed {
            self.push_successor(&mut inner, task.clone());
            let n = task.inc_unresolved();
            trace!(
                "task {} is a direct successor of task {} ({} unresolved)",
                task.id(),
                target.id(),
                n
            );
        }
    }

    /// Announce a dependency on a remote pointer to the owning unit.
    /// Supported only for top-level tasks; the announcement blocks the task
    /// until the owner releases it.
    fn announce_remote(
        &self,
        sched: &Scheduler,
        task: &Arc<Task>,
        parent: &Arc<Task>,
        ty: DepType,
        gptr: GlobalPtr,
    ) -> Result<()> {
        if !parent.is_root() {
            warn!("ignoring remote dependency in nested task");
            return Ok(());
        }
        sched.send(Envelope {
            from: sched.unit(),
            to: gptr.unit,
            msg: RemoteMessage::DataDep {
                dep_type: ty,
                gptr,
                phase: task.phase(),
                task: TaskToken(task.id()),
            },
        })?;
        self.register_token(task);
        task.inc_unresolved();
        Ok(())
    }

    /// Walk the bucket chain for `gptr` and serialize `task` behind every
    /// conflicting predecessor, stopping at the first OUT/INOUT entry,
    /// which is a barrier for everything older on the same key. Finally
    /// record the task's own dependency at the head of the chain.
    fn link_local(&self, task: &Arc<Task>, ty: DepType, gptr: GlobalPtr) {
        let slot = dephash_slot(&gptr);
        let mut table = self.table.lock();
        for entry in table[slot].iter().rev() {
            if entry.key == gptr && Arc::ptr_eq(&entry.task, task) {
                error!(
                    "task {} already present in the dependency hash with key {}",
                    task.id(),
                    gptr
                );
                debug_assert!(
                    false,
                    "task already present in the dependency hash with the same dependency"
                );
                // Never serialize a task behind itself.
                continue;
            }
            if entry.key != gptr {
                continue;
            }
            let mut pred = entry.task.inner.lock();
            if pred.state != TaskState::Finished
                && pred.state != TaskState::Destroyed
                && (ty.is_out() || (ty == DepType::In && entry.dep_type.is_out()))
            {
                self.push_successor(&mut pred, task.clone());
                let n = task.inc_unresolved();
                trace!(
                    "task {} is a local successor of task {} ({} unresolved)",
                    task.id(),
                    entry.task.id(),
                    n
                );
            }
            drop(pred);
            if entry.dep_type.is_out() {
                break;
            }
        }
        table[slot].push(DepEntry {
            task: task.clone(),
            dep_type: ty,
            key: gptr,
            phase: task.phase(),
        });
    }

    /// Receive handler for an incoming remote dependency. No matching
    /// happens here; the record is parked for batched resolution at the
    /// next root barrier.
    pub(crate) fn handle_remote_task(
        &self,
        dep_type: DepType,
        gptr: GlobalPtr,
        phase: u64,
        task: TaskToken,
        origin: UnitId,
    ) {
        if dep_type != DepType::In {
            error!("remote dependencies with a type other than IN are not supported");
            return;
        }
        debug!(
            "queueing remote dependency of task {} from {} for later resolution",
            task.0, origin
        );
        self.unhandled.lock().push(RemoteDepRecord {
            task,
            key: gptr,
            phase,
            origin,
            dep_type,
        });
    }

    /// Match every parked remote dependency against the local producers on
    /// its key, then flush the deferred releases. Called by the master
    /// inside the root barrier.
    ///
    /// A remote IN from phase p reads the state left by phase p-1: the
    /// latest local OUT/INOUT producer with phase < p fulfills it, while a
    /// producer with phase >= p would overwrite the remote reader's input
    /// and must itself wait — only the earliest such writer is held back,
    /// later ones are already serialized behind it locally.
    pub(crate) fn release_unhandled_remote(&self, sched: &Scheduler, worker: &WorkerCtx) {
        let records = std::mem::take(&mut *self.unhandled.lock());
        for rdep in records {
            debug!(
                "resolving remote dependency of task {} from {}",
                rdep.task.0, rdep.origin
            );

            let mut fulfill: Option<Arc<Task>> = None;
            let mut direct: Option<Arc<Task>> = None;
            let table = self.table.lock();
            for entry in table[dephash_slot(&rdep.key)].iter().rev() {
                if entry.key != rdep.key || !entry.dep_type.is_out() {
                    continue;
                }
                if !entry.task.inner.lock().state.is_active() {
                    continue;
                }
                if entry.phase >= rdep.phase {
                    if direct.as_ref().map_or(true, |d| d.phase() > entry.phase) {
                        direct = Some(entry.task.clone());
                    }
                } else if fulfill.as_ref().map_or(true, |c| c.phase() < entry.phase) {
                    fulfill = Some(entry.task.clone());
                }
            }

            if let Some(cand) = direct {
                // The candidate would overwrite the remote reader's input;
                // block it until the reader's home unit releases it.
                if cand.inner.lock().state.is_active() {
                    self.register_token(&cand);
                    let sent = sched.send(Envelope {
                        from: sched.unit(),
                        to: rdep.origin,
                        msg: RemoteMessage::DirectDep {
                            predecessor: rdep.task,
                            successor: TaskToken(cand.id()),
                        },
                    });
                    match sent {
                        Ok(()) => {
                            let n = cand.inc_unresolved();
                            debug!(
                                "task {} (phase {}) directly depends on remote task {} at {} ({} unresolved)",
                                cand.id(),
                                cand.phase(),
                                rdep.task.0,
                                rdep.origin,
                                n
                            );
                        }
                        Err(e) => error!("failed to send direct dependency: {}", e),
                    }
                }
            }

            match fulfill {
                Some(cand) => {
                    let mut inner = cand.inner.lock();
                    if inner.state.is_active() {
                        debug!(
                            "local task {} satisfies remote dependency of task {} from {}",
                            cand.id(),
                            rdep.task.0,
                            rdep.origin
                        );
                        inner.remote_successors.push(RemoteRelease {
                            task: rdep.task,
                            origin: rdep.origin,
                            dep_type: rdep.dep_type,
                        });
                    } else {
                        // Finished while we were scanning; its output is
                        // already visible, release right away.
                        drop(inner);
                        self.send_release(sched, rdep.origin, rdep.task, rdep.dep_type);
                    }
                }
                None => {
                    debug!(
                        "no local producer for remote task {} from {} in phase {}, releasing",
                        rdep.task.0, rdep.origin, rdep.phase
                    );
                    self.send_release(sched, rdep.origin, rdep.task, rdep.dep_type);
                }
            }
        }

        self.flush_deferred_releases(sched, worker);
    }

    /// Receive handler for a direct anti-dependency: the named local task
    /// must hold back `successor` on `origin` until it finishes.
    pub(crate) fn handle_remote_direct(
        &self,
        sched: &Scheduler,
        predecessor: TaskToken,
        successor: TaskToken,
        origin: UnitId,
    ) {
        let local = self.outstanding.lock().get(&predecessor.0).cloned();
        let mut parked = false;
        if let Some(task) = local {
            let mut inner = task.inner.lock();
            if inner.state != TaskState::Finished && inner.state != TaskState::Destroyed {
                debug!(
                    "remote task {} at {} waits for local task {}",
                    successor.0,
                    origin,
                    task.id()
                );
                inner.remote_successors.push(RemoteRelease {
                    task: successor,
                    origin,
                    dep_type: DepType::Direct,
                });
                parked = true;
            }
        }
        if !parked {
            // Already done (or never known); release immediately.
            self.send_release(sched, origin, successor, DepType::Direct);
        }
    }

    /// Receive handler for a release of one of our tasks. Releases for
    /// tasks beyond the phase bound are parked until the bound advances.
    pub(crate) fn release_remote_dep(&self, sched: &Scheduler, worker: &WorkerCtx, token: TaskToken) {
        let task = self.outstanding.lock().get(&token.0).cloned();
        let Some(task) = task else {
            error!("release for unknown task token {}", token.0);
            return;
        };

        let mut deferred = self.deferred.lock();
        if task.phase() > sched.phase_bound() {
            debug!(
                "deferring release of task {} from phase {}",
                task.id(),
                task.phase()
            );
            deferred.push(task);
        } else {
            let left = task.dec_unresolved();
            debug!("task {} has {} unresolved dependencies left", task.id(), left);
            if left < 0 {
                error!("task {} released without an unresolved dependency", task.id());
            } else if left == 0 {
                sched.enqueue_runnable(worker, task);
            }
        }
    }

    fn flush_deferred_releases(&self, sched: &Scheduler, worker: &WorkerCtx) {
        let mut deferred = self.deferred.lock();
        for task in deferred.drain(..) {
            let left = task.dec_unresolved();
            debug!(
                "deferred release: task {} has {} unresolved dependencies left",
                task.id(),
                left
            );
            if left < 0 {
                error!("task {} released without an unresolved dependency", task.id());
            } else if left == 0 {
                sched.enqueue_runnable(worker, task);
            }
        }
    }

    /// Release everything held back by a finishing task. Called between the
    /// Teardown and Finished state writes, with the task's mutex held, so
    /// the decrement of each successor happens after the final state is
    /// settled.
    pub(crate) fn release_local_task(
        &self,
        sched: &Scheduler,
        worker: &WorkerCtx,
        task: &Arc<Task>,
        inner: &mut TaskInner,
    ) {
        for rs in inner.remote_successors.drain(..) {
            trace!(
                "releasing remote task {} at {} after task {}",
                rs.task.0,
                rs.origin,
                task.id()
            );
            self.send_release(sched, rs.origin, rs.task, rs.dep_type);
        }

        let mut successors = std::mem::take(&mut inner.successors);
        for succ in successors.drain(..) {
            let left = succ.dec_unresolved();
            trace!("task {} has {} dependencies left", succ.id(), left);
            if left < 0 {
                error!("task {} has a negative dependency count", succ.id());
            } else if left == 0 {
                sched.enqueue_runnable(worker, succ);
            }
        }
        self.successor_lists.give(successors);
    }

    /// End-of-phase notification from the master. The protocol currently
    /// needs no bookkeeping here; the hook is the seam where it would go.
    pub(crate) fn end_phase(&self, phase: u64) {
        trace!("ending task phase {}", phase);
    }

    /// Recycle every hash entry and the exported tokens. Called at the end
    /// of a collective, when no task of the previous epoch survives.
    pub(crate) fn reset(&self) {
        let mut table = self.table.lock();
        for bucket in table.iter_mut() {
            bucket.clear();
        }
        self.outstanding.lock().clear();
    }

    /// Teardown: drop everything still parked.
    pub(crate) fn fini(&self) {
        self.reset();
        self.unhandled.lock().clear();
        self.deferred.lock().clear();
    }
}
