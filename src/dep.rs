//! Dependency specifications attached to tasks at creation.
//!
//! Within one task, dependencies are declared in order. An OUT (or INOUT)
//! dependency serializes against every earlier task that touched the same
//! global pointer in the same phase; an IN dependency waits for the most
//! recent OUT/INOUT producer on that pointer.

use crate::gptr::GlobalPtr;
use crate::task::{Task, TaskRef};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The kind of a data dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepType {
    /// Read: waits on the most recent OUT/INOUT producer of the key.
    In,
    /// Write: serializes against all earlier tasks on the key.
    Out,
    /// Read-modify-write: same ordering as [`DepType::Out`].
    InOut,
    /// Task-to-task precedence edge, not mediated by a global pointer.
    Direct,
    /// No-op placeholder; skipped entirely.
    Ignore,
}

impl DepType {
    /// OUT and INOUT act as write barriers in the dependency chain.
    pub fn is_out(&self) -> bool {
        matches!(self, DepType::Out | DepType::InOut)
    }
}

/// One dependency declared by a task.
///
/// Constructed through [`TaskDep::input`], [`TaskDep::output`],
/// [`TaskDep::inout`], [`TaskDep::direct`] and [`TaskDep::ignore`].
#[derive(Clone)]
pub struct TaskDep {
    pub(crate) kind: DepKind,
}

#[derive(Clone)]
pub(crate) enum DepKind {
    Ptr { ty: DepType, gptr: GlobalPtr },
    Direct(Arc<Task>),
    Ignore,
}

impl TaskDep {
    /// A read dependency on `gptr`.
    pub fn input(gptr: GlobalPtr) -> Self {
        TaskDep {
            kind: DepKind::Ptr {
                ty: DepType::In,
                gptr,
            },
        }
    }

    /// A write dependency on `gptr`.
    pub fn output(gptr: GlobalPtr) -> Self {
        TaskDep {
            kind: DepKind::Ptr {
                ty: DepType::Out,
                gptr,
            },
        }
    }

    /// A read-modify-write dependency on `gptr`.
    pub fn inout(gptr: GlobalPtr) -> Self {
        TaskDep {
            kind: DepKind::Ptr {
                ty: DepType::InOut,
                gptr,
            },
        }
    }

    /// A direct precedence edge on a task created with
    /// [`create_task_handle`](crate::runtime::Runtime::create_task_handle).
    pub fn direct(target: &TaskRef) -> Self {
        TaskDep {
            kind: DepKind::Direct(target.task().clone()),
        }
    }

    /// An ignored placeholder dependency.
    pub fn ignore() -> Self {
        TaskDep {
            kind: DepKind::Ignore,
        }
    }
}
