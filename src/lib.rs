//! # taskweave - Bulk-Synchronous SPMD Task Runtime
//!
//! A distributed task-parallel runtime for bulk-synchronous SPMD programs.
//! Each process (*unit*) runs a fixed pool of worker threads cooperatively
//! executing a dynamic graph of tasks with data dependencies. Dependencies
//! may name memory on the local unit or on a remote one; the runtime
//! resolves them, executes tasks in a legal order and coordinates with peer
//! units by exchanging active messages.
//!
//! ## Architecture
//!
//! - **Tasks**: run-to-completion closures with declared IN/OUT/INOUT
//!   dependencies on global pointers, tracked in a per-unit dependency hash
//! - **Workers**: a fixed thread pool with per-worker LIFO queues and
//!   tail stealing
//! - **Phases**: master-advanced epochs separating before/after for remote
//!   dependency matching; out-of-phase work is deferred at the phase bound
//! - **Remote protocol**: batched resolution of incoming remote reads,
//!   releases on completion and direct anti-dependencies across units
//!
//! ## Example
//!
//! ```no_run
//! use taskweave::{GlobalPtr, Runtime, TaskDep, UnitId};
//!
//! let rt = Runtime::new().unwrap();
//! let g = GlobalPtr::new(UnitId(0), 0, 0x100);
//!
//! rt.create_task(|_| { /* produce */ }, &[TaskDep::output(g)]).unwrap();
//! rt.create_task(|_| { /* consume */ }, &[TaskDep::input(g)]).unwrap();
//!
//! rt.task_complete().unwrap();
//! rt.shutdown().unwrap();
//! ```

pub mod dep;
pub mod error;
pub mod gptr;
pub mod remote;
pub mod runtime;
pub mod task;

mod datadeps;
mod pool;
mod scheduler;
mod taskqueue;
mod topology;

pub use dep::{DepType, TaskDep};
pub use error::{Error, Result};
pub use gptr::{GlobalPtr, UnitId};
pub use remote::{Envelope, LoopbackTransport, NullTransport, RemoteMessage, TaskToken, Transport};
pub use runtime::{Runtime, RuntimeBuilder, TaskScope};
pub use task::{TaskRef, TaskState};
