//! Active-message types and the transport contract.
//!
//! The runtime exchanges three one-way messages with peer units: a data
//! dependency announcement, a release, and a direct task-to-task
//! anti-dependency. The transport is an external collaborator assumed to
//! deliver ordered, reliable unit-to-unit messages; receive handlers run on
//! whichever worker drives the progress tick.

use crate::dep::DepType;
use crate::error::{Error, Result};
use crate::gptr::{GlobalPtr, UnitId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Opaque identifier of a task on its home unit. Echoed back verbatim in
/// release messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskToken(pub u64);

/// The three active messages of the dependency protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RemoteMessage {
    /// Announce that `task` (on the sending unit) has a dependency on
    /// `gptr`, owned by the receiving unit, in the given phase. Only IN
    /// dependencies are supported remotely.
    DataDep {
        dep_type: DepType,
        gptr: GlobalPtr,
        phase: u64,
        task: TaskToken,
    },
    /// Release one dependency of `task` on the receiving unit.
    Release { task: TaskToken, dep_type: DepType },
    /// Make `predecessor` (a task on the receiving unit) hold back
    /// `successor` (a task on the sending unit) until it finishes.
    DirectDep {
        predecessor: TaskToken,
        successor: TaskToken,
    },
}

/// A routed message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub from: UnitId,
    pub to: UnitId,
    pub msg: RemoteMessage,
}

/// A release record parked on a task's remote-successor chain. When the
/// task finishes, one [`RemoteMessage::Release`] is sent per record.
#[derive(Debug, Clone)]
pub(crate) struct RemoteRelease {
    pub(crate) task: TaskToken,
    pub(crate) origin: UnitId,
    pub(crate) dep_type: DepType,
}

/// The active-message transport contract.
///
/// `send` must not block indefinitely and must preserve per-destination
/// ordering. `poll` returns the next pending message for `unit`, if any;
/// the runtime drains it on every progress tick.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, envelope: Envelope) -> Result<()>;
    fn poll(&self, unit: UnitId) -> Option<Envelope>;
    fn fini(&self) {}
}

/// Transport for a single-unit run. Sending is an error (there is no peer
/// to talk to); polling never yields a message.
pub struct NullTransport;

impl Transport for NullTransport {
    fn send(&self, envelope: Envelope) -> Result<()> {
        Err(Error::Transport(format!(
            "no transport configured for message to {}",
            envelope.to
        )))
    }

    fn poll(&self, _unit: UnitId) -> Option<Envelope> {
        None
    }
}

/// In-process transport linking several units through shared mailboxes.
///
/// Every unit's runtime holds a clone of the same transport; `send` pushes
/// into the destination mailbox, `poll` pops the caller's own. Useful for
/// exercising the remote-dependency protocol without a network.
#[derive(Clone)]
pub struct LoopbackTransport {
    mailboxes: Arc<Vec<Mutex<VecDeque<Envelope>>>>,
}

impl LoopbackTransport {
    /// A mesh of `num_units` connected mailboxes.
    pub fn mesh(num_units: usize) -> Self {
        let mailboxes = (0..num_units).map(|_| Mutex::new(VecDeque::new())).collect();
        LoopbackTransport {
            mailboxes: Arc::new(mailboxes),
        }
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, envelope: Envelope) -> Result<()> {
        let slot = self
            .mailboxes
            .get(envelope.to.0 as usize)
            .ok_or_else(|| Error::Transport(format!("{} is not part of the mesh", envelope.to)))?;
        slot.lock().push_back(envelope);
        Ok(())
    }

    fn poll(&self, unit: UnitId) -> Option<Envelope> {
        self.mailboxes
            .get(unit.0 as usize)?
            .lock()
            .pop_front()
    }
}
