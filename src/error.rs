//! Error types for the tasking runtime.

use thiserror::Error;

/// Errors reported by the public runtime API.
///
/// Runtime misuse (waiting on a destroyed handle, issuing a remote
/// dependency without a transport) is reported as an error; internal
/// invariant violations are debug assertions and considered fatal.
#[derive(Debug, Error)]
pub enum Error {
    /// A bad argument or a call that is invalid in the current state.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A failure propagated from the active-message transport.
    ///
    /// The transport is assumed reliable; a failure here is fatal for the
    /// collective and no retries are attempted at this layer.
    #[error("transport failure: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, Error>;
