use std::path::PathBuf;
use std::time::Duration;

use crate::breakpoint::{BreakpointId, LocationMismatch};
use crate::process::ProcessState;
use crate::thread::ExecutionState;

/// Execution primitive error.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct TargetError<E>(pub E);

/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error<E> {
    /// The executable could not be loaded or spawned.
    #[error("Failed to launch {path}")]
    Launch {
        /// Path of the executable.
        path: PathBuf,

        /// Error reported by the execution primitive.
        #[source]
        source: E,
    },

    /// The command is forbidden in the current process state.
    #[error("Cannot {operation} while the process is {state}")]
    InvalidState {
        /// Name of the rejected command.
        operation: &'static str,

        /// Process state at the time of the command.
        state: ProcessState,
    },

    /// The command is forbidden in the current thread state.
    #[error("Cannot {operation} thread #{thread} while it is {state}")]
    InvalidThreadState {
        /// Name of the rejected command.
        operation: &'static str,

        /// Index of the thread.
        thread: u32,

        /// Thread state at the time of the command.
        state: ExecutionState,
    },

    /// Every stopped thread is suspended, nothing can be resumed.
    #[error("All threads are suspended")]
    AllThreadsSuspended,

    /// The inferior must be stopped for this command.
    #[error("Process must be stopped, but it is {0}")]
    NotStopped(ProcessState),

    /// A breakpoint resolved to an unexpected number of locations.
    #[error(transparent)]
    Resolution(#[from] LocationMismatch),

    /// No breakpoint with this ID.
    #[error("Breakpoint {0} not found")]
    UnknownBreakpoint(BreakpointId),

    /// No thread with this index.
    #[error("Thread #{0} not found")]
    UnknownThread(u32),

    /// A wait on the process state timed out.
    #[error("No stop event after {0:?}")]
    Timeout(Duration),

    /// The event pump of the process is gone.
    #[error("Process event channel closed")]
    EventChannelClosed,

    /// The execution primitive failed.
    #[error(transparent)]
    Target(#[from] TargetError<E>),
}

/// Result type of this crate.
pub type Result<T, E> = core::result::Result<T, Error<E>>;
