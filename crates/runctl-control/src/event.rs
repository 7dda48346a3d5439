use std::fmt;
use std::str::FromStr;

use crate::primitive::ExitStatus;
use crate::thread::StopReason;

/// How control commands report their completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ControlMode {
    /// Commands wait until the process reaches a stable stopped (or exited)
    /// state.
    #[default]
    Synchronous,

    /// Commands return as soon as the transition is initiated.
    ///
    /// The caller polls [Process::get_state](crate::Process::get_state) or
    /// awaits [Process::wait_for_stop](crate::Process::wait_for_stop).
    Asynchronous,
}

impl ControlMode {
    /// Returns whether this is the asynchronous mode.
    pub const fn is_async(self) -> bool {
        matches!(self, Self::Asynchronous)
    }
}

impl FromStr for ControlMode {
    type Err = ParseControlModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" | "synchronous" => Ok(Self::Synchronous),
            "async" | "asynchronous" => Ok(Self::Asynchronous),
            _ => Err(ParseControlModeError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an unknown [ControlMode].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown control mode `{0}` (expected `sync` or `async`)")]
pub struct ParseControlModeError(String);

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Synchronous => "synchronous",
            Self::Asynchronous => "asynchronous",
        })
    }
}

/// State change of the inferior, queued until drained by the caller.
///
/// Events are queued regardless of the [ControlMode], so switching modes
/// never discards any of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// Threads were resumed by a control command.
    Resumed,

    /// The process stopped.
    Stopped {
        /// Index of the thread responsible for the stop.
        thread: u32,

        /// Why the thread stopped.
        reason: StopReason,
    },

    /// A thread was created.
    ThreadCreated {
        /// Index of the new thread.
        thread: u32,
    },

    /// A thread has exited.
    ThreadExited {
        /// Index of the thread.
        thread: u32,

        /// Exit code of the thread.
        exit_code: i32,
    },

    /// The process has exited.
    Exited(Option<ExitStatus>),
}
