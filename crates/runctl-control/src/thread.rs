use std::fmt;

use nix::sys::signal::Signal;

use crate::breakpoint::BreakpointId;
use crate::primitive::{ExitStatus, SourceLine};

/// Execution state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionState {
    /// The thread is executing.
    Running,

    /// The thread is halted.
    Stopped,

    /// The thread is halted, and stays so until explicitly resumed by the
    /// caller.
    ///
    /// This is a refinement of [Stopped](Self::Stopped).
    Suspended,

    /// The thread has exited (terminal state).
    Exited,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Suspended => "suspended",
            Self::Exited => "exited",
        })
    }
}

/// Why a thread last stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The thread did not cause the last stop.
    None,

    /// The thread hit a breakpoint location.
    Breakpoint {
        /// ID of the breakpoint.
        id: BreakpointId,

        /// ID of the location within the breakpoint (1-based).
        location: u32,
    },

    /// A signal was delivered to the thread.
    Signal(Signal),

    /// The thread completed a single-step.
    Trace,

    /// The thread has exited.
    Exited(ExitStatus),

    /// The thread stopped for some other reason.
    Other(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Breakpoint { id, location } => write!(f, "breakpoint {id}.{location}"),
            Self::Signal(signal) => write!(f, "signal {signal}"),
            Self::Trace => f.write_str("trace"),
            Self::Exited(_) => f.write_str("exited"),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

/// Thread of the inferior process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    /// Index of the thread (1-based, creation order).
    index: u32,

    /// ID of the thread, as known by the execution primitive.
    id: u64,

    state: ExecutionState,

    stop_reason: StopReason,

    /// Last known instruction address.
    pc: Option<u64>,

    /// Source line of the last known instruction address.
    line: Option<SourceLine>,

    /// Signal to deliver when the thread resumes.
    resume_signal: Option<Signal>,
}

impl Thread {
    pub(crate) const fn new(index: u32, id: u64, state: ExecutionState) -> Self {
        Self {
            index,
            id,
            state,
            stop_reason: StopReason::None,
            pc: None,
            line: None,
            resume_signal: None,
        }
    }

    /// Returns the thread's index (1-based, creation order).
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Returns the thread's ID.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns the thread's execution state.
    pub const fn state(&self) -> ExecutionState {
        self.state
    }

    /// Returns why the thread last stopped.
    pub const fn stop_reason(&self) -> &StopReason {
        &self.stop_reason
    }

    /// Returns the thread's last known instruction address.
    pub const fn pc(&self) -> Option<u64> {
        self.pc
    }

    /// Returns the source line of the thread's last known instruction
    /// address.
    pub const fn line(&self) -> Option<&SourceLine> {
        self.line.as_ref()
    }

    /// Returns the signal delivered to the thread on its next resume.
    pub const fn resume_signal(&self) -> Option<Signal> {
        self.resume_signal
    }

    /// Returns whether the thread is stopped (suspended or not).
    pub const fn is_stopped(&self) -> bool {
        matches!(self.state, ExecutionState::Stopped | ExecutionState::Suspended)
    }

    /// Returns whether the thread was suspended by the caller.
    ///
    /// A suspended thread is always [stopped](Self::is_stopped).
    pub const fn is_suspended(&self) -> bool {
        matches!(self.state, ExecutionState::Suspended)
    }

    /// Returns whether the thread is running.
    pub const fn is_running(&self) -> bool {
        matches!(self.state, ExecutionState::Running)
    }

    /// Returns whether the thread has exited.
    pub const fn is_exited(&self) -> bool {
        matches!(self.state, ExecutionState::Exited)
    }

    pub(crate) fn set_location(&mut self, pc: u64, line: Option<SourceLine>) {
        self.pc = Some(pc);
        self.line = line;
    }

    /// `Stopped → Running`.
    ///
    /// On success, the pending resume signal is handed over.
    pub(crate) fn resume(&mut self) -> Result<Option<Signal>, ExecutionState> {
        if self.state != ExecutionState::Stopped {
            return Err(self.state);
        }

        self.state = ExecutionState::Running;
        self.stop_reason = StopReason::None;

        Ok(self.resume_signal.take())
    }

    /// `Running → Stopped`, because of the given reason.
    ///
    /// A suspended thread was not running, so it is left untouched (along
    /// with its previous stop reason).
    pub(crate) fn stop(&mut self, reason: StopReason) {
        match self.state {
            ExecutionState::Running | ExecutionState::Stopped => {
                if let StopReason::Signal(signal) = reason {
                    self.resume_signal = Some(signal);
                }
                self.state = ExecutionState::Stopped;
                self.stop_reason = reason;
            }
            ExecutionState::Suspended | ExecutionState::Exited => (),
        }
    }

    /// `Stopped → Suspended`.
    pub(crate) fn suspend(&mut self) -> Result<(), ExecutionState> {
        if self.state != ExecutionState::Stopped {
            return Err(self.state);
        }

        self.state = ExecutionState::Suspended;
        Ok(())
    }

    /// `Suspended → Stopped`.
    pub(crate) fn unsuspend(&mut self) -> Result<(), ExecutionState> {
        if self.state != ExecutionState::Suspended {
            return Err(self.state);
        }

        self.state = ExecutionState::Stopped;
        Ok(())
    }

    /// `* → Exited`.
    pub(crate) fn exit(&mut self, reason: StopReason) {
        if self.state != ExecutionState::Exited {
            self.state = ExecutionState::Exited;
            self.stop_reason = reason;
            self.resume_signal = None;
        }
    }

    /// Forgets the pending resume signal (e.g., the debugger's own
    /// `SIGSTOP`).
    pub(crate) fn discard_resume_signal(&mut self) {
        self.resume_signal = None;
    }
}

#[cfg(test)]
mod tests {
    use nix::sys::signal::Signal;

    use super::{ExecutionState, StopReason, Thread};
    use crate::breakpoint::BreakpointId;
    use crate::primitive::ExitStatus;

    fn assert_invariant(thread: &Thread) {
        if thread.is_suspended() {
            assert!(thread.is_stopped());
        }
    }

    #[test]
    fn initial_state_is_stopped() {
        let thread = Thread::new(1, 42, ExecutionState::Stopped);

        assert!(thread.is_stopped());
        assert!(!thread.is_suspended());
        assert_eq!(thread.stop_reason(), &StopReason::None);
    }

    #[test]
    fn breakpoint_stop_never_suspends() {
        let mut thread = Thread::new(1, 42, ExecutionState::Stopped);

        thread.resume().expect("resume stopped thread");
        assert!(thread.is_running());
        assert!(!thread.is_stopped());
        assert_invariant(&thread);

        thread.stop(StopReason::Breakpoint {
            id: BreakpointId(1),
            location: 1,
        });

        assert_eq!(thread.state(), ExecutionState::Stopped);
        assert!(!thread.is_suspended());
        assert_invariant(&thread);
    }

    #[test]
    fn signal_stop_never_suspends() {
        let mut thread = Thread::new(1, 42, ExecutionState::Stopped);

        thread.resume().expect("resume stopped thread");
        thread.stop(StopReason::Signal(Signal::SIGSTOP));

        assert!(thread.is_stopped());
        assert!(!thread.is_suspended());
        assert_eq!(thread.resume_signal(), Some(Signal::SIGSTOP));

        thread.discard_resume_signal();
        assert_eq!(thread.resume().expect("resume stopped thread"), None);
    }

    #[test]
    fn resume_signal_is_handed_over_once() {
        let mut thread = Thread::new(1, 42, ExecutionState::Running);

        thread.stop(StopReason::Signal(Signal::SIGUSR1));

        assert_eq!(thread.resume().expect("resume stopped thread"), Some(Signal::SIGUSR1));
        thread.stop(StopReason::Trace);
        assert_eq!(thread.resume().expect("resume stopped thread"), None);
    }

    #[test]
    fn suspended_thread_is_left_alone() {
        let mut thread = Thread::new(2, 43, ExecutionState::Stopped);

        thread.suspend().expect("suspend stopped thread");
        assert!(thread.is_suspended());
        assert_invariant(&thread);

        assert_eq!(thread.resume(), Err(ExecutionState::Suspended));

        thread.stop(StopReason::Signal(Signal::SIGSTOP));
        assert_eq!(thread.state(), ExecutionState::Suspended);
        assert_eq!(thread.stop_reason(), &StopReason::None);

        thread.unsuspend().expect("unsuspend thread");
        assert_eq!(thread.state(), ExecutionState::Stopped);
        assert_eq!(thread.unsuspend(), Err(ExecutionState::Stopped));
    }

    #[test]
    fn only_stopped_thread_can_be_suspended() {
        let mut thread = Thread::new(1, 42, ExecutionState::Running);
        assert_eq!(thread.suspend(), Err(ExecutionState::Running));

        thread.exit(StopReason::Exited(ExitStatus::ExitCode(0)));
        assert_eq!(thread.suspend(), Err(ExecutionState::Exited));
    }

    #[test]
    fn exited_is_terminal() {
        let mut thread = Thread::new(1, 42, ExecutionState::Running);

        thread.exit(StopReason::Exited(ExitStatus::ExitCode(3)));
        thread.stop(StopReason::Trace);
        thread.exit(StopReason::Exited(ExitStatus::ExitCode(4)));

        assert!(thread.is_exited());
        assert!(!thread.is_stopped());
        assert_eq!(
            thread.stop_reason(),
            &StopReason::Exited(ExitStatus::ExitCode(3))
        );
        assert_eq!(thread.resume(), Err(ExecutionState::Exited));
    }
}
