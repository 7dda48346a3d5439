mod line_table;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use nix::sys::signal::Signal;
use tokio::sync::mpsc::UnboundedReceiver;

pub use self::line_table::{LineTable, SourceLine};

/// Trait implementing the loading and spawning logic of an execution
/// primitive.
pub trait Platform {
    /// Executable image loaded by this primitive.
    type Image: LineTable + Send + Sync + 'static;

    /// Execution session returned when spawning an image.
    type Session: ExecutionSession<Error = Self::Error>;

    /// Error returned by this trait.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Loads the executable at the given path.
    fn load(&mut self, path: &Path) -> impl Future<Output = Result<Self::Image, Self::Error>>;

    /// Spawns a process running the given image.
    ///
    /// The process is spawned in a **stopped** state, at its entry point.
    fn spawn(
        &mut self,
        image: Arc<Self::Image>,
    ) -> impl Future<Output = Result<Spawned<Self::Session>, Self::Error>>;
}

/// Process freshly spawned by a [Platform].
pub struct Spawned<S> {
    /// Execution session over the process.
    pub session: S,

    /// Stream of events raised by the process.
    pub events: UnboundedReceiver<TargetEvent>,

    /// Initial threads of the process, all stopped.
    pub threads: Vec<HaltedThread>,
}

/// Trait implementing the control logic of an execution primitive.
///
/// Implementors follow the **all-stop** model: whenever a thread stops, every
/// other thread of the process is halted before the stop is reported.
pub trait ExecutionSession {
    /// Error returned by this trait.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the ID of the controlled process.
    fn process_id(&self) -> u64;

    /// Inserts a breakpoint at the given address.
    fn add_breakpoint(&mut self, addr: u64) -> Result<(), Self::Error>;

    /// Removes the breakpoint at the given address.
    fn remove_breakpoint(&mut self, addr: u64) -> Result<(), Self::Error>;

    /// Resumes the given threads.
    ///
    /// Threads not listed stay halted.
    fn resume(&mut self, threads: &[ResumeRequest]) -> Result<(), Self::Error>;

    /// Makes a single thread execute one instruction, then reports a
    /// [StopCause::Trace] stop.
    fn single_step(&mut self, request: ResumeRequest) -> Result<(), Self::Error>;

    /// Halts the running process.
    ///
    /// The halt is reported as a [StopCause::Signal] stop (`SIGSTOP`).
    /// Returns `false` if no thread was left running, i.e., another stop is
    /// already on its way.
    fn interrupt(&mut self) -> Result<bool, Self::Error>;

    /// Evaluates an expression within the halted process.
    ///
    /// The expression may mutate the process' variables.
    fn evaluate(&mut self, expr: &str) -> Result<i64, Self::Error>;

    /// Terminates the process.
    fn kill(&mut self) -> Result<(), Self::Error>;
}

/// Request to resume a halted thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeRequest {
    /// ID of the thread to resume.
    pub thread_id: u64,

    /// Signal to deliver to the thread when it resumes.
    pub signal: Option<Signal>,
}

/// Halted thread, along with its instruction address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HaltedThread {
    /// ID of the thread.
    pub id: u64,

    /// Instruction address of the thread.
    pub pc: u64,
}

/// Event describing some action taking place within the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetEvent {
    /// A thread has stopped, and every other thread was halted.
    Stopped {
        /// ID of the thread responsible for the stop.
        thread_id: u64,

        /// Why the thread stopped.
        cause: StopCause,

        /// Instruction addresses of all threads of the process.
        threads: Vec<HaltedThread>,
    },

    /// A thread was created by a running thread.
    ThreadCreated {
        /// ID of the creating thread.
        parent_id: u64,

        /// The new thread, which starts running right away.
        thread: HaltedThread,
    },

    /// A thread has exited, while the process keeps running.
    ThreadExited {
        /// ID of the thread.
        thread_id: u64,

        /// Exit code of the thread.
        exit_code: i32,
    },

    /// The process has exited.
    Exited(ExitStatus),
}

/// Cause of a thread stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// The thread executed a breakpoint (the reported address is the
    /// breakpoint's address).
    Breakpoint,

    /// A signal was delivered to the thread.
    Signal(Signal),

    /// The thread completed a single-step.
    Trace,
}

/// Exit status of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The process exited normally.
    ExitCode(i32),

    /// The process was terminated by a signal.
    Signal(Signal),
}
