use std::fmt;
use std::path::{Path, PathBuf};

use nix::sys::signal::Signal;

use crate::primitive::{ExitStatus, HaltedThread, LineTable};
use crate::thread::{ExecutionState, StopReason, Thread};

/// Aggregate execution state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// Every live thread is stopped.
    Stopped,

    /// At least one thread is running.
    Running,

    /// The process has exited (terminal state).
    Exited,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Exited => "exited",
        })
    }
}

/// Consistent view over a process and its threads.
///
/// Snapshots are published atomically: a snapshot never shows a half-applied
/// transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pid: u64,
    executable: PathBuf,

    /// Threads, in creation order.
    threads: Vec<Thread>,

    /// Index of the thread responsible for the last stop.
    selected: Option<u32>,

    /// Number of stops (and exit) so far.
    stop_id: u64,

    exit_status: Option<ExitStatus>,

    /// Whether the next `SIGSTOP` stop comes from the debugger.
    interrupt_requested: bool,
}

impl ProcessSnapshot {
    pub(crate) fn new(
        pid: u64,
        executable: PathBuf,
        threads: &[HaltedThread],
        line_table: &(impl LineTable + ?Sized),
    ) -> Self {
        let threads = threads
            .iter()
            .zip(1..)
            .map(|(halted, index)| {
                let mut thread = Thread::new(index, halted.id, ExecutionState::Stopped);
                thread.set_location(halted.pc, line_table.source_line(halted.pc));
                thread
            })
            .collect::<Vec<_>>();

        Self {
            pid,
            executable,
            selected: threads.first().map(Thread::index),
            threads,
            stop_id: 0,
            exit_status: None,
            interrupt_requested: false,
        }
    }

    /// Returns the process ID.
    pub const fn pid(&self) -> u64 {
        self.pid
    }

    /// Returns the path of the executable the process was launched from.
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Returns the aggregate state of the process, derived from its threads.
    pub fn state(&self) -> ProcessState {
        let mut live = self.threads.iter().filter(|t| !t.is_exited()).peekable();

        if live.peek().is_none() {
            ProcessState::Exited
        } else if live.any(Thread::is_running) {
            ProcessState::Running
        } else {
            ProcessState::Stopped
        }
    }

    /// Returns the threads, in creation order.
    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    /// Returns the thread with the given index (1-based).
    pub fn thread(&self, index: u32) -> Option<&Thread> {
        self.threads.iter().find(|t| t.index() == index)
    }

    /// Returns the thread responsible for the last stop.
    pub fn selected_thread(&self) -> Option<&Thread> {
        self.selected.and_then(|index| self.thread(index))
    }

    /// Returns the number of stops so far (the exit counts as a stop).
    pub const fn stop_id(&self) -> u64 {
        self.stop_id
    }

    /// Returns the exit status of the process, once exited.
    pub const fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub(crate) fn thread_mut(&mut self, index: u32) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|t| t.index() == index)
    }

    pub(crate) fn threads_mut(&mut self) -> &mut [Thread] {
        &mut self.threads
    }

    pub(crate) fn request_interrupt(&mut self) {
        self.interrupt_requested = true;
    }

    /// Applies an all-stop of the process, caused by the given thread.
    ///
    /// On success, returns the index of the thread.
    pub(crate) fn apply_stop(
        &mut self,
        thread_id: u64,
        reason: StopReason,
        halted: &[HaltedThread],
        line_table: &(impl LineTable + ?Sized),
    ) -> Option<u32> {
        let index = self.threads.iter().find(|t| t.id() == thread_id)?.index();

        let interrupted = std::mem::take(&mut self.interrupt_requested)
            && reason == StopReason::Signal(Signal::SIGSTOP);

        for thread in self.threads.iter_mut() {
            if let Some(h) = halted.iter().find(|h| h.id == thread.id()) {
                thread.set_location(h.pc, line_table.source_line(h.pc));
            }

            if thread.id() == thread_id {
                thread.stop(reason.clone());

                // the debugger's own SIGSTOP is never delivered back
                if interrupted {
                    thread.discard_resume_signal();
                }
            } else if thread.is_running() {
                thread.stop(StopReason::None);
            }
        }

        self.selected = Some(index);
        self.stop_id += 1;

        Some(index)
    }

    /// Adds a thread created by a running thread.
    ///
    /// On success, returns the index of the new thread.
    pub(crate) fn apply_thread_created(
        &mut self,
        thread: HaltedThread,
        line_table: &(impl LineTable + ?Sized),
    ) -> u32 {
        let index = self.threads.last().map_or(1, |t| t.index() + 1);

        let mut new_thread = Thread::new(index, thread.id, ExecutionState::Running);
        new_thread.set_location(thread.pc, line_table.source_line(thread.pc));
        self.threads.push(new_thread);

        index
    }

    /// Marks a single thread as exited.
    ///
    /// On success, returns the index of the thread.
    pub(crate) fn apply_thread_exited(&mut self, thread_id: u64, exit_code: i32) -> Option<u32> {
        let thread = self.threads.iter_mut().find(|t| t.id() == thread_id)?;
        thread.exit(StopReason::Exited(ExitStatus::ExitCode(exit_code)));
        Some(thread.index())
    }

    /// Marks the whole process as exited.
    ///
    /// A `None` status means the execution primitive was lost.
    pub(crate) fn apply_exit(&mut self, status: Option<ExitStatus>) {
        let reason = match status {
            Some(status) => StopReason::Exited(status),
            None => StopReason::Other("execution primitive lost".to_owned()),
        };

        for thread in self.threads.iter_mut() {
            thread.exit(reason.clone());
        }

        self.exit_status = status;
        self.interrupt_requested = false;
        self.stop_id += 1;
    }
}
