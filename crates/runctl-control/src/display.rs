//! The formatters below render the run-control state the way command-line
//! debuggers traditionally do, e.g.:
//!
//! ```text
//! Process 4001 stopped
//! * thread #1: tid = 0xfa1, 0x0000000000001004 main.c:7, stop reason = breakpoint 1.1
//! ```

use std::fmt;

use crate::breakpoint::Breakpoint;
use crate::primitive::ExitStatus;
use crate::process::{ProcessSnapshot, ProcessState};
use crate::thread::{ExecutionState, StopReason, Thread};

/// Breakpoint listing, one breakpoint per line.
pub struct BreakpointList<'a>(pub &'a [Breakpoint]);

impl fmt::Display for BreakpointList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return writeln!(f, "No breakpoints currently set.");
        }

        for bp in self.0 {
            write!(
                f,
                "{}: file ='{}', line = {}, locations = {}",
                bp.id(),
                bp.file(),
                bp.line(),
                bp.locations().len()
            )?;

            if !bp.is_enabled() {
                f.write_str(" Options: disabled")?;
            }

            writeln!(f)?;
        }

        Ok(())
    }
}

/// Process status: the process header, followed by the selected thread.
pub struct ProcessStatus<'a>(pub &'a ProcessSnapshot);

impl fmt::Display for ProcessStatus<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_header(f, self.0)?;

        if self.0.state() == ProcessState::Stopped {
            if let Some(thread) = self.0.selected_thread() {
                write_thread(f, thread, true)?;
            }
        }

        Ok(())
    }
}

/// Thread listing: the process header, followed by every thread.
pub struct ThreadList<'a>(pub &'a ProcessSnapshot);

impl fmt::Display for ThreadList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_header(f, self.0)?;

        let selected = self.0.selected_thread().map(Thread::index);

        for thread in self.0.threads() {
            write_thread(f, thread, selected == Some(thread.index()))?;
        }

        Ok(())
    }
}

fn write_header(f: &mut fmt::Formatter<'_>, snapshot: &ProcessSnapshot) -> fmt::Result {
    let pid = snapshot.pid();

    match (snapshot.state(), snapshot.exit_status()) {
        (ProcessState::Exited, Some(ExitStatus::ExitCode(code))) => {
            writeln!(f, "Process {pid} exited with status = {code} ({code:#010x})")
        }
        (ProcessState::Exited, Some(ExitStatus::Signal(signal))) => {
            writeln!(f, "Process {pid} exited with signal = {signal}")
        }
        (state, _) => writeln!(f, "Process {pid} {state}"),
    }
}

fn write_thread(f: &mut fmt::Formatter<'_>, thread: &Thread, selected: bool) -> fmt::Result {
    let marker = if selected { '*' } else { ' ' };

    write!(
        f,
        "{marker} thread #{}: tid = {:#x}",
        thread.index(),
        thread.id()
    )?;

    match thread.state() {
        ExecutionState::Running => f.write_str(", running")?,
        ExecutionState::Exited => f.write_str(", exited")?,
        ExecutionState::Stopped | ExecutionState::Suspended => {
            if let Some(pc) = thread.pc() {
                write!(f, ", {pc:#018x}")?;
            }

            if let Some(line) = thread.line() {
                write!(f, " {line}")?;
            }

            if *thread.stop_reason() != StopReason::None {
                write!(f, ", stop reason = {}", thread.stop_reason())?;
            }

            if thread.is_suspended() {
                f.write_str(", suspended")?;
            }
        }
    }

    writeln!(f)
}
