use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use runctl_control::primitive::{ExecutionSession, ResumeRequest};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::Result;
use crate::machine::{Activity, Machine};

/// Execution session over an emulated process.
///
/// The process runs on a tokio task, one instruction per thread every tick.
pub struct Session {
    pid: u64,
    machine: Arc<Mutex<Machine>>,

    /// Wakes the runner up when threads were resumed.
    wake: Arc<Notify>,

    runner: JoinHandle<()>,
}

impl Session {
    pub(crate) fn start(pid: u64, machine: Machine, tick: Duration) -> Self {
        let machine = Arc::new(Mutex::new(machine));
        let wake = Arc::new(Notify::new());

        let runner = tokio::spawn(
            run(machine.clone(), wake.clone(), tick).instrument(tracing::debug_span!("Runner", pid)),
        );

        Self {
            pid,
            machine,
            wake,
            runner,
        }
    }

    fn machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ExecutionSession for Session {
    type Error = crate::Error;

    fn process_id(&self) -> u64 {
        self.pid
    }

    fn add_breakpoint(&mut self, addr: u64) -> Result<()> {
        self.machine().add_breakpoint(addr)
    }

    fn remove_breakpoint(&mut self, addr: u64) -> Result<()> {
        self.machine().remove_breakpoint(addr)
    }

    fn resume(&mut self, threads: &[ResumeRequest]) -> Result<()> {
        self.machine().resume(threads)?;
        self.wake.notify_one();
        Ok(())
    }

    fn single_step(&mut self, request: ResumeRequest) -> Result<()> {
        self.machine().single_step(request)?;
        self.wake.notify_one();
        Ok(())
    }

    fn interrupt(&mut self) -> Result<bool> {
        self.machine().interrupt()
    }

    fn evaluate(&mut self, expr: &str) -> Result<i64> {
        self.machine().evaluate(expr)
    }

    fn kill(&mut self) -> Result<()> {
        self.machine().kill();
        self.wake.notify_one();
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.runner.abort();
    }
}

async fn run(machine: Arc<Mutex<Machine>>, wake: Arc<Notify>, tick: Duration) {
    loop {
        let activity = machine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tick();

        match activity {
            Activity::Idle => wake.notified().await,
            Activity::Busy if tick.is_zero() => tokio::task::yield_now().await,
            Activity::Busy => tokio::time::sleep(tick).await,
            Activity::Exited => break,
        }
    }

    tracing::trace!("runner stopped");
}
