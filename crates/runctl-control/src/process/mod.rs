mod pump;
mod snapshot;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

pub use self::snapshot::{ProcessSnapshot, ProcessState};

use self::pump::EventPump;
use crate::breakpoint::{Breakpoint, BreakpointId, BreakpointRegistry};
use crate::error::{Error, Result, TargetError};
use crate::event::{ControlMode, ProcessEvent};
use crate::primitive::{ExecutionSession, LineTable, ResumeRequest, Spawned};

/// Process control unit.
///
/// Owns the execution session of a launched process, and exposes the control
/// commands along with a consistent view of the process state.
pub struct Process<S: ExecutionSession> {
    session: S,

    /// Latest published state of the process.
    state: Arc<watch::Sender<ProcessSnapshot>>,

    /// Breakpoints, shared with the target.
    registry: Arc<Mutex<BreakpointRegistry>>,

    line_table: Arc<dyn LineTable + Send + Sync>,

    mode: ControlMode,

    /// Pending process events.
    events: mpsc::UnboundedReceiver<ProcessEvent>,
    notifier: mpsc::UnboundedSender<ProcessEvent>,

    pump: JoinHandle<()>,

    /// Observed by the target, to know whether the process is still around.
    lease: Arc<()>,
}

impl<S: ExecutionSession> Process<S> {
    pub(crate) fn start(
        spawned: Spawned<S>,
        executable: PathBuf,
        registry: Arc<Mutex<BreakpointRegistry>>,
        line_table: Arc<dyn LineTable + Send + Sync>,
        mode: ControlMode,
    ) -> Result<Self, S::Error> {
        let Spawned {
            mut session,
            events,
            threads,
        } = spawned;

        let addrs = lock(&registry).enabled_addrs().collect::<BTreeSet<_>>();

        for addr in addrs {
            session.add_breakpoint(addr).map_err(TargetError)?;
        }

        let pid = session.process_id();
        let snapshot = ProcessSnapshot::new(pid, executable, &threads, &*line_table);
        let state = Arc::new(watch::Sender::new(snapshot));

        let (notifier, rx) = mpsc::unbounded_channel();

        let pump = EventPump {
            state: state.clone(),
            registry: registry.clone(),
            line_table: line_table.clone(),
            notifier: notifier.clone(),
        };

        let span = tracing::info_span!("EventPump", pid);
        let pump = tokio::spawn(pump.run(events).instrument(span));

        Ok(Self {
            session,
            state,
            registry,
            line_table,
            mode,
            events: rx,
            notifier,
            pump,
            lease: Arc::new(()),
        })
    }

    /// Returns the process ID.
    pub fn pid(&self) -> u64 {
        self.session.process_id()
    }

    /// Returns the control mode of the process.
    pub const fn mode(&self) -> ControlMode {
        self.mode
    }

    /// Sets the control mode of the process.
    ///
    /// Pending events are kept across mode switches.
    pub fn set_mode(&mut self, mode: ControlMode) {
        tracing::debug!(%mode, "control mode changed");
        self.mode = mode;
    }

    /// Returns a consistent snapshot of the process state.
    pub fn get_state(&self) -> ProcessSnapshot {
        self.state.borrow().clone()
    }

    pub(crate) fn lease(&self) -> Weak<()> {
        Arc::downgrade(&self.lease)
    }

    /// Returns a receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ProcessSnapshot> {
        self.state.subscribe()
    }

    /// Resumes every stopped thread, except suspended ones.
    ///
    /// In synchronous mode, this waits for the next stop (or the exit) of
    /// the process.
    #[tracing::instrument(name = "Continue", skip(self), fields(pid = self.pid(), mode = %self.mode))]
    pub async fn continue_(&mut self) -> Result<ProcessSnapshot, S::Error> {
        let notifier = self.notifier.clone();

        self.commit(|snapshot, session| {
            let state = snapshot.state();

            if state != ProcessState::Stopped {
                return Err(Error::InvalidState {
                    operation: "continue",
                    state,
                });
            }

            let requests = snapshot
                .threads_mut()
                .iter_mut()
                .filter_map(|thread| {
                    let signal = thread.resume().ok()?;
                    Some(ResumeRequest {
                        thread_id: thread.id(),
                        signal,
                    })
                })
                .collect::<Vec<_>>();

            if requests.is_empty() {
                return Err(Error::AllThreadsSuspended);
            }

            session.resume(&requests).map_err(TargetError)?;

            // queued before any event of the resumed threads
            let _ = notifier.send(ProcessEvent::Resumed);

            Ok(())
        })?;

        tracing::info!("process resumed");

        self.complete().await
    }

    /// Makes a single thread execute one instruction.
    ///
    /// The other threads stay halted. In synchronous mode, this waits for the
    /// step to complete.
    #[tracing::instrument(name = "Step", skip(self), fields(pid = self.pid(), mode = %self.mode))]
    pub async fn step(&mut self, thread: u32) -> Result<ProcessSnapshot, S::Error> {
        let notifier = self.notifier.clone();

        self.commit(|snapshot, session| {
            let state = snapshot.state();

            if state != ProcessState::Stopped {
                return Err(Error::InvalidState {
                    operation: "step",
                    state,
                });
            }

            let t = snapshot
                .thread_mut(thread)
                .ok_or(Error::UnknownThread(thread))?;

            let signal = t.resume().map_err(|state| Error::InvalidThreadState {
                operation: "step",
                thread,
                state,
            })?;

            session
                .single_step(ResumeRequest {
                    thread_id: t.id(),
                    signal,
                })
                .map_err(TargetError)?;

            let _ = notifier.send(ProcessEvent::Resumed);

            Ok(())
        })?;

        self.complete().await
    }

    /// Stops the running process with a `SIGSTOP`.
    ///
    /// The signal is the debugger's own and is not delivered back to the
    /// inferior on the next resume. If the process was already stopping
    /// (e.g., on a breakpoint), that stop is the one reported. In synchronous
    /// mode, this waits for the process to stop.
    #[tracing::instrument(name = "Interrupt", skip(self), fields(pid = self.pid(), mode = %self.mode))]
    pub async fn interrupt(&mut self) -> Result<ProcessSnapshot, S::Error> {
        let interrupted = self.commit(|snapshot, session| {
            let state = snapshot.state();

            if state != ProcessState::Running {
                return Err(Error::InvalidState {
                    operation: "interrupt",
                    state,
                });
            }

            let interrupted = session.interrupt().map_err(TargetError)?;

            // the pending stop event is not applied yet
            if interrupted {
                snapshot.request_interrupt();
            }

            Ok(interrupted)
        })?;

        if interrupted {
            tracing::info!("interrupt requested");
        } else {
            tracing::debug!("process already stopping");
        }

        self.complete().await
    }

    /// Evaluates an expression within the stopped process.
    ///
    /// The expression may mutate the inferior's variables, but the execution
    /// state of the process is left unchanged.
    #[tracing::instrument(name = "Evaluate", skip(self), fields(pid = self.pid()))]
    pub fn evaluate_expression(&mut self, expr: &str) -> Result<i64, S::Error> {
        let value = self.commit(|snapshot, session| {
            let state = snapshot.state();

            if state != ProcessState::Stopped {
                return Err(Error::NotStopped(state));
            }

            session
                .evaluate(expr)
                .map_err(|e| Error::Target(TargetError(e)))
        })?;

        tracing::debug!(value, "expression evaluated");

        Ok(value)
    }

    /// Suspends a stopped thread.
    ///
    /// A suspended thread stays halted across resumes, until
    /// [resumed](Self::resume_thread).
    pub fn suspend_thread(&mut self, thread: u32) -> Result<(), S::Error> {
        self.commit(|snapshot, _| {
            let t = snapshot
                .thread_mut(thread)
                .ok_or(Error::UnknownThread(thread))?;

            t.suspend().map_err(|state| Error::InvalidThreadState {
                operation: "suspend",
                thread,
                state,
            })
        })?;

        tracing::debug!(thread, "thread suspended");

        Ok(())
    }

    /// Resumes a suspended thread.
    ///
    /// The thread goes back to the stopped state, and runs again on the next
    /// continue.
    pub fn resume_thread(&mut self, thread: u32) -> Result<(), S::Error> {
        self.commit(|snapshot, _| {
            let t = snapshot
                .thread_mut(thread)
                .ok_or(Error::UnknownThread(thread))?;

            t.unsuspend().map_err(|state| Error::InvalidThreadState {
                operation: "resume",
                thread,
                state,
            })
        })?;

        tracing::debug!(thread, "thread unsuspended");

        Ok(())
    }

    /// Terminates the process, and waits for its exit.
    #[tracing::instrument(name = "Kill", skip(self), fields(pid = self.pid()))]
    pub async fn kill(&mut self) -> Result<ProcessSnapshot, S::Error> {
        self.commit(|snapshot, session| {
            let state = snapshot.state();

            if state == ProcessState::Exited {
                return Err(Error::InvalidState {
                    operation: "kill",
                    state,
                });
            }

            session.kill().map_err(|e| Error::Target(TargetError(e)))
        })?;

        self.wait_until(|s| s.state() == ProcessState::Exited, None)
            .await
    }

    /// Waits for the process to leave the running state.
    ///
    /// Returns right away if the process is already stopped (or exited).
    pub async fn wait_for_stop(&self, timeout: Duration) -> Result<ProcessSnapshot, S::Error> {
        self.wait_until(|s| s.state() != ProcessState::Running, Some(timeout))
            .await
    }

    /// Waits for the next pending process event.
    pub async fn next_event(&mut self) -> Option<ProcessEvent> {
        self.events.recv().await
    }

    /// Returns the next pending process event, if any.
    pub fn try_next_event(&mut self) -> Option<ProcessEvent> {
        self.events.try_recv().ok()
    }

    /// Adds a breakpoint on a source line, and installs its locations in the
    /// live process.
    pub fn set_breakpoint(&mut self, file: &str, line: u32) -> Result<Breakpoint, S::Error> {
        let live = !self.is_exited();
        let mut registry = lock(&self.registry);

        let bp = registry.add(file, line, &*self.line_table).clone();

        if live {
            let addrs = exclusive_addrs(&registry, &bp);

            if let Err(e) = install(&mut self.session, &addrs) {
                registry.remove(bp.id());
                return Err(e);
            }
        }

        Ok(bp)
    }

    /// Checks that a breakpoint resolved to exactly `expected` locations.
    pub fn expect_locations(&self, id: BreakpointId, expected: usize) -> Result<(), S::Error> {
        lock(&self.registry)
            .expect_locations(id, expected)
            .ok_or(Error::UnknownBreakpoint(id))??;

        Ok(())
    }

    /// Removes a breakpoint, and uninstalls its locations from the live
    /// process.
    ///
    /// The breakpoint is kept if its locations could not be uninstalled.
    pub fn remove_breakpoint(&mut self, id: BreakpointId) -> Result<Breakpoint, S::Error> {
        let live = !self.is_exited();
        let mut registry = lock(&self.registry);

        let bp = registry.get(id).ok_or(Error::UnknownBreakpoint(id))?;

        if live && bp.is_enabled() {
            let addrs = exclusive_addrs(&registry, bp);
            uninstall(&mut self.session, &addrs)?;
        }

        registry.remove(id).ok_or(Error::UnknownBreakpoint(id))
    }

    /// Enables or disables a breakpoint in the live process.
    ///
    /// The breakpoint is left as is if its locations could not be
    /// (un)installed.
    pub fn set_breakpoint_enabled(
        &mut self,
        id: BreakpointId,
        enabled: bool,
    ) -> Result<(), S::Error> {
        let live = !self.is_exited();
        let mut registry = lock(&self.registry);

        let bp = registry.get(id).ok_or(Error::UnknownBreakpoint(id))?;

        if bp.is_enabled() == enabled {
            return Ok(());
        }

        if live {
            let addrs = exclusive_addrs(&registry, bp);

            if enabled {
                install(&mut self.session, &addrs)?;
            } else {
                uninstall(&mut self.session, &addrs)?;
            }
        }

        registry.set_enabled(id, enabled);

        Ok(())
    }

    /// Returns the breakpoints, in creation order.
    pub fn list_breakpoints(&self) -> Vec<Breakpoint> {
        lock(&self.registry).iter().cloned().collect()
    }

    fn is_exited(&self) -> bool {
        self.state.borrow().state() == ProcessState::Exited
    }

    /// Applies a command onto a draft of the process state.
    ///
    /// The draft is published only if the command succeeds, so a failed
    /// command leaves the process state unchanged.
    fn commit<T>(
        &mut self,
        f: impl FnOnce(&mut ProcessSnapshot, &mut S) -> Result<T, S::Error>,
    ) -> Result<T, S::Error> {
        let session = &mut self.session;
        let mut outcome = None;

        self.state.send_if_modified(|snapshot| {
            let mut draft = snapshot.clone();
            let res = f(&mut draft, session);

            let modified = res.is_ok() && draft != *snapshot;
            if modified {
                *snapshot = draft;
            }

            outcome = Some(res);
            modified
        });

        outcome.unwrap_or_else(|| unreachable!("state update was not applied"))
    }

    /// Completes a resuming command, according to the control mode.
    ///
    /// Right after a resuming command, the process is running: it leaves that
    /// state on the next stop, or once no thread is left running.
    async fn complete(&self) -> Result<ProcessSnapshot, S::Error> {
        match self.mode {
            ControlMode::Synchronous => {
                self.wait_until(|s| s.state() != ProcessState::Running, None)
                    .await
            }
            ControlMode::Asynchronous => Ok(self.get_state()),
        }
    }

    async fn wait_until(
        &self,
        predicate: impl FnMut(&ProcessSnapshot) -> bool,
        timeout: Option<Duration>,
    ) -> Result<ProcessSnapshot, S::Error> {
        let mut rx = self.state.subscribe();

        let wait = async {
            rx.wait_for(predicate)
                .await
                .map(|snapshot| (*snapshot).clone())
                .map_err(|_| Error::EventChannelClosed)
        };

        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| Error::Timeout(timeout))?,
            None => wait.await,
        }
    }
}

impl<S: ExecutionSession> Drop for Process<S> {
    fn drop(&mut self) {
        if !self.is_exited() {
            if let Err(e) = self.session.kill() {
                tracing::warn!(error = %e, "failed to kill the process");
            }
        }

        self.pump.abort();
    }
}

/// Returns the addresses of a breakpoint which no other enabled breakpoint
/// relies on.
fn exclusive_addrs(registry: &BreakpointRegistry, bp: &Breakpoint) -> Vec<u64> {
    bp.locations()
        .iter()
        .map(|loc| loc.addr)
        .filter(|&addr| !registry.is_addr_shared(addr, bp.id()))
        .collect()
}

/// Installs every address in the session, or none of them.
fn install<S: ExecutionSession>(session: &mut S, addrs: &[u64]) -> Result<(), S::Error> {
    for (i, &addr) in addrs.iter().enumerate() {
        if let Err(e) = session.add_breakpoint(addr) {
            for &installed in &addrs[..i] {
                if let Err(e) = session.remove_breakpoint(installed) {
                    tracing::warn!(addr = installed, error = %e, "failed to roll back breakpoint");
                }
            }

            return Err(TargetError(e).into());
        }
    }

    Ok(())
}

/// Uninstalls every address from the session, or none of them.
fn uninstall<S: ExecutionSession>(session: &mut S, addrs: &[u64]) -> Result<(), S::Error> {
    for (i, &addr) in addrs.iter().enumerate() {
        if let Err(e) = session.remove_breakpoint(addr) {
            for &removed in &addrs[..i] {
                if let Err(e) = session.add_breakpoint(removed) {
                    tracing::warn!(addr = removed, error = %e, "failed to roll back breakpoint");
                }
            }

            return Err(TargetError(e).into());
        }
    }

    Ok(())
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use test_log::test;
    use tokio::sync::mpsc;

    use super::{Process, ProcessState, lock};
    use crate::breakpoint::BreakpointRegistry;
    use crate::error::Error;
    use crate::event::ControlMode;
    use crate::primitive::{
        ExecutionSession, HaltedThread, LineTable, ResumeRequest, SourceLine, Spawned, StopCause,
        TargetEvent,
    };
    use crate::thread::StopReason;

    const TID: u64 = 7;

    #[derive(thiserror::Error, Debug)]
    #[error("session failure")]
    struct FakeError;

    #[derive(Debug)]
    struct FakeTarget {
        installed: BTreeSet<u64>,

        /// Addresses the session fails to patch.
        broken: BTreeSet<u64>,

        interrupts: bool,
    }

    struct FakeSession(Arc<Mutex<FakeTarget>>);

    impl ExecutionSession for FakeSession {
        type Error = FakeError;

        fn process_id(&self) -> u64 {
            42
        }

        fn add_breakpoint(&mut self, addr: u64) -> Result<(), FakeError> {
            let mut target = lock(&self.0);

            if target.broken.contains(&addr) {
                return Err(FakeError);
            }

            target.installed.insert(addr);
            Ok(())
        }

        fn remove_breakpoint(&mut self, addr: u64) -> Result<(), FakeError> {
            let mut target = lock(&self.0);

            if target.broken.contains(&addr) {
                return Err(FakeError);
            }

            target.installed.remove(&addr);
            Ok(())
        }

        fn resume(&mut self, _threads: &[ResumeRequest]) -> Result<(), FakeError> {
            Ok(())
        }

        fn single_step(&mut self, _request: ResumeRequest) -> Result<(), FakeError> {
            Ok(())
        }

        fn interrupt(&mut self) -> Result<bool, FakeError> {
            Ok(lock(&self.0).interrupts)
        }

        fn evaluate(&mut self, _expr: &str) -> Result<i64, FakeError> {
            Ok(0)
        }

        fn kill(&mut self) -> Result<(), FakeError> {
            Ok(())
        }
    }

    /// Lines 10 and 11 share the same address.
    struct FakeLineTable;

    impl LineTable for FakeLineTable {
        fn resolve_line(&self, file: &str, line: u32) -> Vec<u64> {
            match (file, line) {
                ("main.c", 10 | 11) => vec![0x1000],
                ("main.c", 20) => vec![0x1010, 0x1020],
                _ => Vec::new(),
            }
        }

        fn source_line(&self, _addr: u64) -> Option<SourceLine> {
            None
        }
    }

    fn start(
        mode: ControlMode,
    ) -> (
        Process<FakeSession>,
        Arc<Mutex<FakeTarget>>,
        mpsc::UnboundedSender<TargetEvent>,
    ) {
        let target = Arc::new(Mutex::new(FakeTarget {
            installed: BTreeSet::new(),
            broken: BTreeSet::new(),
            interrupts: true,
        }));

        let (events, rx) = mpsc::unbounded_channel();

        let spawned = Spawned {
            session: FakeSession(target.clone()),
            events: rx,
            threads: vec![HaltedThread { id: TID, pc: 0x0ff0 }],
        };

        let process = Process::start(
            spawned,
            PathBuf::from("fake"),
            Arc::new(Mutex::new(BreakpointRegistry::new())),
            Arc::new(FakeLineTable),
            mode,
        )
        .expect("start process");

        (process, target, events)
    }

    #[test(tokio::test)]
    async fn failed_install_drops_breakpoint() {
        let (mut process, target, _events) = start(ControlMode::Synchronous);

        let bp = process.set_breakpoint("main.c", 10).expect("set breakpoint");
        lock(&target).broken.insert(0x1020);

        assert!(matches!(
            process.set_breakpoint("main.c", 20),
            Err(Error::Target(_))
        ));

        // the first address was rolled back
        let breakpoints = process.list_breakpoints();
        assert_eq!(breakpoints.len(), 1);
        assert_eq!(breakpoints[0].id(), bp.id());
        assert_eq!(lock(&target).installed, BTreeSet::from([0x1000]));
    }

    #[test(tokio::test)]
    async fn failed_uninstall_keeps_breakpoint() {
        let (mut process, target, _events) = start(ControlMode::Synchronous);

        let bp = process.set_breakpoint("main.c", 20).expect("set breakpoint");
        lock(&target).broken.insert(0x1020);

        assert!(matches!(
            process.remove_breakpoint(bp.id()),
            Err(Error::Target(_))
        ));
        assert!(matches!(
            process.set_breakpoint_enabled(bp.id(), false),
            Err(Error::Target(_))
        ));

        let breakpoints = process.list_breakpoints();
        assert_eq!(breakpoints.len(), 1);
        assert!(breakpoints[0].is_enabled());
        assert_eq!(lock(&target).installed, BTreeSet::from([0x1010, 0x1020]));

        lock(&target).broken.clear();
        process
            .set_breakpoint_enabled(bp.id(), false)
            .expect("disable breakpoint");
        assert!(lock(&target).installed.is_empty());

        // a disabled breakpoint has nothing left to uninstall
        lock(&target).broken.extend([0x1010, 0x1020]);
        process.remove_breakpoint(bp.id()).expect("remove breakpoint");
        assert!(process.list_breakpoints().is_empty());
    }

    #[test(tokio::test)]
    async fn shared_address_stays_installed() {
        let (mut process, target, _events) = start(ControlMode::Synchronous);

        let first = process.set_breakpoint("main.c", 10).expect("set breakpoint");
        let second = process.set_breakpoint("main.c", 11).expect("set breakpoint");

        process
            .set_breakpoint_enabled(first.id(), false)
            .expect("disable breakpoint");
        assert_eq!(lock(&target).installed, BTreeSet::from([0x1000]));

        process.remove_breakpoint(second.id()).expect("remove breakpoint");
        assert!(lock(&target).installed.is_empty());

        process
            .set_breakpoint_enabled(first.id(), true)
            .expect("enable breakpoint");
        assert_eq!(lock(&target).installed, BTreeSet::from([0x1000]));
    }

    #[test(tokio::test)]
    async fn interrupt_while_stop_pending() {
        let (mut process, target, events) = start(ControlMode::Asynchronous);

        let bp = process.set_breakpoint("main.c", 10).expect("set breakpoint");
        process.continue_().await.expect("continue");

        // every thread is already halted, the stop event is on its way
        lock(&target).interrupts = false;
        let state = process.interrupt().await.expect("interrupt");
        assert_eq!(state.state(), ProcessState::Running);

        events
            .send(TargetEvent::Stopped {
                thread_id: TID,
                cause: StopCause::Breakpoint,
                threads: vec![HaltedThread {
                    id: TID,
                    pc: 0x1000,
                }],
            })
            .expect("send stop event");

        let state = process
            .wait_for_stop(Duration::from_secs(5))
            .await
            .expect("wait for stop");
        let thread = state.selected_thread().expect("selected thread");
        assert_eq!(
            thread.stop_reason(),
            &StopReason::Breakpoint {
                id: bp.id(),
                location: 1,
            }
        );

        assert!(matches!(
            process.interrupt().await,
            Err(Error::InvalidState {
                operation: "interrupt",
                state: ProcessState::Stopped,
            })
        ));
    }

    #[test(tokio::test)]
    async fn interrupt_waits_for_pending_stop() {
        let (mut process, target, events) = start(ControlMode::Synchronous);

        process.set_mode(ControlMode::Asynchronous);
        process.continue_().await.expect("continue");
        process.set_mode(ControlMode::Synchronous);

        lock(&target).interrupts = false;

        let stop = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;

            events
                .send(TargetEvent::Stopped {
                    thread_id: TID,
                    cause: StopCause::Trace,
                    threads: vec![HaltedThread {
                        id: TID,
                        pc: 0x0ff4,
                    }],
                })
                .expect("send stop event");

            events
        });

        let state = process.interrupt().await.expect("interrupt");
        assert_eq!(state.state(), ProcessState::Stopped);
        assert_eq!(
            state.selected_thread().expect("selected thread").stop_reason(),
            &StopReason::Trace
        );

        let _events = stop.await.expect("stop task");
    }
}
