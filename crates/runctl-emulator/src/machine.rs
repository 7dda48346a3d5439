use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use nix::sys::signal::Signal;
use runctl_control::primitive::{
    ExitStatus, HaltedThread, ResumeRequest, StopCause, TargetEvent,
};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::expr::ExprEvaluator;
use crate::image::{INSTRUCTION_SIZE, Image, Op};

/// What the machine has left to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activity {
    /// Every thread is halted.
    Idle,

    /// Some thread is runnable.
    Busy,

    /// The process has exited.
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Halted,
    Running,
    Stepping,
}

#[derive(Debug)]
struct EmulatedThread {
    pc: u64,
    mode: RunMode,

    /// Whether the breakpoint at `pc` was already reported.
    skip_trap: bool,
}

/// Emulated process, executing the instructions of an image.
///
/// Every stop is an all-stop: when a thread stops, every other thread is
/// halted before the stop is reported.
pub(crate) struct Machine {
    pid: u64,
    image: Arc<Image>,
    globals: IndexMap<String, i64>,

    /// Live threads, the main thread first.
    threads: IndexMap<u64, EmulatedThread>,
    next_tid: u64,

    breakpoints: HashSet<u64>,
    evaluator: ExprEvaluator,
    events: mpsc::UnboundedSender<TargetEvent>,
    exited: bool,
}

impl Machine {
    pub(crate) fn new(
        pid: u64,
        image: Arc<Image>,
        events: mpsc::UnboundedSender<TargetEvent>,
    ) -> Result<Self> {
        let main = EmulatedThread {
            pc: image.entry_addr(),
            mode: RunMode::Halted,
            skip_trap: false,
        };

        Ok(Self {
            pid,
            globals: image.globals().clone(),
            image,
            threads: IndexMap::from([(pid, main)]),
            next_tid: pid + 1,
            breakpoints: HashSet::new(),
            evaluator: ExprEvaluator::new()?,
            events,
            exited: false,
        })
    }

    pub(crate) fn halted_threads(&self) -> Vec<HaltedThread> {
        self.threads
            .iter()
            .map(|(&id, thread)| HaltedThread { id, pc: thread.pc })
            .collect()
    }

    /// Runs one instruction on every runnable thread.
    pub(crate) fn tick(&mut self) -> Activity {
        let runnable = self
            .threads
            .iter()
            .filter(|(_, t)| t.mode != RunMode::Halted)
            .map(|(&id, _)| id)
            .collect::<Vec<_>>();

        for tid in runnable {
            if self.exited {
                break;
            }

            // a previous thread may have stopped the whole process
            let runnable = self
                .threads
                .get(&tid)
                .is_some_and(|t| t.mode != RunMode::Halted);

            if runnable {
                self.execute(tid);
            }
        }

        self.activity()
    }

    pub(crate) fn activity(&self) -> Activity {
        if self.exited {
            Activity::Exited
        } else if self.threads.values().any(|t| t.mode != RunMode::Halted) {
            Activity::Busy
        } else {
            Activity::Idle
        }
    }

    fn execute(&mut self, tid: u64) {
        let Some(thread) = self.threads.get_mut(&tid) else {
            return;
        };

        let pc = thread.pc;

        if self.breakpoints.contains(&pc) && !std::mem::take(&mut thread.skip_trap) {
            self.stop_all(tid, StopCause::Breakpoint);
            return;
        }

        thread.skip_trap = false;
        let stepping = thread.mode == RunMode::Stepping;
        let next = pc + INSTRUCTION_SIZE;

        let Some(op) = self.image.op_at(pc).cloned() else {
            tracing::warn!(tid, pc = format_args!("{pc:#x}"), "invalid instruction address");
            self.exit(ExitStatus::Signal(Signal::SIGSEGV));
            return;
        };

        match op {
            Op::Nop => thread.pc = next,
            Op::Set(var, value) => {
                thread.pc = next;
                if let Some((_, v)) = self.globals.get_index_mut(var) {
                    *v = value;
                }
            }
            Op::Add(var, value) => {
                thread.pc = next;
                if let Some((_, v)) = self.globals.get_index_mut(var) {
                    *v = v.wrapping_add(value);
                }
            }
            Op::SpinUntil(var, value) => {
                if self.globals.get_index(var).is_some_and(|(_, v)| *v == value) {
                    thread.pc = next;
                }
            }
            Op::Raise(signal) => {
                thread.pc = next;
                self.stop_all(tid, StopCause::Signal(signal));
                return;
            }
            Op::Spawn(function) => {
                thread.pc = next;
                self.spawn_thread(tid, function);
            }
            Op::Ret if tid == self.pid => {
                self.exit(ExitStatus::ExitCode(0));
                return;
            }
            Op::Ret => {
                self.threads.shift_remove(&tid);
                self.emit(TargetEvent::ThreadExited {
                    thread_id: tid,
                    exit_code: 0,
                });
                return;
            }
            Op::Exit(code) => {
                self.exit(ExitStatus::ExitCode(code));
                return;
            }
        }

        if stepping {
            self.stop_all(tid, StopCause::Trace);
        }
    }

    fn spawn_thread(&mut self, parent_id: u64, function: usize) {
        let tid = self.next_tid;
        self.next_tid += 1;

        let pc = Image::addr_of(function, 0);

        // threads created while stepping stay halted
        let mode = match self.threads.get(&parent_id).map(|t| t.mode) {
            Some(RunMode::Running) => RunMode::Running,
            _ => RunMode::Halted,
        };

        self.threads.insert(
            tid,
            EmulatedThread {
                pc,
                mode,
                skip_trap: false,
            },
        );

        let name = self.image.function(function).map(|f| f.name.as_str());
        tracing::debug!(parent_id, tid, function = name, "thread spawned");

        self.emit(TargetEvent::ThreadCreated {
            parent_id,
            thread: HaltedThread { id: tid, pc },
        });
    }

    fn stop_all(&mut self, tid: u64, cause: StopCause) {
        for (&id, thread) in self.threads.iter_mut() {
            thread.mode = RunMode::Halted;

            if id == tid && cause == StopCause::Breakpoint {
                thread.skip_trap = true;
            }
        }

        let threads = self.halted_threads();

        self.emit(TargetEvent::Stopped {
            thread_id: tid,
            cause,
            threads,
        });
    }

    fn exit(&mut self, status: ExitStatus) {
        self.exited = true;

        for thread in self.threads.values_mut() {
            thread.mode = RunMode::Halted;
        }

        tracing::debug!(pid = self.pid, ?status, "process exited");

        self.emit(TargetEvent::Exited(status));
    }

    fn emit(&self, event: TargetEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("event dropped, no listener");
        }
    }

    fn check_halted(&self) -> Result<()> {
        if self.exited {
            return Err(Error::Exited);
        }

        if self.threads.values().any(|t| t.mode != RunMode::Halted) {
            return Err(Error::Running);
        }

        Ok(())
    }

    /// Delivers the resume signals of the given requests.
    ///
    /// Returns whether the process survived the delivery.
    fn deliver(&mut self, requests: &[ResumeRequest]) -> bool {
        for request in requests {
            let Some(signal) = request.signal else {
                continue;
            };

            if terminates(signal) {
                tracing::debug!(tid = request.thread_id, %signal, "fatal signal delivered");
                self.exit(ExitStatus::Signal(signal));
                return false;
            }

            tracing::debug!(tid = request.thread_id, %signal, "signal ignored");
        }

        true
    }

    pub(crate) fn resume(&mut self, requests: &[ResumeRequest]) -> Result<()> {
        self.check_halted()?;

        if let Some(unknown) = requests
            .iter()
            .find(|r| !self.threads.contains_key(&r.thread_id))
        {
            return Err(Error::UnknownThread(unknown.thread_id));
        }

        if !self.deliver(requests) {
            return Ok(());
        }

        for request in requests {
            if let Some(thread) = self.threads.get_mut(&request.thread_id) {
                thread.mode = RunMode::Running;
            }
        }

        Ok(())
    }

    pub(crate) fn single_step(&mut self, request: ResumeRequest) -> Result<()> {
        self.check_halted()?;

        if !self.threads.contains_key(&request.thread_id) {
            return Err(Error::UnknownThread(request.thread_id));
        }

        if !self.deliver(&[request]) {
            return Ok(());
        }

        if let Some(thread) = self.threads.get_mut(&request.thread_id) {
            thread.mode = RunMode::Stepping;
        }

        Ok(())
    }

    /// Stops every thread with a `SIGSTOP`.
    ///
    /// Returns `false` if every thread was already halted.
    pub(crate) fn interrupt(&mut self) -> Result<bool> {
        if self.exited {
            return Err(Error::Exited);
        }

        let Some(tid) = self
            .threads
            .iter()
            .find(|(_, t)| t.mode != RunMode::Halted)
            .map(|(&id, _)| id)
        else {
            return Ok(false);
        };

        self.stop_all(tid, StopCause::Signal(Signal::SIGSTOP));

        Ok(true)
    }

    pub(crate) fn evaluate(&mut self, expr: &str) -> Result<i64> {
        self.check_halted()?;
        self.evaluator.evaluate(expr, &mut self.globals)
    }

    pub(crate) fn kill(&mut self) {
        if !self.exited {
            self.exit(ExitStatus::Signal(Signal::SIGKILL));
        }
    }

    pub(crate) fn add_breakpoint(&mut self, addr: u64) -> Result<()> {
        if self.image.op_at(addr).is_none() {
            return Err(Error::InvalidAddress(addr));
        }

        self.breakpoints.insert(addr);

        Ok(())
    }

    pub(crate) fn remove_breakpoint(&mut self, addr: u64) -> Result<()> {
        if !self.breakpoints.remove(&addr) {
            return Err(Error::InvalidAddress(addr));
        }

        Ok(())
    }
}

/// Returns whether the default action of the signal terminates the process.
fn terminates(signal: Signal) -> bool {
    !matches!(
        signal,
        Signal::SIGCHLD
            | Signal::SIGCONT
            | Signal::SIGURG
            | Signal::SIGWINCH
            | Signal::SIGSTOP
            | Signal::SIGTSTP
            | Signal::SIGTTIN
            | Signal::SIGTTOU
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use indoc::indoc;
    use nix::sys::signal::Signal;
    use runctl_control::primitive::{
        ExitStatus, HaltedThread, ResumeRequest, StopCause, TargetEvent,
    };
    use tokio::sync::mpsc;

    use super::{Activity, Machine};
    use crate::Error;
    use crate::image::Image;

    const PROGRAM: &str = indoc! {r#"
        global "g_test" 0
        function "main" file="main.c" {
            nop line=5
            nop line=7
            spin-until "g_test" 1 line=9
            nop line=11
            exit 3 line=13
        }
    "#};

    fn machine(program: &str) -> (Machine, mpsc::UnboundedReceiver<TargetEvent>) {
        let image = Arc::new(Image::parse("<content>", program).expect("valid image"));
        let (tx, rx) = mpsc::unbounded_channel();
        (Machine::new(100, image, tx).expect("machine"), rx)
    }

    fn resume_all(machine: &mut Machine) {
        let requests = machine
            .halted_threads()
            .iter()
            .map(|t| ResumeRequest {
                thread_id: t.id,
                signal: None,
            })
            .collect::<Vec<_>>();
        machine.resume(&requests).expect("resume");
    }

    fn run_until_idle(machine: &mut Machine) -> Activity {
        for _ in 0..1000 {
            match machine.tick() {
                Activity::Busy => (),
                activity => return activity,
            }
        }
        Activity::Busy
    }

    #[test]
    fn breakpoint_is_reported_once() {
        let (mut machine, mut events) = machine(PROGRAM);

        machine.add_breakpoint(0x1004).expect("add breakpoint");
        resume_all(&mut machine);
        assert_eq!(run_until_idle(&mut machine), Activity::Idle);

        assert_eq!(
            events.try_recv().expect("pending event"),
            TargetEvent::Stopped {
                thread_id: 100,
                cause: StopCause::Breakpoint,
                threads: vec![HaltedThread {
                    id: 100,
                    pc: 0x1004
                }],
            }
        );

        // resuming steps over the reported breakpoint, then spins
        resume_all(&mut machine);
        assert_eq!(machine.tick(), Activity::Busy);
        assert_eq!(machine.tick(), Activity::Busy);
        assert!(events.try_recv().is_err());
        assert_eq!(machine.halted_threads()[0].pc, 0x1008);
    }

    #[test]
    fn spin_until_and_exit() {
        let (mut machine, mut events) = machine(PROGRAM);

        resume_all(&mut machine);
        for _ in 0..10 {
            machine.tick();
        }
        assert_eq!(machine.halted_threads()[0].pc, 0x1008);
        assert!(matches!(machine.evaluate("g_test = 1"), Err(Error::Running)));

        assert!(machine.interrupt().expect("interrupt"));
        assert!(matches!(
            events.try_recv().expect("pending event"),
            TargetEvent::Stopped {
                cause: StopCause::Signal(Signal::SIGSTOP),
                ..
            }
        ));
        assert!(!machine.interrupt().expect("interrupt halted process"));
        assert!(events.try_recv().is_err());

        assert_eq!(machine.evaluate("g_test = 1").expect("valid expression"), 1);

        resume_all(&mut machine);
        assert_eq!(run_until_idle(&mut machine), Activity::Exited);
        assert_eq!(
            events.try_recv().expect("pending event"),
            TargetEvent::Exited(ExitStatus::ExitCode(3))
        );
    }

    #[test]
    fn single_step() {
        let (mut machine, mut events) = machine(PROGRAM);

        machine
            .single_step(ResumeRequest {
                thread_id: 100,
                signal: None,
            })
            .expect("single-step");
        assert_eq!(machine.tick(), Activity::Idle);

        assert!(matches!(
            events.try_recv().expect("pending event"),
            TargetEvent::Stopped {
                thread_id: 100,
                cause: StopCause::Trace,
                ..
            }
        ));
        assert_eq!(machine.halted_threads()[0].pc, 0x1004);
    }

    #[test]
    fn threads_and_signals() {
        let (mut machine, mut events) = machine(indoc! {r#"
            function "main" file="main.c" {
                spawn "worker" line=3
                raise "SIGUSR1" line=4
                nop line=5
            }
            function "worker" file="main.c" {
                ret line=10
            }
        "#});

        resume_all(&mut machine);
        assert_eq!(run_until_idle(&mut machine), Activity::Idle);

        assert_eq!(
            events.try_recv().expect("pending event"),
            TargetEvent::ThreadCreated {
                parent_id: 100,
                thread: HaltedThread {
                    id: 101,
                    pc: 0x1100
                },
            }
        );
        assert!(matches!(
            events.try_recv().expect("pending event"),
            TargetEvent::Stopped {
                thread_id: 100,
                cause: StopCause::Signal(Signal::SIGUSR1),
                ..
            }
        ));

        // the raised signal is fatal once delivered
        machine
            .resume(&[
                ResumeRequest {
                    thread_id: 100,
                    signal: Some(Signal::SIGUSR1),
                },
                ResumeRequest {
                    thread_id: 101,
                    signal: None,
                },
            ])
            .expect("resume");

        assert_eq!(machine.activity(), Activity::Exited);
        assert_eq!(
            events.try_recv().expect("pending event"),
            TargetEvent::Exited(ExitStatus::Signal(Signal::SIGUSR1))
        );
        assert!(matches!(machine.resume(&[]), Err(Error::Exited)));
    }

    #[test]
    fn invalid_breakpoint_address() {
        let (mut machine, _events) = machine(PROGRAM);

        assert!(matches!(
            machine.add_breakpoint(0x1002),
            Err(Error::InvalidAddress(0x1002))
        ));
        assert!(matches!(
            machine.remove_breakpoint(0x1004),
            Err(Error::InvalidAddress(0x1004))
        ));
    }
}
