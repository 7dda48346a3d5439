use std::ffi::OsStr;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::IntoDiagnostic;
use runctl_control::display::{BreakpointList, ProcessStatus, ThreadList};
use runctl_control::primitive::ExitStatus;
use runctl_control::{Breakpoint, Debugger, Process, ProcessSnapshot, ProcessState, Target};
use runctl_emulator::{Emulator, Session};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::command::{Command, CommandError};
use crate::config::RunConfig;

type ControlError = runctl_control::Error<runctl_emulator::Error>;

/// Error of a script command.
#[derive(thiserror::Error, Debug)]
pub enum ShellError {
    /// The command could not be parsed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The command was rejected by the debugger.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// The command needs a launched process.
    #[error("no process to {0}, use `run` first")]
    NoProcess(&'static str),

    /// A process is already alive.
    #[error("process {0} is already launched")]
    AlreadyLaunched(u64),

    /// The output could not be written.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Runs the subcommand for driving a program image with a command script.
pub fn evaluate_run(
    config: Option<String>,
    script: Option<PathBuf>,
    image: PathBuf,
) -> miette::Result<i32> {
    let config = config
        .map(parse_run_config)
        .transpose()?
        .unwrap_or_default();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .into_diagnostic()?;

    runtime.block_on(async move {
        let mut shell = Shell::new(&config, &image, io::stdout())
            .await
            .into_diagnostic()?;

        let res = if let Some(script) = script {
            let script = tokio::fs::File::open(script).await.into_diagnostic()?;
            shell.run_script(BufReader::new(script)).await
        } else {
            shell.run_script(BufReader::new(tokio::io::stdin())).await
        };
        res.into_diagnostic()?;

        Ok(shell.exit_code())
    })
}

fn parse_run_config(config: String) -> miette::Result<RunConfig> {
    let path = Path::new(&config);

    let config = if let Some((filename, "kdl")) = path
        .file_name()
        .and_then(OsStr::to_str)
        .zip(path.extension().and_then(OsStr::to_str))
    {
        let content = std::fs::read_to_string(path).into_diagnostic()?;
        knus::parse(filename, &content)?
    } else {
        knus::parse("<content>", &config)?
    };

    Ok(config)
}

/// Interpreter of debugging scripts, driving a single target.
pub struct Shell<W> {
    debugger: Debugger<Emulator>,
    target: Target<Emulator>,
    process: Option<Process<Session>>,
    wait_timeout: Duration,

    /// Number of evaluated expressions.
    results: u32,

    out: W,
}

impl<W: Write> Shell<W> {
    /// Loads the program image, and sets the configured breakpoints.
    pub async fn new(config: &RunConfig, image: &Path, out: W) -> Result<Self, ControlError> {
        let mut debugger = Debugger::new(Emulator::new(config.tick()));
        debugger.set_mode(config.mode);

        let mut target = debugger.create_target(image).await?;

        for bp in &config.breakpoints {
            let id = target.set_breakpoint(&bp.file, bp.line)?.id();

            if let Some(expected) = bp.locations {
                target.expect_locations(id, expected)?;
            }
        }

        Ok(Self {
            debugger,
            target,
            process: None,
            wait_timeout: config.wait_timeout(),
            results: 0,
            out,
        })
    }

    /// Executes every command of a script.
    ///
    /// Failed commands are reported in the output, and do not stop the
    /// script.
    pub async fn run_script(&mut self, script: impl AsyncBufRead + Unpin) -> io::Result<()> {
        let mut lines = script.lines();

        while let Some(line) = lines.next_line().await? {
            self.execute_line(&line).await?;
        }

        Ok(())
    }

    /// Executes a single script line.
    pub async fn execute_line(&mut self, line: &str) -> io::Result<()> {
        let res = match Command::parse_line(line) {
            Ok(Some(command)) => self.execute(command).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e.into()),
        };

        self.drain_events();

        match res {
            Ok(()) => Ok(()),
            Err(ShellError::Io(e)) => Err(e),
            Err(e) => {
                tracing::debug!(line, error = %e, "command failed");
                writeln!(self.out, "error: {e}")
            }
        }
    }

    /// Returns the exit code of the last launched process.
    ///
    /// A process killed by a signal reports `128 + signal`, a process still
    /// alive reports 0.
    pub fn exit_code(&self) -> i32 {
        let status = self
            .process
            .as_ref()
            .and_then(|process| process.get_state().exit_status());

        match status {
            Some(ExitStatus::ExitCode(code)) => code,
            Some(ExitStatus::Signal(signal)) => 128 + signal as i32,
            None => 0,
        }
    }

    /// Returns the output.
    pub fn output(&self) -> &W {
        &self.out
    }

    #[tracing::instrument(name = "Command", skip(self))]
    async fn execute(&mut self, command: Command) -> Result<(), ShellError> {
        match command {
            Command::Break {
                file,
                line,
                locations,
            } => {
                let bp = match self.live_process() {
                    Some(process) => process.set_breakpoint(&file, line)?,
                    None => self.target.set_breakpoint(&file, line)?,
                };
                self.write_breakpoint(&bp)?;

                if let Some(expected) = locations {
                    self.target.expect_locations(bp.id(), expected)?;
                }
            }
            Command::BreakpointList => {
                // the target shares its breakpoints with its processes
                let bps = self.target.list_breakpoints();
                write!(self.out, "{}", BreakpointList(&bps))?;
            }
            Command::BreakpointDelete(id) => {
                let bp = match self.live_process() {
                    Some(process) => process.remove_breakpoint(id)?,
                    None => self.target.remove_breakpoint(id)?,
                };
                writeln!(self.out, "Breakpoint {} deleted", bp.id())?;
            }
            Command::BreakpointEnable(id, enabled) => {
                match self.live_process() {
                    Some(process) => process.set_breakpoint_enabled(id, enabled)?,
                    None => self.target.set_breakpoint_enabled(id, enabled)?,
                }

                let action = if enabled { "enabled" } else { "disabled" };
                writeln!(self.out, "Breakpoint {id} {action}")?;
            }
            Command::Run => {
                if let Some(process) = self.live_process() {
                    return Err(ShellError::AlreadyLaunched(process.pid()));
                }

                let process = self.debugger.launch(&mut self.target).await?;
                writeln!(
                    self.out,
                    "Process {} launched: '{}'",
                    process.pid(),
                    self.target.path().display()
                )?;

                let process = self.process.insert(process);
                let state = process.continue_().await?;
                self.write_resumed(&state)?;
            }
            Command::Continue => {
                let state = self.process("continue")?.continue_().await?;
                self.write_resumed(&state)?;
            }
            Command::Step(thread) => {
                let process = self.process("step")?;

                let thread = thread
                    .or_else(|| process.get_state().selected_thread().map(|t| t.index()))
                    .unwrap_or(1);

                let state = process.step(thread).await?;
                self.write_resumed(&state)?;
            }
            Command::ProcessInterrupt => {
                let state = self.process("interrupt")?.interrupt().await?;
                self.write_completion(&state)?;
            }
            Command::ProcessStatus => {
                let state = self.process("report")?.get_state();
                write!(self.out, "{}", ProcessStatus(&state))?;
            }
            Command::ProcessKill => {
                let state = self.process("kill")?.kill().await?;
                write!(self.out, "{}", ProcessStatus(&state))?;
            }
            Command::ThreadList => {
                let state = self.process("list threads of")?.get_state();
                write!(self.out, "{}", ThreadList(&state))?;
            }
            Command::ThreadSuspend(thread) => self.process("suspend threads of")?.suspend_thread(thread)?,
            Command::ThreadResume(thread) => self.process("resume threads of")?.resume_thread(thread)?,
            Command::Expression(expr) => {
                let value = self.process("evaluate in")?.evaluate_expression(&expr)?;

                writeln!(self.out, "(i64) ${} = {value}", self.results)?;
                self.results += 1;
            }
            Command::Mode(mode) => {
                self.debugger.set_mode(mode);

                if let Some(process) = self.process.as_mut() {
                    process.set_mode(mode);
                }

                writeln!(self.out, "Control mode: {mode}")?;
            }
            Command::Wait(timeout) => {
                let timeout = timeout.unwrap_or(self.wait_timeout);

                let state = self.process("wait for")?.wait_for_stop(timeout).await?;
                write!(self.out, "{}", ProcessStatus(&state))?;
            }
        }

        Ok(())
    }

    fn process(&mut self, operation: &'static str) -> Result<&mut Process<Session>, ShellError> {
        self.process.as_mut().ok_or(ShellError::NoProcess(operation))
    }

    fn live_process(&mut self) -> Option<&mut Process<Session>> {
        self.process
            .as_mut()
            .filter(|process| process.get_state().state() != ProcessState::Exited)
    }

    fn drain_events(&mut self) {
        let Some(process) = self.process.as_mut() else {
            return;
        };

        while let Some(event) = process.try_next_event() {
            tracing::debug!(?event, "process event");
        }
    }

    fn write_breakpoint(&mut self, bp: &Breakpoint) -> io::Result<()> {
        write!(self.out, "Breakpoint {}", BreakpointList(std::slice::from_ref(bp)))
    }

    fn write_resumed(&mut self, state: &ProcessSnapshot) -> io::Result<()> {
        writeln!(self.out, "Process {} resuming", state.pid())?;
        self.write_completion(state)
    }

    /// Reports the outcome of a control command, once it has completed.
    fn write_completion(&mut self, state: &ProcessSnapshot) -> io::Result<()> {
        if state.state() == ProcessState::Running {
            return Ok(());
        }

        write!(self.out, "{}", ProcessStatus(state))
    }
}
