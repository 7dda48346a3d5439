use std::str::FromStr;
use std::time::Duration;

use runctl_control::{BreakpointId, ControlMode};

/// Error returned when parsing a script command.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    /// The command is unknown.
    #[error("unknown command `{0}`")]
    Unknown(String),

    /// A mandatory argument is missing.
    #[error("`{command}` expects {expected}")]
    MissingArgument {
        /// Name of the command.
        command: &'static str,

        /// Description of the missing argument.
        expected: &'static str,
    },

    /// An argument could not be parsed.
    #[error("invalid argument `{arg}` for `{command}` (expected {expected})")]
    InvalidArgument {
        /// Name of the command.
        command: &'static str,

        /// The invalid argument.
        arg: String,

        /// Description of the expected argument.
        expected: &'static str,
    },

    /// The command was given too many arguments.
    #[error("unexpected argument `{arg}` for `{command}`")]
    UnexpectedArgument {
        /// Name of the command.
        command: String,

        /// The first unexpected argument.
        arg: String,
    },
}

/// Command of a debugging script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Sets a breakpoint on a source line.
    Break {
        /// Source file.
        file: String,

        /// Source line.
        line: u32,

        /// Expected number of resolved locations.
        locations: Option<usize>,
    },

    /// Lists the breakpoints.
    BreakpointList,

    /// Deletes a breakpoint.
    BreakpointDelete(BreakpointId),

    /// Enables or disables a breakpoint.
    BreakpointEnable(BreakpointId, bool),

    /// Launches the process and runs it.
    Run,

    /// Resumes the process.
    Continue,

    /// Single-steps a thread (the selected one by default).
    Step(Option<u32>),

    /// Interrupts the running process.
    ProcessInterrupt,

    /// Prints the process status.
    ProcessStatus,

    /// Kills the process.
    ProcessKill,

    /// Lists the threads of the process.
    ThreadList,

    /// Suspends a thread.
    ThreadSuspend(u32),

    /// Resumes a suspended thread.
    ThreadResume(u32),

    /// Evaluates an expression in the stopped process.
    Expression(String),

    /// Sets the control mode.
    Mode(ControlMode),

    /// Waits for the process to stop (the configured timeout by default).
    Wait(Option<Duration>),
}

impl Command {
    /// Parses a script line.
    ///
    /// Returns `None` for blank lines and `#` comments.
    pub fn parse_line(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        line.parse().map(Some)
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        // the expression is kept verbatim
        let (head, rest) = s.split_once(char::is_whitespace).unwrap_or((s, ""));
        if matches!(head, "expression" | "expr" | "p") {
            let expr = rest.trim();

            if expr.is_empty() {
                return Err(CommandError::MissingArgument {
                    command: "expression",
                    expected: "an expression",
                });
            }

            return Ok(Self::Expression(expr.to_owned()));
        }

        let mut args = Args(rest.split_whitespace());

        let command = match head {
            "break" | "b" => {
                let location = args.next("break", "FILE:LINE")?;

                let (file, line) = location
                    .rsplit_once(':')
                    .and_then(|(file, line)| Some((file, line.parse().ok()?)))
                    .filter(|(file, _)| !file.is_empty())
                    .ok_or_else(|| CommandError::InvalidArgument {
                        command: "break",
                        arg: location.to_owned(),
                        expected: "FILE:LINE",
                    })?;

                let locations = args
                    .optional()
                    .map(|arg| {
                        arg.strip_prefix("locations=")
                            .and_then(|n| n.parse().ok())
                            .ok_or_else(|| CommandError::InvalidArgument {
                                command: "break",
                                arg: arg.to_owned(),
                                expected: "locations=N",
                            })
                    })
                    .transpose()?;

                Self::Break {
                    file: file.to_owned(),
                    line,
                    locations,
                }
            }
            "breakpoint" => match args.next("breakpoint", "a subcommand")? {
                "list" => Self::BreakpointList,
                "delete" => Self::BreakpointDelete(BreakpointId(args.parse("breakpoint delete", "ID")?)),
                "enable" => {
                    Self::BreakpointEnable(BreakpointId(args.parse("breakpoint enable", "ID")?), true)
                }
                "disable" => {
                    Self::BreakpointEnable(BreakpointId(args.parse("breakpoint disable", "ID")?), false)
                }
                sub => return Err(CommandError::Unknown(format!("breakpoint {sub}"))),
            },
            "run" | "r" => Self::Run,
            "continue" | "c" => Self::Continue,
            "step" | "s" => Self::Step(args.parse_optional("step", "THREAD")?),
            "process" => match args.next("process", "a subcommand")? {
                "interrupt" => Self::ProcessInterrupt,
                "status" => Self::ProcessStatus,
                "kill" => Self::ProcessKill,
                sub => return Err(CommandError::Unknown(format!("process {sub}"))),
            },
            "thread" => match args.next("thread", "a subcommand")? {
                "list" => Self::ThreadList,
                "suspend" => Self::ThreadSuspend(args.parse("thread suspend", "THREAD")?),
                "resume" => Self::ThreadResume(args.parse("thread resume", "THREAD")?),
                sub => return Err(CommandError::Unknown(format!("thread {sub}"))),
            },
            "mode" => {
                let arg = args.next("mode", "`sync` or `async`")?;

                Self::Mode(arg.parse().map_err(|_| CommandError::InvalidArgument {
                    command: "mode",
                    arg: arg.to_owned(),
                    expected: "`sync` or `async`",
                })?)
            }
            "wait" => Self::Wait(
                args.parse_optional("wait", "MS")?
                    .map(Duration::from_millis),
            ),
            command => return Err(CommandError::Unknown(command.to_owned())),
        };

        args.finish(head)?;

        Ok(command)
    }
}

struct Args<'a>(std::str::SplitWhitespace<'a>);

impl<'a> Args<'a> {
    fn next(&mut self, command: &'static str, expected: &'static str) -> Result<&'a str, CommandError> {
        self.0
            .next()
            .ok_or(CommandError::MissingArgument { command, expected })
    }

    fn optional(&mut self) -> Option<&'a str> {
        self.0.next()
    }

    fn parse<T: FromStr>(&mut self, command: &'static str, expected: &'static str) -> Result<T, CommandError> {
        let arg = self.next(command, expected)?;
        parse_arg(arg, command, expected)
    }

    fn parse_optional<T: FromStr>(
        &mut self,
        command: &'static str,
        expected: &'static str,
    ) -> Result<Option<T>, CommandError> {
        self.optional()
            .map(|arg| parse_arg(arg, command, expected))
            .transpose()
    }

    fn finish(mut self, command: &str) -> Result<(), CommandError> {
        match self.0.next() {
            None => Ok(()),
            Some(arg) => Err(CommandError::UnexpectedArgument {
                command: command.to_owned(),
                arg: arg.to_owned(),
            }),
        }
    }
}

fn parse_arg<T: FromStr>(arg: &str, command: &'static str, expected: &'static str) -> Result<T, CommandError> {
    arg.parse().map_err(|_| CommandError::InvalidArgument {
        command,
        arg: arg.to_owned(),
        expected,
    })
}
