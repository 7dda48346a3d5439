//! Crate implementing the CLI commands.

mod cli;
mod command;
mod config;
mod lines;
mod run;

pub use self::cli::{CliAction, CliOpts};
pub use self::command::{Command, CommandError};
pub use self::config::{BreakpointConfig, RunConfig};
pub use self::lines::evaluate_lines;
pub use self::run::{Shell, ShellError, evaluate_run};
