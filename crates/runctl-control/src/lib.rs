//! This crate implements the run-control subsystem of a debugger: the
//! component tracking and transitioning the execution state of an inferior
//! process and its threads.
//!
//! Three main components are provided:
//! - A thread/process state machine, updated from the stop and exit events
//!   raised by the execution primitive.
//! - A breakpoint registry, resolving source lines into breakpoint locations.
//! - Synchronous and asynchronous control modes, deciding whether control
//!   commands wait for the next stop or return right away.
//!
//! # Driving an inferior
//!
//! ```no_run
//! use runctl_control::{ControlMode, Debugger, ProcessState};
//! use runctl_emulator::Emulator;
//!
//! #[tokio::main]
//! async fn main() {
//!     // the runtime context is owned by the caller
//!     let mut debugger = Debugger::new(Emulator::default());
//!
//!     let mut target = debugger.create_target("a.kdl").await.unwrap();
//!     let bp = target.set_breakpoint("main.c", 8).unwrap();
//!     target.expect_locations(bp.id(), 1).unwrap();
//!
//!     // the process starts stopped at its entry point
//!     let mut process = debugger.launch(&mut target).await.unwrap();
//!
//!     // synchronous mode: returns once the breakpoint is hit
//!     let state = process.continue_().await.unwrap();
//!     assert_eq!(state.state(), ProcessState::Stopped);
//!
//!     // asynchronous mode: returns right away
//!     process.set_mode(ControlMode::Asynchronous);
//!     process.continue_().await.unwrap();
//!     process.interrupt().await.unwrap();
//! }
//! ```
//!
//! # Implementing a custom primitive
//!
//! The [Platform](self::primitive::Platform)/[ExecutionSession](self::primitive::ExecutionSession)
//! traits abstract the mechanism actually executing the inferior (e.g.,
//! `ptrace`, an emulator, a remote stub). The default primitive provided by
//! `runctl-emulator` runs emulated program images on the tokio runtime.

/// Module containing traits for implementing an execution primitive.
pub mod primitive;

mod breakpoint;
mod debugger;
mod error;
mod event;
mod thread;

/// Module rendering run-control state for front ends.
pub mod display;

/// Module implementing the process control unit.
pub mod process;

pub use self::breakpoint::{Breakpoint, BreakpointId, BreakpointRegistry, Location, LocationMismatch};
pub use self::debugger::{Debugger, Target};
pub use self::error::{Error, Result, TargetError};
pub use self::event::{ControlMode, ParseControlModeError, ProcessEvent};
pub use self::process::{Process, ProcessSnapshot, ProcessState};
pub use self::thread::{ExecutionState, StopReason, Thread};
