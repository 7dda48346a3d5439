//! This crate provides an emulated execution primitive (to be used with
//! `runctl-control`).
//!
//! Program images are KDL documents made of globals and functions, each
//! instruction being tagged with its source line:
//!
//! ```kdl
//! global "g_test" 0
//!
//! function "main" file="main.c" {
//!     nop line=5
//!     spin-until "g_test" 1 line=9
//!     spawn "worker" line=10
//!     exit 0 line=13
//! }
//!
//! function "worker" file="main.c" {
//!     raise "SIGUSR1" line=20
//!     ret line=21
//! }
//! ```
//!
//! Supported instructions are `nop`, `set NAME VALUE`, `add NAME VALUE`,
//! `spin-until NAME VALUE`, `raise SIGNAL`, `spawn FUNCTION`, `ret` and
//! `exit CODE`. Returning from `main` (or running past its last instruction)
//! exits the process with code 0.
//!
//! Spawned processes run on the tokio runtime, and report their stops and
//! exits the way a `ptrace`-based monitor would.
//!
//! <div class="warning">
//!
//! *This crate is not meant to be used on its own! It merely implements the
//! interface (traits) provided by `runctl-control`.*
//!
//! </div>

mod error;
mod expr;
mod machine;
mod platform;
mod session;

/// Module implementing the emulated program images.
pub mod image;

pub use self::error::{Error, Result};
pub use self::image::Image;
pub use self::platform::{DEFAULT_TICK, Emulator};
pub use self::session::Session;
