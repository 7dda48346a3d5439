use std::path::PathBuf;

/// Error type of this crate.
#[derive(thiserror::Error, miette::Diagnostic, Debug)]
pub enum Error {
    /// File read error.
    #[error("{0}: {1}")]
    File(PathBuf, std::io::Error),

    /// Malformed image document.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] knus::Error),

    /// Error from the [regex] crate.
    #[error(transparent)]
    Regex(#[from] regex::Error),

    /// The image has no entry function.
    #[error("image has no `main` function")]
    MissingEntry,

    /// Two functions share the same name.
    #[error("function `{0}` is defined twice")]
    DuplicateFunction(String),

    /// Two globals share the same name.
    #[error("global `{0}` is defined twice")]
    DuplicateGlobal(String),

    /// An instruction refers to an undefined global (function, global).
    #[error("function `{0}` uses unknown global `{1}`")]
    UnknownGlobal(String, String),

    /// A `spawn` instruction refers to an undefined function (function,
    /// spawned function).
    #[error("function `{0}` spawns unknown function `{1}`")]
    UnknownFunction(String, String),

    /// A `raise` instruction refers to an unknown signal (function, signal).
    #[error("function `{0}` raises unknown signal `{1}`")]
    UnknownSignal(String, String),

    /// A function does not fit in its address range.
    #[error("function `{0}` has more than {max} instructions", max = crate::image::MAX_INSTRUCTIONS)]
    FunctionTooLarge(String),

    /// The process has exited.
    #[error("process has exited")]
    Exited,

    /// The command requires every thread to be halted.
    #[error("process is running")]
    Running,

    /// No thread with this ID.
    #[error("no thread with ID {0}")]
    UnknownThread(u64),

    /// The address is not the address of an instruction.
    #[error("no instruction at {0:#x}")]
    InvalidAddress(u64),

    /// The expression is neither an assignment nor a variable read.
    #[error("invalid expression `{0}`")]
    InvalidExpression(String),

    /// The expression refers to an undefined global.
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
