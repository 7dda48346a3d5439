use std::fmt;

/// Trait providing the line table of a loaded executable.
pub trait LineTable {
    /// Returns the addresses the given source line maps to.
    ///
    /// The result must be deterministic for a given executable, and ordered
    /// by address.
    fn resolve_line(&self, file: &str, line: u32) -> Vec<u64>;

    /// Returns the source line the given address belongs to.
    fn source_line(&self, addr: u64) -> Option<SourceLine>;
}

/// Source file and line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLine {
    /// Source file name.
    pub file: String,

    /// Line number (1-based).
    pub line: u32,
}

impl fmt::Display for SourceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}
