use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use nix::sys::signal::Signal;
use runctl_control::primitive::{LineTable, SourceLine};

use crate::error::{Error, Result};

/// Address of the first function of an image.
pub const FUNCTION_BASE: u64 = 0x1000;

/// Address range of a function.
pub const FUNCTION_STRIDE: u64 = 0x100;

/// Size of an instruction.
pub const INSTRUCTION_SIZE: u64 = 4;

/// Maximum number of instructions of a function.
///
/// The last slot of a function's range is kept for its implicit `ret`.
pub const MAX_INSTRUCTIONS: usize = (FUNCTION_STRIDE / INSTRUCTION_SIZE) as usize - 1;

/// Name of the entry function.
pub const ENTRY: &str = "main";

/// Image document, as written in KDL.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct ImageDocument {
    /// Global variables.
    #[knus(children(name = "global"))]
    pub globals: Vec<GlobalNode>,

    /// Functions.
    #[knus(children(name = "function"))]
    pub functions: Vec<FunctionNode>,
}

/// Global variable declaration.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct GlobalNode {
    /// Name of the variable.
    #[knus(argument)]
    pub name: String,

    /// Initial value of the variable.
    #[knus(argument)]
    pub value: i64,
}

/// Function definition.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct FunctionNode {
    /// Name of the function.
    #[knus(argument)]
    pub name: String,

    /// Source file of the function.
    #[knus(property)]
    pub file: String,

    /// Instructions of the function.
    #[knus(children)]
    pub body: Vec<InstructionNode>,
}

/// Instruction, along with its source line.
#[derive(Debug, PartialEq, knus::Decode)]
pub enum InstructionNode {
    /// Does nothing.
    Nop(LineNode),

    /// Assigns a value to a global.
    Set(VarNode),

    /// Adds a value to a global.
    Add(VarNode),

    /// Stays on this instruction until a global holds the given value.
    SpinUntil(VarNode),

    /// Raises a signal.
    Raise(NamedNode),

    /// Creates a thread running the given function.
    Spawn(NamedNode),

    /// Returns from the function, which exits the thread.
    Ret(LineNode),

    /// Exits the process.
    Exit(ExitNode),
}

/// Instruction without operand.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct LineNode {
    /// Source line.
    #[knus(property)]
    pub line: u32,
}

/// Instruction operating on a global.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct VarNode {
    /// Name of the global.
    #[knus(argument)]
    pub name: String,

    /// Operand.
    #[knus(argument)]
    pub value: i64,

    /// Source line.
    #[knus(property)]
    pub line: u32,
}

/// Instruction with a name operand.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct NamedNode {
    /// Signal or function name.
    #[knus(argument)]
    pub name: String,

    /// Source line.
    #[knus(property)]
    pub line: u32,
}

/// Process exit instruction.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct ExitNode {
    /// Exit code.
    #[knus(argument)]
    pub code: i32,

    /// Source line.
    #[knus(property)]
    pub line: u32,
}

/// Decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    Nop,
    Set(usize, i64),
    Add(usize, i64),
    SpinUntil(usize, i64),
    Raise(Signal),
    Spawn(usize),
    Ret,
    Exit(i32),
}

#[derive(Debug)]
pub(crate) struct Function {
    pub(crate) name: String,
    pub(crate) file: String,
    pub(crate) code: Vec<(Op, u32)>,
}

/// Executable image of the emulator.
///
/// Function `i` of the image is mapped at
/// `FUNCTION_BASE + i * FUNCTION_STRIDE`, and its instruction `j` at
/// `+ j * INSTRUCTION_SIZE`.
#[derive(Debug)]
pub struct Image {
    /// Globals, along with their initial values.
    globals: IndexMap<String, i64>,

    functions: Vec<Function>,

    entry: usize,
}

impl Image {
    /// Loads an image from a KDL file.
    #[tracing::instrument(name = "ImageLoad", skip_all, fields(path = %path.display()))]
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::File(path.to_owned(), e))?;

        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("<image>");

        let image = Self::parse(filename, &content)?;

        tracing::debug!(
            functions = image.functions.len(),
            globals = image.globals.len(),
            "image loaded"
        );

        Ok(image)
    }

    /// Parses an image from KDL content.
    pub fn parse(filename: &str, content: &str) -> Result<Self> {
        let doc = knus::parse::<ImageDocument>(filename, content)?;
        Self::from_document(doc)
    }

    /// Validates and lays out an image document.
    pub fn from_document(doc: ImageDocument) -> Result<Self> {
        let mut globals = IndexMap::with_capacity(doc.globals.len());

        for global in doc.globals {
            if globals.contains_key(&global.name) {
                return Err(Error::DuplicateGlobal(global.name));
            }
            globals.insert(global.name, global.value);
        }

        let mut names = HashSet::with_capacity(doc.functions.len());

        for function in doc.functions.iter() {
            if !names.insert(function.name.as_str()) {
                return Err(Error::DuplicateFunction(function.name.clone()));
            }
        }

        let entry = doc
            .functions
            .iter()
            .position(|f| f.name == ENTRY)
            .ok_or(Error::MissingEntry)?;

        let function_index = |name: &str| doc.functions.iter().position(|f| f.name == name);

        let functions = doc
            .functions
            .iter()
            .map(|function| {
                if function.body.len() > MAX_INSTRUCTIONS {
                    return Err(Error::FunctionTooLarge(function.name.clone()));
                }

                let global = |name: &str| {
                    globals
                        .get_index_of(name)
                        .ok_or_else(|| Error::UnknownGlobal(function.name.clone(), name.to_owned()))
                };

                let code = function
                    .body
                    .iter()
                    .map(|instr| {
                        let op = match instr {
                            InstructionNode::Nop(node) => (Op::Nop, node.line),
                            InstructionNode::Set(node) => {
                                (Op::Set(global(&node.name)?, node.value), node.line)
                            }
                            InstructionNode::Add(node) => {
                                (Op::Add(global(&node.name)?, node.value), node.line)
                            }
                            InstructionNode::SpinUntil(node) => {
                                (Op::SpinUntil(global(&node.name)?, node.value), node.line)
                            }
                            InstructionNode::Raise(node) => {
                                let signal = parse_signal(&node.name).ok_or_else(|| {
                                    Error::UnknownSignal(function.name.clone(), node.name.clone())
                                })?;
                                (Op::Raise(signal), node.line)
                            }
                            InstructionNode::Spawn(node) => {
                                let index = function_index(&node.name).ok_or_else(|| {
                                    Error::UnknownFunction(function.name.clone(), node.name.clone())
                                })?;
                                (Op::Spawn(index), node.line)
                            }
                            InstructionNode::Ret(node) => (Op::Ret, node.line),
                            InstructionNode::Exit(node) => (Op::Exit(node.code), node.line),
                        };

                        Ok(op)
                    })
                    .collect::<Result<Vec<_>>>()?;

                Ok(Function {
                    name: function.name.clone(),
                    file: function.file.clone(),
                    code,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            globals,
            functions,
            entry,
        })
    }

    /// Returns the address of the entry point.
    pub fn entry_addr(&self) -> u64 {
        Self::addr_of(self.entry, 0)
    }

    /// Returns the address of the first instruction of a function.
    pub fn function_addr(&self, name: &str) -> Option<u64> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|index| Self::addr_of(index, 0))
    }

    /// Returns the globals, along with their initial values.
    pub fn globals(&self) -> &IndexMap<String, i64> {
        &self.globals
    }

    /// Returns every instruction of the image, as `(address, source line)`.
    pub fn lines(&self) -> impl Iterator<Item = (u64, SourceLine)> + '_ {
        self.functions.iter().enumerate().flat_map(|(i, function)| {
            function.code.iter().enumerate().map(move |(j, (_, line))| {
                let line = SourceLine {
                    file: function.file.clone(),
                    line: *line,
                };
                (Self::addr_of(i, j), line)
            })
        })
    }

    pub(crate) fn addr_of(function: usize, instruction: usize) -> u64 {
        FUNCTION_BASE + function as u64 * FUNCTION_STRIDE + instruction as u64 * INSTRUCTION_SIZE
    }

    /// Returns the `(function, instruction)` indices of an address.
    ///
    /// The address right after the last instruction of a function is valid,
    /// and acts as an implicit `ret`.
    pub(crate) fn locate(&self, addr: u64) -> Option<(usize, usize)> {
        let offset = addr.checked_sub(FUNCTION_BASE)?;

        if offset % INSTRUCTION_SIZE != 0 {
            return None;
        }

        let function = (offset / FUNCTION_STRIDE) as usize;
        let instruction = ((offset % FUNCTION_STRIDE) / INSTRUCTION_SIZE) as usize;

        let code = &self.functions.get(function)?.code;
        (instruction <= code.len()).then_some((function, instruction))
    }

    /// Returns the instruction at the given address.
    pub(crate) fn op_at(&self, addr: u64) -> Option<&Op> {
        let (function, instruction) = self.locate(addr)?;

        match self.functions[function].code.get(instruction) {
            Some((op, _)) => Some(op),
            None => Some(&Op::Ret),
        }
    }

    pub(crate) fn function(&self, index: usize) -> Option<&Function> {
        self.functions.get(index)
    }
}

impl LineTable for Image {
    fn resolve_line(&self, file: &str, line: u32) -> Vec<u64> {
        self.functions
            .iter()
            .enumerate()
            .filter(|(_, function)| same_file(&function.file, file))
            .flat_map(|(i, function)| {
                function
                    .code
                    .iter()
                    .enumerate()
                    .filter(move |(j, (_, l))| {
                        // first instruction of each contiguous run of the line
                        *l == line && (*j == 0 || function.code[j - 1].1 != line)
                    })
                    .map(move |(j, _)| Self::addr_of(i, j))
            })
            .collect()
    }

    fn source_line(&self, addr: u64) -> Option<SourceLine> {
        let (function, instruction) = self.locate(addr)?;
        let function = &self.functions[function];

        let (_, line) = function
            .code
            .get(instruction)
            .or_else(|| function.code.last())?;

        Some(SourceLine {
            file: function.file.clone(),
            line: *line,
        })
    }
}

fn same_file(a: &str, b: &str) -> bool {
    a == b || Path::new(a).file_name() == Path::new(b).file_name()
}

fn parse_signal(name: &str) -> Option<Signal> {
    Signal::from_str(name)
        .or_else(|_| Signal::from_str(&format!("SIG{name}")))
        .ok()
}
