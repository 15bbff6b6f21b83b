//! Assembler error channel (§7): one kind plus a `line N: ...` message,
//! optionally chained with `\n-> ...` nested causes. Assembly stops at the
//! first error, matching `dustbox::cpu::encoder::EncodeError`'s plain,
//! hand-written `Display` rather than a derive.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssembleErrorKind {
    ArgCount,
    MissingSize,
    ArgError,
    FormatError,
    UsageError,
    UnknownOp,
    EmptyFile,
    InvalidLabel,
    SymbolRedefinition,
    UnknownSymbol,
    NotImplemented,
    Assertion,
    Failure,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssembleError {
    pub kind: AssembleErrorKind,
    pub message: String,
}

impl AssembleError {
    pub fn new(kind: AssembleErrorKind, line: u32, msg: impl Into<String>) -> Self {
        AssembleError { kind, message: format!("line {}: {}", line, msg.into()) }
    }

    /// Chains a nested cause onto an existing error's message.
    pub fn chain(mut self, cause: impl fmt::Display) -> Self {
        self.message.push_str(&format!("\n-> {}", cause));
        self
    }
}

impl fmt::Display for AssembleError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AssembleError {}
