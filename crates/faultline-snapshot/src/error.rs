//! Snapshot assembly errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("Instruction pointer was not captured")]
    MissingInstructionPointer,

    #[error("Backtrace has no frames: {0}")]
    EmptyBacktrace(String),
}
