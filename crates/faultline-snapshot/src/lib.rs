//! Faultline Crash Snapshots
//!
//! Typed evidence captured at the moment of a fault, and the assembler that
//! turns it into one immutable, validated `CrashSnapshot`.

mod assembler;
mod captured;
mod error;
mod fault;
mod frame;
mod mode;
mod registers;
mod snapshot;
mod source;

pub use assembler::SnapshotAssembler;
pub use captured::Captured;
pub use error::AssemblyError;
pub use fault::{CrashReport, FaultEvent, StopLocation, TrapInfo};
pub use frame::{Frame, SourceLocation};
pub use mode::FaultMode;
pub use registers::RegisterFile;
pub use snapshot::{AddressSource, CrashSnapshot, FaultAddress};
pub use source::{
    AddressRole, Disassembly, DisassemblyAnchor, Instruction, ResolvedAddress, SourceContext,
    SourceLine, SymbolRef,
};

pub type Result<T> = std::result::Result<T, AssemblyError>;
