//! Faultline Fault Detection & State Capture
//!
//! Everything that knows how the debugger talks:
//! - `DebuggerConsole` runs one command and collects its output up to the prompt
//! - `parse` turns each kind of debugger response into a typed value
//! - `FaultDetector` waits for a breakpoint hit, a kernel panic or a user crash report
//! - `StateCapturer` harvests backtrace, registers, source and disassembly

mod breakpoint;
mod capturer;
mod console;
mod detector;
mod error;
pub mod parse;

pub use breakpoint::{ArmedBreakpoint, BreakpointSpec};
pub use capturer::{resolve_fault_address, CaptureSettings, StateCapturer};
pub use console::{DebuggerConsole, PROMPT};
pub use detector::{classify, FaultDetector};
pub use error::{CaptureError, Unparseable};

pub type Result<T> = std::result::Result<T, CaptureError>;
