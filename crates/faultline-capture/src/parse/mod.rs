//! Debugger response parsers
//!
//! One parser per response kind. Each returns the typed value or an
//! `Unparseable` describing what did not fit; none of them touch a channel.

mod backtrace;
mod banner;
mod breakpoint;
mod disassembly;
mod frame_info;
mod line_info;
mod listing;
mod registers;
mod symbol;
mod value;

pub use backtrace::backtrace;
pub use banner::{
    crash_report, crash_report_at, kernel_panic, kernel_panic_at, CRASH_REPORT_PATTERN,
    PANIC_PATTERN,
};
pub use breakpoint::{breakpoint_set, stop_location, stop_location_at, BreakpointSet};
pub use disassembly::disassembly;
pub use frame_info::saved_return_address;
pub use line_info::line_info;
pub use listing::listing;
pub use registers::registers;
pub use symbol::symbol;
pub use value::print_value;

/// Parse `0x`-prefixed or bare hex
pub(crate) fn hex(text: &str) -> Option<u64> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u64::from_str_radix(digits, 16).ok()
}
