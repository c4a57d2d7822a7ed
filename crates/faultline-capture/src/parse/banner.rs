use regex::Regex;
use std::sync::LazyLock;

use faultline_snapshot::CrashReport;

use super::hex;
use crate::error::Unparseable;

/// Kernel report for a user process killed by a trap
pub const CRASH_REPORT_PATTERN: &str = r"pid (\d+) (\S+): trap (\d+) err (\d+) on cpu (\d+) (?:rip|eip) (0x[0-9a-fA-F]+) addr (0x[0-9a-fA-F]+)";

/// Kernel panic banner, up to the end of its line
pub const PANIC_PATTERN: &str = r"panic: ([^\n]*)\n";

static CRASH_REPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(CRASH_REPORT_PATTERN).expect("crash report regex is valid"));

static PANIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PANIC_PATTERN).expect("panic regex is valid"));

pub fn crash_report(text: &str) -> Result<CrashReport, Unparseable> {
    let caps = CRASH_REPORT
        .captures(text)
        .ok_or_else(|| Unparseable::new("crash report", "no crash report", text))?;
    let bad = |field: &str| Unparseable::new("crash report", format!("bad {}", field), text);
    Ok(CrashReport {
        pid: caps[1].parse().map_err(|_| bad("pid"))?,
        program: caps[2].to_string(),
        trap_no: caps[3].parse().map_err(|_| bad("trap"))?,
        error_code: caps[4].parse().map_err(|_| bad("error code"))?,
        cpu: caps[5].parse().map_err(|_| bad("cpu"))?,
        rip: hex(&caps[6]).ok_or_else(|| bad("rip"))?,
        addr: hex(&caps[7]).ok_or_else(|| bad("addr"))?,
    })
}

/// Offset of the first complete crash report in `text`
pub fn crash_report_at(text: &str) -> Option<usize> {
    CRASH_REPORT.find(text).map(|m| m.start())
}

/// Offset of the first complete panic banner in `text`
pub fn kernel_panic_at(text: &str) -> Option<usize> {
    PANIC.find(text).map(|m| m.start())
}

pub fn kernel_panic(text: &str) -> Result<String, Unparseable> {
    PANIC
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .ok_or_else(|| Unparseable::new("panic", "no panic banner", text))
}
