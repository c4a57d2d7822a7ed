//! Fault events and trap metadata

use serde::{Deserialize, Serialize};

use crate::mode::FaultMode;

/// x86 trap / exception vector with its hardware error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrapInfo {
    pub number: u32,
    pub error_code: Option<u64>,
}

impl TrapInfo {
    pub const DIVIDE_ERROR: u32 = 0;
    pub const INVALID_OPCODE: u32 = 6;
    pub const GENERAL_PROTECTION: u32 = 13;
    pub const PAGE_FAULT: u32 = 14;

    pub fn new(number: u32, error_code: Option<u64>) -> Self {
        Self { number, error_code }
    }

    pub fn is_page_fault(&self) -> bool {
        self.number == Self::PAGE_FAULT
    }

    /// Whether the vector is one the architecture defines
    pub fn is_known(&self) -> bool {
        self.name() != "unknown trap"
    }

    pub fn name(&self) -> &'static str {
        match self.number {
            0 => "divide error",
            1 => "debug",
            2 => "non-maskable interrupt",
            3 => "breakpoint",
            4 => "overflow",
            5 => "bound range exceeded",
            6 => "invalid opcode",
            7 => "device not available",
            8 => "double fault",
            10 => "invalid TSS",
            11 => "segment not present",
            12 => "stack-segment fault",
            13 => "general protection fault",
            14 => "page fault",
            16 => "x87 floating-point exception",
            17 => "alignment check",
            18 => "machine check",
            19 => "SIMD floating-point exception",
            _ => "unknown trap",
        }
    }
}

impl std::fmt::Display for TrapInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "trap {} ({})", self.number, self.name())?;
        if let Some(code) = self.error_code {
            write!(f, ", error code {:#x}", code)?;
        }
        Ok(())
    }
}

/// Where the debugger reported it stopped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopLocation {
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub address: Option<u64>,
}

impl StopLocation {
    /// Trap number when stopped in a generated `vectorN` entry stub
    pub fn vector(&self) -> Option<u32> {
        self.function
            .as_deref()
            .and_then(|f| f.strip_prefix("vector"))
            .and_then(|n| n.parse().ok())
    }
}

impl std::fmt::Display for StopLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.function.as_deref().unwrap_or("??"))?;
        if let (Some(file), Some(line)) = (&self.file, self.line) {
            write!(f, " at {}:{}", file, line)?;
        }
        Ok(())
    }
}

/// The kernel's console report for a user process killed by a trap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashReport {
    pub pid: u32,
    pub program: String,
    pub trap_no: u32,
    pub error_code: u64,
    pub cpu: u32,
    pub rip: u64,
    pub addr: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FaultEvent {
    /// An armed breakpoint fired; the debugger is halted
    BreakpointHit {
        breakpoint: u32,
        location: StopLocation,
        trap: Option<u32>,
    },
    /// The kernel printed a panic banner
    KernelPanic { reason: String },
    /// The kernel reported and killed a faulting user process
    UserFault(CrashReport),
}

impl FaultEvent {
    /// Whether the debugger is already stopped at the fault
    pub fn halts_debugger(&self) -> bool {
        matches!(self, FaultEvent::BreakpointHit { .. })
    }

    pub fn trap(&self) -> Option<TrapInfo> {
        match self {
            FaultEvent::BreakpointHit { location, trap, .. } => trap
                .or_else(|| location.vector())
                .map(|n| TrapInfo::new(n, None)),
            FaultEvent::KernelPanic { .. } => None,
            FaultEvent::UserFault(report) => {
                Some(TrapInfo::new(report.trap_no, Some(report.error_code)))
            }
        }
    }

    /// Mode implied by the event itself, when it implies one
    pub fn implied_mode(&self) -> Option<FaultMode> {
        match self {
            FaultEvent::BreakpointHit { .. } => None,
            FaultEvent::KernelPanic { .. } => Some(FaultMode::Kernel),
            FaultEvent::UserFault(_) => Some(FaultMode::User),
        }
    }
}

impl std::fmt::Display for FaultEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FaultEvent::BreakpointHit {
                breakpoint,
                location,
                ..
            } => write!(f, "breakpoint {} hit in {}", breakpoint, location),
            FaultEvent::KernelPanic { reason } => write!(f, "kernel panic: {}", reason),
            FaultEvent::UserFault(report) => write!(
                f,
                "user fault in pid {} ({}): trap {} err {} rip {:#x} addr {:#x}",
                report.pid,
                report.program,
                report.trap_no,
                report.error_code,
                report.rip,
                report.addr
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_fault(trap_no: u32) -> FaultEvent {
        FaultEvent::UserFault(CrashReport {
            pid: 3,
            program: "user_crash".to_string(),
            trap_no,
            error_code: 0,
            cpu: 0,
            rip: 0x1c,
            addr: 0,
        })
    }

    #[test]
    fn test_trap_from_vector_symbol() {
        let event = FaultEvent::BreakpointHit {
            breakpoint: 1,
            location: StopLocation {
                function: Some("vector14".to_string()),
                file: Some("vectors.S".to_string()),
                line: Some(56),
                address: None,
            },
            trap: None,
        };
        assert!(event.trap().unwrap().is_page_fault());
        assert!(event.halts_debugger());
    }

    #[test]
    fn test_explicit_trap_wins() {
        let event = FaultEvent::BreakpointHit {
            breakpoint: 1,
            location: StopLocation {
                function: Some("vector14".to_string()),
                ..Default::default()
            },
            trap: Some(13),
        };
        assert_eq!(event.trap().unwrap().number, 13);
    }

    #[test]
    fn test_user_faults_are_distinct() {
        let divide = user_fault(0).trap().unwrap();
        let page = user_fault(14).trap().unwrap();
        assert_eq!(divide.name(), "divide error");
        assert!(!divide.is_page_fault());
        assert!(page.is_page_fault());
        assert_eq!(user_fault(0).implied_mode(), Some(FaultMode::User));
    }

    #[test]
    fn test_panic_has_no_trap() {
        let event = FaultEvent::KernelPanic {
            reason: "acquire".to_string(),
        };
        assert!(event.trap().is_none());
        assert!(!event.halts_debugger());
    }
}
