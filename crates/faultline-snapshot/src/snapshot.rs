//! The assembled crash snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write;

use crate::captured::Captured;
use crate::fault::{FaultEvent, TrapInfo};
use crate::frame::Frame;
use crate::mode::FaultMode;
use crate::registers::RegisterFile;
use crate::source::{Disassembly, ResolvedAddress, SourceContext, SymbolRef};

/// Where the faulting address was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSource {
    Cr2,
    CrashReport,
    InstructionPointer,
}

impl AddressSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressSource::Cr2 => "cr2",
            AddressSource::CrashReport => "crash report",
            AddressSource::InstructionPointer => "instruction pointer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultAddress {
    pub value: u64,
    pub source: AddressSource,
}

/// Complete state captured at the moment of a fault.
///
/// Built once by [`crate::SnapshotAssembler`]; there are no mutators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashSnapshot {
    pub(crate) session_id: String,
    pub(crate) test_name: String,
    pub(crate) captured_at: DateTime<Utc>,
    pub(crate) mode: FaultMode,
    pub(crate) event: FaultEvent,
    pub(crate) trap: Option<TrapInfo>,
    pub(crate) instruction_pointer: u64,
    pub(crate) registers: Captured<RegisterFile>,
    pub(crate) faulting_address: Captured<FaultAddress>,
    pub(crate) backtrace: Vec<Frame>,
    pub(crate) return_addresses: Vec<u64>,
    pub(crate) enclosing_symbol: Captured<SymbolRef>,
    pub(crate) resolved: Vec<ResolvedAddress>,
    pub(crate) disassembly: Captured<Disassembly>,
    pub(crate) fingerprint: String,
}

impl CrashSnapshot {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn mode(&self) -> FaultMode {
        self.mode
    }

    pub fn event(&self) -> &FaultEvent {
        &self.event
    }

    pub fn trap(&self) -> Option<TrapInfo> {
        self.trap
    }

    pub fn instruction_pointer(&self) -> u64 {
        self.instruction_pointer
    }

    pub fn registers(&self) -> &Captured<RegisterFile> {
        &self.registers
    }

    pub fn faulting_address(&self) -> &Captured<FaultAddress> {
        &self.faulting_address
    }

    pub fn backtrace(&self) -> &[Frame] {
        &self.backtrace
    }

    /// Return addresses, most recent first
    pub fn return_addresses(&self) -> &[u64] {
        &self.return_addresses
    }

    pub fn enclosing_symbol(&self) -> &Captured<SymbolRef> {
        &self.enclosing_symbol
    }

    pub fn resolved(&self) -> &[ResolvedAddress] {
        &self.resolved
    }

    pub fn disassembly(&self) -> &Captured<Disassembly> {
        &self.disassembly
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Names of the fields that degraded to placeholders
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.registers.is_resolved() {
            missing.push("registers");
        }
        if !self.faulting_address.is_resolved() {
            missing.push("faulting_address");
        }
        if !self.enclosing_symbol.is_resolved() {
            missing.push("enclosing_symbol");
        }
        if self.resolved.iter().any(|r| !r.source.is_resolved()) {
            missing.push("source_context");
        }
        if !self.disassembly.is_resolved() {
            missing.push("disassembly");
        }
        missing
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Plain-text report used as the diagnosis payload and in artifacts
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.write_report(&mut out);
        out
    }

    pub fn write_report(&self, out: &mut impl Write) -> std::fmt::Result {
        writeln!(out, "=== FAULT ===")?;
        writeln!(out, "test: {}", self.test_name)?;
        writeln!(out, "mode: {}", self.mode)?;
        writeln!(out, "event: {}", self.event)?;
        match &self.trap {
            Some(trap) => writeln!(out, "trap: {}", trap)?,
            None => writeln!(out, "trap: unknown")?,
        }
        writeln!(out, "instruction pointer: {:#x}", self.instruction_pointer)?;
        match &self.enclosing_symbol {
            Captured::Resolved { value } => writeln!(out, "symbol: {}", value)?,
            Captured::Missing { reason } => writeln!(out, "symbol: <missing: {}>", reason)?,
        }
        match &self.faulting_address {
            Captured::Resolved { value } => writeln!(
                out,
                "faulting address: {:#x} (from {})",
                value.value,
                value.source.as_str()
            )?,
            Captured::Missing { reason } => {
                writeln!(out, "faulting address: <missing: {}>", reason)?
            }
        }

        writeln!(out, "\n=== BACKTRACE ===")?;
        for frame in &self.backtrace {
            writeln!(out, "{}", frame)?;
        }

        writeln!(out, "\n=== REGISTERS ===")?;
        match &self.registers {
            Captured::Resolved { value } => {
                for (name, val) in value.iter() {
                    writeln!(out, "{:<8} {:#018x}", name, val)?;
                }
            }
            Captured::Missing { reason } => writeln!(out, "<missing: {}>", reason)?,
        }

        writeln!(out, "\n=== RETURN ADDRESSES ===")?;
        if self.return_addresses.is_empty() {
            writeln!(out, "<none>")?;
        }
        for (i, addr) in self.return_addresses.iter().enumerate() {
            writeln!(out, "{:>2}: {:#x}", i + 1, addr)?;
        }

        writeln!(out, "\n=== SOURCE CONTEXT ===")?;
        for entry in &self.resolved {
            write!(out, "[{}] {:#x}", entry.role, entry.address)?;
            if let Some(symbol) = entry.symbol.value() {
                write!(out, " in {}", symbol)?;
            }
            writeln!(out)?;
            match &entry.source {
                Captured::Resolved {
                    value: SourceContext::Lines { location, window },
                } => {
                    writeln!(out, "  at {}", location)?;
                    for line in window {
                        let marker = if line.is_target { "=>" } else { "  " };
                        writeln!(out, "  {} {:>5} {}", marker, line.number, line.text)?;
                    }
                }
                Captured::Resolved {
                    value: SourceContext::Function { symbol },
                } => writeln!(out, "  function {} (no line information)", symbol)?,
                Captured::Missing { reason } => writeln!(out, "  <missing: {}>", reason)?,
            }
        }

        writeln!(out, "\n=== DISASSEMBLY ===")?;
        match &self.disassembly {
            Captured::Resolved { value } => {
                writeln!(out, "anchor: {:#x} ({:?})", value.anchor, value.anchor_kind)?;
                for insn in &value.instructions {
                    let marker = if insn.is_current { "=>" } else { "  " };
                    write!(out, "{} {:#x}", marker, insn.address)?;
                    if let Some(location) = &insn.location {
                        write!(out, " <{}>", location)?;
                    }
                    writeln!(out, ":\t{}", insn.text)?;
                }
            }
            Captured::Missing { reason } => writeln!(out, "<missing: {}>", reason)?,
        }
        Ok(())
    }
}

/// Stable grouping key for repeated crashes
pub(crate) fn fingerprint(
    mode: FaultMode,
    trap: Option<TrapInfo>,
    enclosing: &Captured<SymbolRef>,
    backtrace: &[Frame],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(mode.as_str().as_bytes());
    hasher.update(b"\0");
    match trap {
        Some(trap) => hasher.update(trap.number.to_string().as_bytes()),
        None => hasher.update(b"-"),
    }
    hasher.update(b"\0");
    hasher.update(
        enclosing
            .value()
            .map(|s| s.symbol.as_str())
            .unwrap_or("??")
            .as_bytes(),
    );
    for frame in backtrace {
        hasher.update(b"\0");
        hasher.update(frame.function.as_deref().unwrap_or("??").as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
