//! Snapshot assembly

use chrono::Utc;

use crate::captured::Captured;
use crate::error::AssemblyError;
use crate::fault::FaultEvent;
use crate::frame::Frame;
use crate::mode::FaultMode;
use crate::registers::RegisterFile;
use crate::snapshot::{fingerprint, CrashSnapshot, FaultAddress};
use crate::source::{Disassembly, ResolvedAddress, SymbolRef};
use crate::Result;

/// Collects captured fields and produces exactly one `CrashSnapshot`.
///
/// `assemble` consumes the builder, so a second snapshot cannot be produced
/// from the same evidence.
pub struct SnapshotAssembler {
    session_id: String,
    test_name: String,
    mode: FaultMode,
    event: FaultEvent,
    instruction_pointer: Option<u64>,
    registers: Captured<RegisterFile>,
    faulting_address: Captured<FaultAddress>,
    backtrace: Vec<Frame>,
    enclosing_symbol: Captured<SymbolRef>,
    resolved: Vec<ResolvedAddress>,
    disassembly: Captured<Disassembly>,
}

impl SnapshotAssembler {
    pub fn new(
        session_id: impl Into<String>,
        test_name: impl Into<String>,
        mode: FaultMode,
        event: FaultEvent,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            test_name: test_name.into(),
            mode,
            event,
            instruction_pointer: None,
            registers: Captured::missing("not captured"),
            faulting_address: Captured::missing("not captured"),
            backtrace: Vec::new(),
            enclosing_symbol: Captured::missing("not captured"),
            resolved: Vec::new(),
            disassembly: Captured::missing("not captured"),
        }
    }

    pub fn instruction_pointer(mut self, ip: Option<u64>) -> Self {
        self.instruction_pointer = ip;
        self
    }

    pub fn registers(mut self, registers: Captured<RegisterFile>) -> Self {
        self.registers = registers;
        self
    }

    pub fn faulting_address(mut self, address: Captured<FaultAddress>) -> Self {
        self.faulting_address = address;
        self
    }

    pub fn backtrace(mut self, frames: Vec<Frame>) -> Self {
        self.backtrace = frames;
        self
    }

    pub fn enclosing_symbol(mut self, symbol: Captured<SymbolRef>) -> Self {
        self.enclosing_symbol = symbol;
        self
    }

    pub fn resolved(mut self, resolved: Vec<ResolvedAddress>) -> Self {
        self.resolved = resolved;
        self
    }

    pub fn disassembly(mut self, disassembly: Captured<Disassembly>) -> Self {
        self.disassembly = disassembly;
        self
    }

    /// Validate the minimum evidence and freeze the snapshot
    pub fn assemble(self) -> Result<CrashSnapshot> {
        let instruction_pointer = self
            .instruction_pointer
            .ok_or(AssemblyError::MissingInstructionPointer)?;

        if self.backtrace.is_empty() {
            return Err(AssemblyError::EmptyBacktrace(self.session_id));
        }

        let mode = self.event.implied_mode().unwrap_or(self.mode);
        if mode != self.mode {
            tracing::warn!(
                session_id = %self.session_id,
                requested = %self.mode,
                observed = %mode,
                "Fault mode differs from requested mode"
            );
        }

        let trap = self.event.trap();

        // Innermost frame is the faulting function itself
        let return_addresses: Vec<u64> = self
            .backtrace
            .iter()
            .skip(1)
            .filter_map(|f| f.address)
            .collect();

        let fingerprint = fingerprint(mode, trap, &self.enclosing_symbol, &self.backtrace);

        tracing::info!(
            session_id = %self.session_id,
            mode = %mode,
            ip = %format!("{:#x}", instruction_pointer),
            frames = self.backtrace.len(),
            fingerprint = %fingerprint,
            "Crash snapshot assembled"
        );

        Ok(CrashSnapshot {
            session_id: self.session_id,
            test_name: self.test_name,
            captured_at: Utc::now(),
            mode,
            event: self.event,
            trap,
            instruction_pointer,
            registers: self.registers,
            faulting_address: self.faulting_address,
            backtrace: self.backtrace,
            return_addresses,
            enclosing_symbol: self.enclosing_symbol,
            resolved: self.resolved,
            disassembly: self.disassembly,
            fingerprint,
        })
    }
}
