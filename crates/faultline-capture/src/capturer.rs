//! State capture

use std::path::PathBuf;
use std::time::Duration;

use faultline_channel::TranscriptChannel;
use faultline_snapshot::{
    AddressRole, AddressSource, Captured, Disassembly, DisassemblyAnchor, FaultAddress,
    FaultEvent, FaultMode, Frame, Instruction, RegisterFile, ResolvedAddress, SnapshotAssembler,
    SourceContext, SourceLine, SourceLocation, SymbolRef, TrapInfo,
};

use crate::console::DebuggerConsole;
use crate::error::Unparseable;
use crate::parse;
use crate::Result;

const AFTER_FAULT: &str = "captured after fault";

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub command_timeout: Duration,
    /// Kernel source tree; `list` is used when unset or a file is missing
    pub source_root: Option<PathBuf>,
    /// Source lines either side of a resolved line
    pub source_radius: u32,
    /// Instructions either side of the faulting one
    pub disassembly_radius: usize,
    /// Addresses (IP included) resolved to source
    pub max_resolved_frames: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(10),
            source_root: None,
            source_radius: 5,
            disassembly_radius: 8,
            max_resolved_frames: 8,
        }
    }
}

/// Faulting address for an event.
///
/// Page faults take CR2 (kernel) or the crash report's address (user).
/// Other known traps and panics take the instruction pointer. A kernel
/// breakpoint with an unknown trap prefers CR2 when it is available.
pub fn resolve_fault_address(
    event: &FaultEvent,
    instruction_pointer: Option<u64>,
    cr2: Option<u64>,
) -> Captured<FaultAddress> {
    let from_ip = || match instruction_pointer {
        Some(value) => Captured::resolved(FaultAddress {
            value,
            source: AddressSource::InstructionPointer,
        }),
        None => Captured::missing("instruction pointer not captured"),
    };
    let from_cr2 = |value: u64| {
        Captured::resolved(FaultAddress {
            value,
            source: AddressSource::Cr2,
        })
    };

    match event {
        FaultEvent::UserFault(report) if report.trap_no == TrapInfo::PAGE_FAULT => {
            Captured::resolved(FaultAddress {
                value: report.addr,
                source: AddressSource::CrashReport,
            })
        }
        FaultEvent::UserFault(_) | FaultEvent::KernelPanic { .. } => from_ip(),
        FaultEvent::BreakpointHit { .. } => match event.trap() {
            Some(trap) if trap.is_page_fault() => match cr2 {
                Some(value) => from_cr2(value),
                None => Captured::missing("cr2 not available"),
            },
            Some(trap) if trap.is_known() => from_ip(),
            _ => cr2.map(from_cr2).unwrap_or_else(from_ip),
        },
    }
}

fn wants_cr2(event: &FaultEvent) -> bool {
    match event {
        FaultEvent::BreakpointHit { .. } => event
            .trap()
            .map_or(true, |trap| trap.is_page_fault() || !trap.is_known()),
        _ => false,
    }
}

/// Issues the capture commands against a halted debugger
pub struct StateCapturer<'a> {
    console: DebuggerConsole<'a>,
    settings: &'a CaptureSettings,
}

impl<'a> StateCapturer<'a> {
    pub fn new(gdb: &'a mut TranscriptChannel, settings: &'a CaptureSettings) -> Self {
        Self {
            console: DebuggerConsole::new(gdb),
            settings,
        }
    }

    /// Harvest the machine state for `event`. Unparseable responses become
    /// `Missing` fields; channel failures abort.
    pub async fn capture(
        mut self,
        session_id: &str,
        test_name: &str,
        mode: FaultMode,
        event: FaultEvent,
    ) -> Result<SnapshotAssembler> {
        if !event.halts_debugger() {
            self.console.halt(self.settings.command_timeout).await?;
        }

        let (backtrace, registers) = match &event {
            // the process is already killed; the halted CPU is elsewhere
            FaultEvent::UserFault(report) => {
                tracing::info!(
                    session_id = %session_id,
                    pid = report.pid,
                    "Reported after the fault, registers not taken"
                );
                (
                    vec![Frame {
                        level: 0,
                        address: Some(report.rip),
                        function: None,
                        location: None,
                    }],
                    Captured::missing(AFTER_FAULT),
                )
            }
            _ => {
                let backtrace = match parse::backtrace(&self.run("backtrace").await?) {
                    Ok(frames) => frames,
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "Backtrace not captured");
                        Vec::new()
                    }
                };
                let registers: Captured<RegisterFile> =
                    parse::registers(&self.run("info registers").await?).into();
                (backtrace, registers)
            }
        };

        let instruction_pointer = match &event {
            FaultEvent::UserFault(report) => Some(report.rip),
            _ => match registers.value().and_then(|r| r.instruction_pointer()) {
                Some(ip) => Some(ip),
                None => parse::print_value(&self.run("print/x $pc").await?).ok(),
            },
        };

        let cr2 = if wants_cr2(&event) {
            match registers.value().and_then(|r| r.fault_address()) {
                Some(cr2) => Some(cr2),
                None => parse::print_value(&self.run("print/x $cr2").await?).ok(),
            }
        } else {
            None
        };
        let faulting_address = resolve_fault_address(&event, instruction_pointer, cr2);

        let enclosing_symbol: Captured<SymbolRef> = match instruction_pointer {
            Some(ip) => self.symbol_at(ip).await?,
            None => Captured::missing("instruction pointer not captured"),
        };

        let return_addresses: Vec<u64> = backtrace.iter().skip(1).filter_map(|f| f.address).collect();

        let mut targets: Vec<(u64, AddressRole)> = Vec::new();
        if let Some(ip) = instruction_pointer {
            targets.push((ip, AddressRole::InstructionPointer));
        }
        for (i, address) in return_addresses.iter().enumerate() {
            targets.push((*address, AddressRole::ReturnAddress { depth: i as u32 + 1 }));
        }
        targets.truncate(self.settings.max_resolved_frames);

        let mut resolved = Vec::with_capacity(targets.len());
        for (address, role) in targets {
            let known = match role {
                AddressRole::InstructionPointer => Some(enclosing_symbol.clone()),
                AddressRole::ReturnAddress { .. } => None,
            };
            resolved.push(self.resolve_address(address, role, known).await?);
        }

        let calling_site = self.calling_site(&backtrace).await?;
        let disassembly = self.disassemble(instruction_pointer, calling_site).await?;

        tracing::info!(
            session_id = %session_id,
            frames = backtrace.len(),
            registers = registers.value().map_or(0, |r| r.len()),
            resolved = resolved.len(),
            disassembly = disassembly.is_resolved(),
            "State captured"
        );

        Ok(SnapshotAssembler::new(session_id, test_name, mode, event)
            .instruction_pointer(instruction_pointer)
            .registers(registers)
            .faulting_address(faulting_address)
            .backtrace(backtrace)
            .enclosing_symbol(enclosing_symbol)
            .resolved(resolved)
            .disassembly(disassembly))
    }

    async fn run(&mut self, command: &str) -> Result<String> {
        Ok(self
            .console
            .command(command, self.settings.command_timeout)
            .await?)
    }

    async fn symbol_at(&mut self, address: u64) -> Result<Captured<SymbolRef>> {
        let output = self.run(&format!("info symbol {:#x}", address)).await?;
        Ok(parse::symbol(&output).into())
    }

    async fn resolve_address(
        &mut self,
        address: u64,
        role: AddressRole,
        known_symbol: Option<Captured<SymbolRef>>,
    ) -> Result<ResolvedAddress> {
        let symbol = match known_symbol {
            Some(symbol) => symbol,
            None => self.symbol_at(address).await?,
        };

        let line = parse::line_info(&self.run(&format!("info line *{:#x}", address)).await?);
        let source = match line {
            Ok(Some(location)) => Captured::resolved(self.source_window(location).await?),
            Ok(None) => match symbol.value() {
                Some(sym) => Captured::resolved(SourceContext::Function {
                    symbol: sym.symbol.clone(),
                }),
                None => Captured::missing("no line or symbol information"),
            },
            Err(e) => Captured::missing(e.to_string()),
        };

        Ok(ResolvedAddress {
            address,
            role,
            symbol,
            source,
        })
    }

    /// Lines around `location`, from the source tree or the debugger
    async fn source_window(&mut self, location: SourceLocation) -> Result<SourceContext> {
        let radius = self.settings.source_radius;
        let first = location.line.saturating_sub(radius).max(1);
        let last = location.line.saturating_add(radius);

        if let Some(root) = &self.settings.source_root {
            let path = root.join(&location.file);
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => {
                    let window = window_from_text(&text, location.line, first, last);
                    if !window.is_empty() {
                        return Ok(SourceContext::Lines { location, window });
                    }
                }
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "Source file unavailable, asking debugger");
                }
            }
        }

        let output = self
            .run(&format!("list {}:{},{}", location.file, first, last))
            .await?;
        let window = match parse::listing(&output, location.line) {
            Ok(window) => window,
            Err(e) => {
                tracing::warn!(location = %location, error = %e, "No source window");
                Vec::new()
            }
        };
        Ok(SourceContext::Lines { location, window })
    }

    /// Innermost return address; a null one falls back to the saved rip of frame 1
    async fn calling_site(&mut self, backtrace: &[Frame]) -> Result<Option<u64>> {
        match backtrace.get(1).and_then(|f| f.address) {
            Some(address) if address != 0 => Ok(Some(address)),
            _ if backtrace.len() > 1 => {
                let output = self.run("info frame 1").await?;
                Ok(parse::saved_return_address(&output).ok().filter(|a| *a != 0))
            }
            _ => Ok(None),
        }
    }

    async fn disassemble(
        &mut self,
        instruction_pointer: Option<u64>,
        calling_site: Option<u64>,
    ) -> Result<Captured<Disassembly>> {
        let mut reasons = Vec::new();
        let anchors = [
            instruction_pointer.map(|a| (a, DisassemblyAnchor::InstructionPointer)),
            calling_site.map(|a| (a, DisassemblyAnchor::CallingSite)),
        ];

        for (anchor, anchor_kind) in anchors.into_iter().flatten() {
            match self.instructions_at(anchor).await? {
                Ok(instructions) => {
                    let disassembly = Disassembly {
                        anchor,
                        anchor_kind,
                        instructions,
                    };
                    return Ok(Captured::resolved(
                        disassembly.windowed(self.settings.disassembly_radius),
                    ));
                }
                Err(e) => reasons.push(format!("{:#x}: {}", anchor, e)),
            }
        }

        if reasons.is_empty() {
            return Ok(Captured::missing("no address to disassemble"));
        }
        Ok(Captured::missing(reasons.join("; ")))
    }

    async fn instructions_at(
        &mut self,
        address: u64,
    ) -> Result<std::result::Result<Vec<Instruction>, Unparseable>> {
        match parse::disassembly(&self.run(&format!("disassemble {:#x}", address)).await?) {
            Ok(instructions) => return Ok(Ok(instructions)),
            Err(e) => tracing::debug!(error = %e, "disassemble failed, examining memory"),
        }
        let count = self.settings.disassembly_radius * 2 + 1;
        Ok(parse::disassembly(
            &self.run(&format!("x/{}i {:#x}", count, address)).await?,
        ))
    }
}

fn window_from_text(text: &str, target: u32, first: u32, last: u32) -> Vec<SourceLine> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i as u32 + 1, line))
        .filter(|(number, _)| (first..=last).contains(number))
        .map(|(number, line)| SourceLine {
            number,
            text: line.to_string(),
            is_target: number == target,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_channel::scripted::{self, Script};
    use faultline_channel::Transcript;
    use faultline_snapshot::{CrashReport, StopLocation};

    const BT: &str = "\
#0  page_fault_handler (tf=0xffffffff8011ff50) at trap.c:40
#1  0xffffffff80106a2e in trap (tf=0xffffffff8011ff50) at trap.c:45
#2  0xffffffff80105c3d in alltraps () at trapasm.S:20
(gdb) ";

    const REGS: &str = "\
rax            0x0                 0
rsp            0xffffffff8011ff38  0xffffffff8011ff38
rip            0xffffffff80106b0e  0xffffffff80106b0e <page_fault_handler+14>
cr2            0x0                 0
(gdb) ";

    fn kernel_hit(trap: Option<u32>) -> FaultEvent {
        FaultEvent::BreakpointHit {
            breakpoint: 1,
            location: StopLocation {
                function: Some("page_fault_handler".to_string()),
                ..Default::default()
            },
            trap,
        }
    }

    fn user_fault(trap_no: u32) -> FaultEvent {
        FaultEvent::UserFault(CrashReport {
            pid: 4,
            program: "div_zero".to_string(),
            trap_no,
            error_code: 0,
            cpu: 1,
            rip: 0x2a,
            addr: 0xdead_beef,
        })
    }

    fn kernel_script() -> Script {
        Script::new()
            .on("backtrace", BT)
            .on("info registers", REGS)
            .on("info symbol 0xffffffff80106b0e", "page_fault_handler + 14 in section .text\n(gdb) ")
            .on("info symbol 0xffffffff80106a2e", "trap + 30 in section .text\n(gdb) ")
            .on("info symbol", "No symbol matches 0x0.\n(gdb) ")
            .on(
                "info line *0xffffffff80106b0e",
                "Line 40 of \"trap.c\" starts at address 0xffffffff80106b00 <page_fault_handler> and ends at 0xffffffff80106b12.\n(gdb) ",
            )
            .on(
                "info line",
                "No line number information available for address 0xffffffff80106a2e <trap+30>\n(gdb) ",
            )
            .on("list trap.c:35,45", "39\tvoid\n40\tpage_fault_handler(struct trapframe *tf)\n41\t{\n(gdb) ")
            .on(
                "disassemble 0xffffffff80106b0e",
                "Dump of assembler code for function page_fault_handler:\n   0xffffffff80106b00 <+0>:\tpush   %rbp\n=> 0xffffffff80106b0e <+14>:\tmovl   $0x0,(%rax)\nEnd of assembler dump.\n(gdb) ",
            )
            .fallback("(gdb) ")
    }

    #[test]
    fn test_fault_address_rules() {
        let kernel_pf = resolve_fault_address(&kernel_hit(Some(14)), Some(0x10), Some(0));
        assert_eq!(kernel_pf.value().unwrap().source, AddressSource::Cr2);
        assert_eq!(kernel_pf.value().unwrap().value, 0);

        let no_cr2 = resolve_fault_address(&kernel_hit(Some(14)), Some(0x10), None);
        assert!(!no_cr2.is_resolved());

        let gp = resolve_fault_address(&kernel_hit(Some(13)), Some(0x10), Some(0x99));
        assert_eq!(gp.value().unwrap().value, 0x10);

        let unknown = resolve_fault_address(&kernel_hit(None), Some(0x10), Some(0x99));
        assert_eq!(unknown.value().unwrap().source, AddressSource::Cr2);
        let unknown = resolve_fault_address(&kernel_hit(None), Some(0x10), None);
        assert_eq!(unknown.value().unwrap().source, AddressSource::InstructionPointer);

        let user_pf = resolve_fault_address(&user_fault(14), Some(0x2a), None);
        assert_eq!(user_pf.value().unwrap().source, AddressSource::CrashReport);
        assert_eq!(user_pf.value().unwrap().value, 0xdead_beef);

        let divide = resolve_fault_address(&user_fault(0), Some(0x2a), Some(0x99));
        assert_eq!(divide.value().unwrap().source, AddressSource::InstructionPointer);
        assert_eq!(divide.value().unwrap().value, 0x2a);

        let panic = FaultEvent::KernelPanic {
            reason: "acquire".to_string(),
        };
        assert_eq!(
            resolve_fault_address(&panic, Some(0x10), Some(0x99)).value().unwrap().value,
            0x10
        );
    }

    #[tokio::test]
    async fn test_kernel_capture() {
        let (mut gdb, peer) = scripted::channel("gdb", kernel_script(), Transcript::new());
        let settings = CaptureSettings {
            command_timeout: Duration::from_secs(1),
            ..Default::default()
        };

        let snapshot = StateCapturer::new(&mut gdb, &settings)
            .capture("s1", "trap_test", FaultMode::Kernel, kernel_hit(Some(14)))
            .await
            .unwrap()
            .assemble()
            .unwrap();

        assert_eq!(snapshot.mode(), FaultMode::Kernel);
        assert_eq!(snapshot.instruction_pointer(), 0xffff_ffff_8010_6b0e);
        assert_eq!(snapshot.faulting_address().value().unwrap().value, 0);
        assert_eq!(snapshot.backtrace().len(), 3);
        assert_eq!(snapshot.enclosing_symbol().value().unwrap().symbol, "page_fault_handler");

        let ip = &snapshot.resolved()[0];
        match ip.source.value() {
            Some(SourceContext::Lines { location, window }) => {
                assert_eq!(location.line, 40);
                assert!(window.iter().any(|l| l.is_target));
            }
            other => panic!("unexpected: {:?}", other),
        }
        match snapshot.resolved()[1].source.value() {
            Some(SourceContext::Function { symbol }) => assert_eq!(symbol, "trap"),
            other => panic!("unexpected: {:?}", other),
        }

        let disassembly = snapshot.disassembly().value().unwrap();
        assert_eq!(disassembly.anchor_kind, DisassemblyAnchor::InstructionPointer);
        assert!(disassembly.current().is_some());

        // halted at the breakpoint already: no interrupt
        assert!(!peer.has_received(scripted::INTERRUPT));
    }

    #[tokio::test]
    async fn test_source_failure_keeps_core_fields() {
        let script = Script::new()
            .on("backtrace", BT)
            .on("info registers", REGS)
            .on("info line", "Cannot access memory at address 0xffffffff80106b0e\n(gdb) ")
            .fallback("(gdb) ");
        let (mut gdb, _peer) = scripted::channel("gdb", script, Transcript::new());
        let settings = CaptureSettings {
            command_timeout: Duration::from_secs(1),
            ..Default::default()
        };

        let snapshot = StateCapturer::new(&mut gdb, &settings)
            .capture("s2", "trap_test", FaultMode::Kernel, kernel_hit(Some(14)))
            .await
            .unwrap()
            .assemble()
            .unwrap();

        assert!(snapshot.registers().is_resolved());
        assert_eq!(snapshot.backtrace().len(), 3);
        assert!(snapshot.resolved().iter().all(|r| !r.source.is_resolved()));
        assert!(snapshot.missing_fields().contains(&"source_context"));
        assert!(!snapshot.disassembly().is_resolved());
    }

    #[tokio::test]
    async fn test_user_fault_interrupts_and_uses_report() {
        let transcript = Transcript::new();
        let script = Script::new()
            .on(
                faultline_channel::scripted::INTERRUPT,
                "\nThread 1 received signal SIGINT, Interrupt.\n0xffffffff80103e5e in scheduler () at proc.c:310\n(gdb) ",
            )
            .on("backtrace", "#0  0xffffffff80103e5e in scheduler () at proc.c:310\n#1  0xffffffff80102d1f in mpmain () at main.c:60\n(gdb) ")
            .on("info registers", "rip            0xffffffff80103e5e  0xffffffff80103e5e <scheduler+94>\n(gdb) ")
            .fallback("(gdb) ");
        let (mut gdb, peer) = scripted::channel("gdb", script, transcript);
        let settings = CaptureSettings {
            command_timeout: Duration::from_secs(1),
            ..Default::default()
        };

        let snapshot = StateCapturer::new(&mut gdb, &settings)
            .capture("s3", "div_zero", FaultMode::User, user_fault(0))
            .await
            .unwrap()
            .assemble()
            .unwrap();

        assert!(peer.has_received(faultline_channel::scripted::INTERRUPT));
        assert!(!peer.has_received("print/x $cr2"));
        assert!(!peer.has_received("backtrace"));
        assert!(!peer.has_received("info registers"));
        assert_eq!(snapshot.mode(), FaultMode::User);
        assert_eq!(snapshot.instruction_pointer(), 0x2a);
        assert_eq!(snapshot.registers().missing_reason(), Some("captured after fault"));
        assert_eq!(snapshot.backtrace().len(), 1);
        assert_eq!(snapshot.backtrace()[0].address, Some(0x2a));
        assert_eq!(snapshot.trap().unwrap().number, 0);
        assert_eq!(
            snapshot.faulting_address().value().unwrap().source,
            AddressSource::InstructionPointer
        );
    }

    #[tokio::test]
    async fn test_null_jump_anchors_on_calling_site() {
        let script = Script::new()
            .on("backtrace", "#0  0x0000000000000000 in ?? ()\n#1  0x0000000000000000 in ?? ()\n(gdb) ")
            .on("info registers", "rip            0x0                 0x0\ncr2            0x0                 0\n(gdb) ")
            .on("info frame 1", "Stack frame at 0xffffffff8011ff60:\n rip = 0x0; saved rip = 0xffffffff80104d52\n(gdb) ")
            .on("disassemble 0x0", "No function contains specified address.\n(gdb) ")
            .on("x/17i 0x0", "   0x0:\tCannot access memory at address 0x0\n(gdb) ")
            .on(
                "disassemble 0xffffffff80104d52",
                "Dump of assembler code for function null_deref:\n   0xffffffff80104d4d <+13>:\tcall   *%rax\n   0xffffffff80104d52 <+18>:\tleave\nEnd of assembler dump.\n(gdb) ",
            )
            .fallback("(gdb) ");
        let (mut gdb, _peer) = scripted::channel("gdb", script, Transcript::new());
        let settings = CaptureSettings {
            command_timeout: Duration::from_secs(1),
            ..Default::default()
        };

        let snapshot = StateCapturer::new(&mut gdb, &settings)
            .capture("s4", "null_deref", FaultMode::Kernel, kernel_hit(Some(14)))
            .await
            .unwrap()
            .assemble()
            .unwrap();

        let disassembly = snapshot.disassembly().value().unwrap();
        assert_eq!(disassembly.anchor_kind, DisassemblyAnchor::CallingSite);
        assert_eq!(disassembly.anchor, 0xffff_ffff_8010_4d52);
    }

    #[test]
    fn test_window_from_text() {
        let text = (1..=20).map(|n| format!("line {}", n)).collect::<Vec<_>>().join("\n");
        let window = window_from_text(&text, 10, 8, 12);
        assert_eq!(window.len(), 5);
        assert!(window[2].is_target);
        assert_eq!(window[0].text, "line 8");
    }
}
