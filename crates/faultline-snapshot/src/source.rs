//! Symbol, source and disassembly context for captured addresses

use serde::{Deserialize, Serialize};

use crate::captured::Captured;
use crate::frame::SourceLocation;

/// Nearest symbol for an address, as reported by `info symbol`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRef {
    pub symbol: String,
    pub offset: u64,
    pub section: Option<String>,
}

impl std::fmt::Display for SymbolRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.offset == 0 {
            write!(f, "{}", self.symbol)
        } else {
            write!(f, "{}+{}", self.symbol, self.offset)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLine {
    pub number: u32,
    pub text: String,
    /// The line the address maps to
    pub is_target: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "granularity", rename_all = "snake_case")]
pub enum SourceContext {
    /// Exact line plus a window of surrounding source
    Lines {
        location: SourceLocation,
        window: Vec<SourceLine>,
    },
    /// No line information; only the enclosing function is known
    Function { symbol: String },
}

impl SourceContext {
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            SourceContext::Lines { location, .. } => Some(location),
            SourceContext::Function { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum AddressRole {
    InstructionPointer,
    /// `depth` 1 is the innermost caller
    ReturnAddress { depth: u32 },
}

impl std::fmt::Display for AddressRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressRole::InstructionPointer => write!(f, "ip"),
            AddressRole::ReturnAddress { depth } => write!(f, "ret#{}", depth),
        }
    }
}

/// Everything learned about one address on the fault path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAddress {
    pub address: u64,
    pub role: AddressRole,
    pub symbol: Captured<SymbolRef>,
    pub source: Captured<SourceContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisassemblyAnchor {
    InstructionPointer,
    /// The IP was unreadable; the window sits on the innermost return address
    CallingSite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub address: u64,
    /// `<symbol+offset>` as printed by the debugger
    pub location: Option<String>,
    pub text: String,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disassembly {
    pub anchor: u64,
    pub anchor_kind: DisassemblyAnchor,
    pub instructions: Vec<Instruction>,
}

impl Disassembly {
    /// Keep at most `radius` instructions either side of the anchor
    pub fn windowed(mut self, radius: usize) -> Self {
        let centre = self
            .instructions
            .iter()
            .position(|i| i.is_current)
            .or_else(|| {
                self.instructions
                    .iter()
                    .position(|i| i.address >= self.anchor)
            })
            .unwrap_or(0);
        let start = centre.saturating_sub(radius);
        let end = (centre + radius + 1).min(self.instructions.len());
        self.instructions = self.instructions.drain(start..end).collect();
        self
    }

    pub fn current(&self) -> Option<&Instruction> {
        self.instructions.iter().find(|i| i.is_current)
    }
}
