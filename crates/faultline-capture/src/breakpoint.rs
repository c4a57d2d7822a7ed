//! Breakpoint specifications

use serde::{Deserialize, Serialize};

use faultline_channel::{ChannelError, Pattern};

/// A location to halt at and the output that shows it was reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointSpec {
    /// `file:line` or `function[+offset]`, passed to `break` as-is
    pub location: String,
    /// Regex signalling the hit; defaults to `Breakpoint N, `
    #[serde(default)]
    pub hit_pattern: Option<String>,
    /// Trap vector this location handles, when it handles exactly one
    #[serde(default)]
    pub trap: Option<u32>,
}

impl BreakpointSpec {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            hit_pattern: None,
            trap: None,
        }
    }

    pub fn with_hit_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.hit_pattern = Some(pattern.into());
        self
    }

    pub fn with_trap(mut self, trap: u32) -> Self {
        self.trap = Some(trap);
        self
    }

    /// The page-fault entry stub
    pub fn page_fault_vector() -> Self {
        Self::new("vectors.S:56").with_trap(14)
    }
}

/// A spec the debugger has accepted, with its assigned number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmedBreakpoint {
    pub number: u32,
    pub address: u64,
    pub spec: BreakpointSpec,
}

impl ArmedBreakpoint {
    pub fn hit_pattern(&self) -> Result<Pattern, ChannelError> {
        match &self.spec.hit_pattern {
            Some(expr) => Pattern::regex(expr),
            None => Ok(Pattern::literal(format!("Breakpoint {}, ", self.number))),
        }
    }
}
