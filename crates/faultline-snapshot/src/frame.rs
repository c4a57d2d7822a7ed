//! Backtrace frames

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// One backtrace frame, innermost first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub level: u32,
    /// Absent for frame 0 when the debugger prints only the function
    pub address: Option<u64>,
    /// `None` when the debugger printed `??`
    pub function: Option<String>,
    pub location: Option<SourceLocation>,
}

impl std::fmt::Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:<2}", self.level)?;
        if let Some(address) = self.address {
            write!(f, " {:#018x} in", address)?;
        }
        write!(f, " {}", self.function.as_deref().unwrap_or("??"))?;
        if let Some(location) = &self.location {
            write!(f, " at {}", location)?;
        }
        Ok(())
    }
}
