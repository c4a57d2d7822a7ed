//! Target / fault mode

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultMode {
    /// Fault raised while the CPU was in kernel space
    Kernel,
    /// Fault raised by a user program
    User,
}

impl FaultMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultMode::Kernel => "kernel",
            FaultMode::User => "user",
        }
    }
}

impl std::fmt::Display for FaultMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FaultMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kernel" => Ok(FaultMode::Kernel),
            "user" => Ok(FaultMode::User),
            _ => Err(format!("Unknown fault mode: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!("kernel".parse::<FaultMode>().unwrap(), FaultMode::Kernel);
        assert_eq!("USER".parse::<FaultMode>().unwrap(), FaultMode::User);
        assert!("hypervisor".parse::<FaultMode>().is_err());
    }
}
