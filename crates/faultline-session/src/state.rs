//! Session State Machine
//!
//! ```text
//! Init → Building → Launched → Connected → Armed → Running → Faulted → Captured → Done
//!   ╰──────────────────────────── any non-terminal ───────────────────────────→ Error
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, nothing started yet
    Init,
    /// Target images are being built
    Building,
    /// Emulator halted at reset and debugger started
    Launched,
    /// Debugger attached to the stub
    Connected,
    /// Breakpoints accepted
    Armed,
    /// Target resumed and the test invoked
    Running,
    /// A fault was observed
    Faulted,
    /// Snapshot assembled
    Captured,
    Done,
    Error,
}

impl SessionState {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;
        match (self, target) {
            (Init, Building)
            | (Building, Launched)
            | (Launched, Connected)
            | (Connected, Armed)
            | (Armed, Running)
            | (Running, Faulted)
            | (Faulted, Captured)
            | (Captured, Done) => true,
            (from, Error) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Init => "init",
            SessionState::Building => "building",
            SessionState::Launched => "launched",
            SessionState::Connected => "connected",
            SessionState::Armed => "armed",
            SessionState::Running => "running",
            SessionState::Faulted => "faulted",
            SessionState::Captured => "captured",
            SessionState::Done => "done",
            SessionState::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "init" => Ok(SessionState::Init),
            "building" => Ok(SessionState::Building),
            "launched" => Ok(SessionState::Launched),
            "connected" => Ok(SessionState::Connected),
            "armed" => Ok(SessionState::Armed),
            "running" => Ok(SessionState::Running),
            "faulted" => Ok(SessionState::Faulted),
            "captured" => Ok(SessionState::Captured),
            "done" => Ok(SessionState::Done),
            "error" => Ok(SessionState::Error),
            _ => Err(format!("Unknown session state: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(SessionState::Init.can_transition_to(SessionState::Building));
        assert!(SessionState::Armed.can_transition_to(SessionState::Running));
        assert!(SessionState::Captured.can_transition_to(SessionState::Done));
        // error from anywhere still running
        assert!(SessionState::Init.can_transition_to(SessionState::Error));
        assert!(SessionState::Faulted.can_transition_to(SessionState::Error));
    }

    #[test]
    fn test_invalid_transitions() {
        // no skipping ahead
        assert!(!SessionState::Launched.can_transition_to(SessionState::Armed));
        assert!(!SessionState::Running.can_transition_to(SessionState::Done));
        // no going back
        assert!(!SessionState::Armed.can_transition_to(SessionState::Connected));
        // terminal states stay put
        assert!(!SessionState::Done.can_transition_to(SessionState::Error));
        assert!(!SessionState::Error.can_transition_to(SessionState::Error));
        assert!(!SessionState::Done.can_transition_to(SessionState::Done));
    }

    #[test]
    fn test_round_trip_names() {
        for state in [SessionState::Init, SessionState::Faulted, SessionState::Error] {
            assert_eq!(state.as_str().parse::<SessionState>().unwrap(), state);
        }
        assert!("paused".parse::<SessionState>().is_err());
    }
}
