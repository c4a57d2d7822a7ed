//! Session data structure

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use faultline_snapshot::FaultMode;

use crate::error::SessionError;
use crate::state::SessionState;
use crate::Result;

/// Part of a run a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Build,
    Launch,
    Connect,
    Arm,
    Run,
    Capture,
}

impl Stage {
    /// Stage that was in progress while the session sat in `state`
    pub fn in_progress(state: SessionState) -> Self {
        match state {
            SessionState::Init | SessionState::Building => Stage::Launch,
            SessionState::Launched => Stage::Connect,
            SessionState::Connected => Stage::Arm,
            SessionState::Armed | SessionState::Running => Stage::Run,
            SessionState::Faulted
            | SessionState::Captured
            | SessionState::Done
            | SessionState::Error => Stage::Capture,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Build => "build",
            Stage::Launch => "launch",
            Stage::Connect => "connect",
            Stage::Arm => "arm",
            Stage::Run => "run",
            Stage::Capture => "capture",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "build" => Ok(Stage::Build),
            "launch" => Ok(Stage::Launch),
            "connect" => Ok(Stage::Connect),
            "arm" => Ok(Stage::Arm),
            "run" => Ok(Stage::Run),
            "capture" => Ok(Stage::Capture),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier
    pub id: String,
    pub mode: FaultMode,
    /// Test program invoked from the shell
    pub test_name: String,
    /// Debug stub port
    pub port: u16,
    pub work_dir: PathBuf,
    state: SessionState,
    transitions: Vec<Transition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(mode: FaultMode, test_name: impl Into<String>, port: u16, work_dir: PathBuf) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4().to_string(),
            mode,
            test_name: test_name.into(),
            port,
            work_dir,
            state: SessionState::Init,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state change so far, oldest first
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn transition_to(&mut self, target: SessionState) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(SessionError::IllegalTransition {
                from: self.state,
                to: target,
            });
        }

        let now = Utc::now();
        tracing::debug!(session_id = %self.id, from = %self.state, to = %target, "Session transition");
        self.transitions.push(Transition {
            from: self.state,
            to: target,
            at: now,
        });
        self.state = target;
        self.updated_at = now;
        Ok(())
    }

    /// Move to `Error` unless the session already ended
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            // every non-terminal state may fail
            let _ = self.transition_to(SessionState::Error);
        }
    }

    /// Where the transcript of this session is written
    pub fn log_path(&self) -> PathBuf {
        self.work_dir.join(format!("faultline-{}.log", self.id))
    }
}
