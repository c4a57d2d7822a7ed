//! Session error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

use faultline_capture::CaptureError;
use faultline_channel::ChannelError;
use faultline_snapshot::AssemblyError;
use faultline_supervisor::SupervisorError;

use crate::session::Stage;
use crate::state::SessionState;
use crate::sync::SyncStep;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Illegal session transition: {from} -> {to}")]
    IllegalTransition { from: SessionState, to: SessionState },

    #[error("Step {step} failed: {source}")]
    Step { step: SyncStep, source: ChannelError },

    #[error("Step {step} rejected: {reason}")]
    Rejected { step: SyncStep, reason: String },

    #[error("Emulator and debugger are not both running")]
    NotLaunched,

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("Snapshot incomplete: {0}")]
    Assembly(#[from] AssemblyError),
}

impl SessionError {
    /// Synchronization step that failed, if any
    pub fn step(&self) -> Option<SyncStep> {
        match self {
            SessionError::Step { step, .. } | SessionError::Rejected { step, .. } => Some(*step),
            _ => None,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            SessionError::Supervisor(SupervisorError::Build { .. }) => FailureKind::Build,
            SessionError::Supervisor(SupervisorError::Launch(_) | SupervisorError::Io(_)) => {
                FailureKind::Launch
            }
            SessionError::Supervisor(SupervisorError::Channel(e))
            | SessionError::Step { source: e, .. }
            | SessionError::Capture(CaptureError::Channel(e)) => FailureKind::from_channel(e),
            SessionError::Rejected { .. } => FailureKind::Rejected,
            SessionError::Capture(CaptureError::NoFaultObserved { .. }) => FailureKind::NoFault,
            SessionError::Assembly(_) => FailureKind::Incomplete,
            SessionError::IllegalTransition { .. } | SessionError::NotLaunched => {
                FailureKind::Internal
            }
        }
    }

    /// Stage to blame, given the state the session was in when this happened
    pub fn stage(&self, state: SessionState) -> Stage {
        if let SessionError::Supervisor(SupervisorError::Build { .. }) = self {
            return Stage::Build;
        }
        match self.step() {
            Some(step) => step.stage(),
            None => Stage::in_progress(state),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Build,
    Launch,
    Timeout,
    Closed,
    Rejected,
    NoFault,
    Incomplete,
    Internal,
}

impl FailureKind {
    fn from_channel(error: &ChannelError) -> Self {
        if error.is_timeout() {
            FailureKind::Timeout
        } else if error.is_closed() {
            FailureKind::Closed
        } else {
            FailureKind::Internal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Build => "build",
            FailureKind::Launch => "launch",
            FailureKind::Timeout => "timeout",
            FailureKind::Closed => "closed",
            FailureKind::Rejected => "rejected",
            FailureKind::NoFault => "no_fault",
            FailureKind::Incomplete => "incomplete",
            FailureKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a failed session reports once its processes are gone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub stage: Stage,
    /// Synchronization step, when one failed
    pub step: Option<String>,
    pub kind: FailureKind,
    pub message: String,
    /// Last lines of the combined transcript
    pub transcript_tail: Vec<String>,
}

impl SessionFailure {
    pub fn new(error: &SessionError, state: SessionState, mut transcript_tail: Vec<String>) -> Self {
        if let SessionError::Supervisor(SupervisorError::Build { output_tail, .. }) = error {
            // the build never reaches the transcript
            transcript_tail = output_tail.clone();
        }
        Self {
            stage: error.stage(state),
            step: error.step().map(|s| s.as_str().to_string()),
            kind: error.kind(),
            message: error.to_string(),
            transcript_tail,
        }
    }
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed", self.stage)?;
        if let Some(step) = &self.step {
            write!(f, " at {}", step)?;
        }
        write!(f, " ({}): {}", self.kind, self.message)
    }
}
