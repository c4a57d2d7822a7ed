//! Session runner

use std::path::PathBuf;

use faultline_capture::{FaultDetector, StateCapturer};
use faultline_channel::Transcript;
use faultline_snapshot::{CrashSnapshot, FaultMode};
use faultline_supervisor::{Builder, ProcessSupervisor, Spawner};

use crate::error::{SessionError, SessionFailure};
use crate::session::Session;
use crate::settings::SessionSettings;
use crate::state::SessionState;
use crate::sync::Synchronizer;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub test_name: String,
    pub mode: FaultMode,
}

impl RunRequest {
    pub fn new(test_name: impl Into<String>, mode: FaultMode) -> Self {
        Self {
            test_name: test_name.into(),
            mode,
        }
    }
}

/// A finished session: at most one snapshot, or the stage that failed
#[derive(Debug)]
pub struct SessionOutcome {
    pub session: Session,
    pub result: std::result::Result<CrashSnapshot, SessionFailure>,
    pub transcript: Transcript,
    /// Where the transcript was written, if it was
    pub log_path: Option<PathBuf>,
}

impl SessionOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn snapshot(&self) -> Option<&CrashSnapshot> {
        self.result.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        self.result.as_ref().err()
    }
}

pub struct SessionRunner {
    settings: SessionSettings,
}

impl SessionRunner {
    pub fn new(settings: SessionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Run one session end to end. The processes are torn down on every
    /// path before the outcome is returned.
    pub async fn run<S: Spawner, B: Builder>(
        &self,
        supervisor: &mut ProcessSupervisor<S, B>,
        request: &RunRequest,
    ) -> SessionOutcome {
        let transcript = supervisor.new_transcript();
        let mut session = Session::new(
            request.mode,
            request.test_name.as_str(),
            supervisor.port(),
            supervisor.config().work_dir.clone(),
        );

        tracing::info!(
            session_id = %session.id(),
            test = %request.test_name,
            mode = %request.mode,
            port = supervisor.port(),
            "Session started"
        );

        let driven = self.drive(supervisor, &mut session).await;
        supervisor.teardown().await;

        let result = match driven {
            Ok(snapshot) => match session.transition_to(SessionState::Done) {
                Ok(()) => Ok(snapshot),
                Err(e) => Err(self.failure(&mut session, &e, &transcript)),
            },
            Err(e) => Err(self.failure(&mut session, &e, &transcript)),
        };

        let log_path = self.save_transcript(&session, &transcript);

        match &result {
            Ok(snapshot) => tracing::info!(
                session_id = %session.id(),
                fingerprint = %snapshot.fingerprint(),
                missing = ?snapshot.missing_fields(),
                "Session done"
            ),
            Err(failure) => tracing::error!(
                session_id = %session.id(),
                stage = %failure.stage,
                kind = %failure.kind,
                error = %failure.message,
                "Session failed"
            ),
        }

        SessionOutcome {
            session,
            result,
            transcript,
            log_path,
        }
    }

    async fn drive<S: Spawner, B: Builder>(
        &self,
        supervisor: &mut ProcessSupervisor<S, B>,
        session: &mut Session,
    ) -> Result<CrashSnapshot> {
        let session_id = session.id().to_string();
        let mode = session.mode;
        let test_name = session.test_name.clone();

        supervisor.reset().await?;
        session.transition_to(SessionState::Building)?;
        supervisor.launch_target(mode, &test_name).await?;
        supervisor.launch_debugger().await?;
        session.transition_to(SessionState::Launched)?;

        let step_timeout = supervisor.config().timeout();
        let port = supervisor.port();
        let (gdb, console) = supervisor.channels_mut().ok_or(SessionError::NotLaunched)?;
        let sync = Synchronizer::new(&self.settings, &session_id, port, step_timeout);

        sync.connect(gdb).await?;
        session.transition_to(SessionState::Connected)?;

        let armed = sync.arm(gdb, self.settings.breakpoints(mode)).await?;
        session.transition_to(SessionState::Armed)?;

        sync.start(gdb, console, &test_name).await?;
        session.transition_to(SessionState::Running)?;

        let detector = FaultDetector::new(armed, step_timeout)?;
        let event = detector
            .wait_for_fault(gdb, console, self.settings.fault_timeout())
            .await?;
        session.transition_to(SessionState::Faulted)?;

        let capture = self.settings.capture_settings(step_timeout);
        let snapshot = StateCapturer::new(gdb, &capture)
            .capture(&session_id, &test_name, mode, event)
            .await?
            .assemble()?;
        session.transition_to(SessionState::Captured)?;

        Ok(snapshot)
    }

    fn failure(
        &self,
        session: &mut Session,
        error: &SessionError,
        transcript: &Transcript,
    ) -> SessionFailure {
        let failure = SessionFailure::new(
            error,
            session.state(),
            transcript.tail(self.settings.transcript_tail_lines),
        );
        session.fail();
        failure
    }

    fn save_transcript(&self, session: &Session, transcript: &Transcript) -> Option<PathBuf> {
        if !self.settings.save_transcript {
            return None;
        }
        let path = session.log_path();
        match transcript.save_to(&path) {
            Ok(()) => {
                tracing::debug!(session_id = %session.id(), path = %path.display(), "Transcript saved");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id(), error = %e, "Failed to save transcript");
                None
            }
        }
    }
}
