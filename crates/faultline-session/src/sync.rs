//! Debugger / console synchronization
//!
//! Each step sends at most a few commands and blocks on one expected
//! pattern with its own timeout. Nothing is retried.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use faultline_capture::{parse, ArmedBreakpoint, BreakpointSpec, DebuggerConsole, PROMPT};
use faultline_channel::{ChannelError, Pattern, TranscriptChannel};

use crate::error::SessionError;
use crate::session::Stage;
use crate::settings::SessionSettings;
use crate::Result;

const PENDING_QUESTION: &str =
    r"(?i)breakpoint pending on future shared library load\? \(y or \[n\]\)";

const CONNECT_FAILURES: [&str; 4] = [
    "Connection refused",
    "Connection timed out",
    "Could not connect",
    "Remote connection closed",
];

/// Settings that keep the debugger from stopping to ask questions
const QUIET_COMMANDS: [&str; 5] = [
    "set pagination off",
    "set height 0",
    "set width 0",
    "set confirm off",
    "set breakpoint pending off",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    Startup,
    Attach,
    DisablePagination,
    Arm,
    Continue,
    AwaitShell,
    InvokeTest,
}

impl SyncStep {
    pub fn stage(&self) -> Stage {
        match self {
            SyncStep::Startup | SyncStep::Attach | SyncStep::DisablePagination => Stage::Connect,
            SyncStep::Arm => Stage::Arm,
            SyncStep::Continue | SyncStep::AwaitShell | SyncStep::InvokeTest => Stage::Run,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStep::Startup => "startup",
            SyncStep::Attach => "attach",
            SyncStep::DisablePagination => "disable_pagination",
            SyncStep::Arm => "arm",
            SyncStep::Continue => "continue",
            SyncStep::AwaitShell => "await_shell",
            SyncStep::InvokeTest => "invoke_test",
        }
    }
}

impl std::fmt::Display for SyncStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub struct Synchronizer<'a> {
    settings: &'a SessionSettings,
    session_id: &'a str,
    port: u16,
    /// Per-step timeout for debugger replies
    step_timeout: Duration,
}

impl<'a> Synchronizer<'a> {
    pub fn new(
        settings: &'a SessionSettings,
        session_id: &'a str,
        port: u16,
        step_timeout: Duration,
    ) -> Self {
        Self {
            settings,
            session_id,
            port,
            step_timeout,
        }
    }

    /// Startup, attach and quiet the debugger
    pub async fn connect(&self, gdb: &mut TranscriptChannel) -> Result<()> {
        self.startup(gdb).await?;
        self.attach(gdb).await?;
        self.disable_pagination(gdb).await
    }

    async fn startup(&self, gdb: &mut TranscriptChannel) -> Result<()> {
        let step = SyncStep::Startup;
        self.begin(step);

        let question = Pattern::regex(PENDING_QUESTION).map_err(|e| failed(step, e))?;
        let first = gdb
            .expect(&[Pattern::literal(PROMPT), question], self.step_timeout)
            .await
            .map_err(|e| failed(step, e))?;

        if first.index == 1 {
            tracing::debug!(session_id = %self.session_id, "Answering pending breakpoint question");
            gdb.send("y").await.map_err(|e| failed(step, e))?;
            DebuggerConsole::new(gdb)
                .wait_for_prompt(self.step_timeout)
                .await
                .map_err(|e| failed(step, e))?;
        }
        Ok(())
    }

    async fn attach(&self, gdb: &mut TranscriptChannel) -> Result<()> {
        let step = SyncStep::Attach;
        self.begin(step);

        let command = format!("target remote localhost:{}", self.port);
        let output = DebuggerConsole::new(gdb)
            .command(&command, self.step_timeout)
            .await
            .map_err(|e| failed(step, e))?;

        if let Some(reason) = CONNECT_FAILURES.iter().find(|f| output.contains(*f)) {
            return Err(SessionError::Rejected {
                step,
                reason: format!("{} on port {}", reason, self.port),
            });
        }
        if !output.contains("Remote debugging using") {
            return Err(SessionError::Rejected {
                step,
                reason: format!("no remote connection on port {}", self.port),
            });
        }

        tracing::info!(session_id = %self.session_id, port = self.port, "Debugger attached");
        Ok(())
    }

    async fn disable_pagination(&self, gdb: &mut TranscriptChannel) -> Result<()> {
        let step = SyncStep::DisablePagination;
        self.begin(step);

        let mut console = DebuggerConsole::new(gdb);
        for command in QUIET_COMMANDS {
            console
                .command(command, self.step_timeout)
                .await
                .map_err(|e| failed(step, e))?;
        }
        Ok(())
    }

    /// Set each breakpoint; every one must be confirmed with its number
    pub async fn arm(
        &self,
        gdb: &mut TranscriptChannel,
        specs: &[BreakpointSpec],
    ) -> Result<Vec<ArmedBreakpoint>> {
        let step = SyncStep::Arm;
        self.begin(step);

        let mut console = DebuggerConsole::new(gdb);
        let mut armed = Vec::with_capacity(specs.len());
        for spec in specs {
            let output = console
                .command(&format!("break {}", spec.location), self.step_timeout)
                .await
                .map_err(|e| failed(step, e))?;
            let set = parse::breakpoint_set(&output).map_err(|e| SessionError::Rejected {
                step,
                reason: format!("{}: {} ({})", spec.location, e, e.excerpt),
            })?;

            tracing::info!(
                session_id = %self.session_id,
                breakpoint = set.number,
                location = %spec.location,
                address = %format!("{:#x}", set.address),
                "Breakpoint armed"
            );
            armed.push(ArmedBreakpoint {
                number: set.number,
                address: set.address,
                spec: spec.clone(),
            });
        }
        Ok(armed)
    }

    /// Resume the target, wait for the shell and invoke the test
    pub async fn start(
        &self,
        gdb: &mut TranscriptChannel,
        console: &mut TranscriptChannel,
        test_name: &str,
    ) -> Result<()> {
        let step = SyncStep::Continue;
        self.begin(step);
        gdb.send("continue").await.map_err(|e| failed(step, e))?;
        gdb.expect_one(&Pattern::literal("Continuing."), self.step_timeout)
            .await
            .map_err(|e| failed(step, e))?;

        let step = SyncStep::AwaitShell;
        self.begin(step);
        console
            .expect_one(
                &Pattern::literal(self.settings.shell_prompt.as_str()),
                self.settings.boot_timeout(),
            )
            .await
            .map_err(|e| failed(step, e))?;
        tracing::info!(session_id = %self.session_id, "Shell ready");

        let step = SyncStep::InvokeTest;
        self.begin(step);
        console.send(test_name).await.map_err(|e| failed(step, e))?;
        tracing::info!(session_id = %self.session_id, test = %test_name, "Test invoked");
        Ok(())
    }

    fn begin(&self, step: SyncStep) {
        tracing::debug!(session_id = %self.session_id, step = %step, "Sync step");
    }
}

fn failed(step: SyncStep, source: ChannelError) -> SessionError {
    tracing::warn!(step = %step, error = %source, "Sync step failed");
    SessionError::Step { step, source }
}
