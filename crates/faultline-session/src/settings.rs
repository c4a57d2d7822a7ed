//! Session settings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use faultline_capture::{BreakpointSpec, CaptureSettings};
use faultline_snapshot::FaultMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Console banner printed once the shell accepts commands
    pub shell_prompt: String,
    pub boot_timeout_seconds: u64,
    /// How long the test gets to fault after it is invoked
    pub fault_timeout_seconds: u64,
    /// Transcript lines kept with a failure
    pub transcript_tail_lines: usize,
    /// Write the full transcript to the work dir after each run
    pub save_transcript: bool,
    pub source_root: Option<PathBuf>,
    pub source_radius: u32,
    pub disassembly_radius: usize,
    pub max_resolved_frames: usize,
    pub kernel_breakpoints: Vec<BreakpointSpec>,
    /// Halts user page faults at the trap entry; other user traps are
    /// only reported on the console
    pub user_breakpoints: Vec<BreakpointSpec>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let capture = CaptureSettings::default();
        Self {
            shell_prompt: "$ ".to_string(),
            boot_timeout_seconds: 60,
            fault_timeout_seconds: 20,
            transcript_tail_lines: 40,
            save_transcript: true,
            source_root: capture.source_root,
            source_radius: capture.source_radius,
            disassembly_radius: capture.disassembly_radius,
            max_resolved_frames: capture.max_resolved_frames,
            kernel_breakpoints: vec![BreakpointSpec::page_fault_vector()],
            user_breakpoints: vec![BreakpointSpec::page_fault_vector()],
        }
    }
}

impl SessionSettings {
    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_timeout_seconds)
    }

    pub fn fault_timeout(&self) -> Duration {
        Duration::from_secs(self.fault_timeout_seconds)
    }

    pub fn breakpoints(&self, mode: FaultMode) -> &[BreakpointSpec] {
        match mode {
            FaultMode::Kernel => &self.kernel_breakpoints,
            FaultMode::User => &self.user_breakpoints,
        }
    }

    /// Capture settings with `command_timeout` for each debugger command
    pub fn capture_settings(&self, command_timeout: Duration) -> CaptureSettings {
        CaptureSettings {
            command_timeout,
            source_root: self.source_root.clone(),
            source_radius: self.source_radius,
            disassembly_radius: self.disassembly_radius,
            max_resolved_frames: self.max_resolved_frames,
        }
    }
}
