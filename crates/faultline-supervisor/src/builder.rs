//! Build collaborator

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

use faultline_snapshot::FaultMode;

use crate::error::{LaunchFailure, SupervisorError};
use crate::Result;

const OUTPUT_TAIL_LINES: usize = 20;

/// Produces the kernel and disk images before the emulator starts
pub trait Builder: Send {
    fn build(&mut self, mode: FaultMode, test: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Runs the configured build command (`make` by default) in the build dir.
/// `FAULTLINE_MODE` and `FAULTLINE_TEST` are exported to the build.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    build_dir: PathBuf,
    command: Vec<String>,
}

impl CommandBuilder {
    pub fn new(build_dir: PathBuf, command: Vec<String>) -> Self {
        Self { build_dir, command }
    }
}

impl Builder for CommandBuilder {
    async fn build(&mut self, mode: FaultMode, test: &str) -> Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            tracing::debug!("No build command configured");
            return Ok(());
        };

        let binary = which::which(program).map_err(|_| LaunchFailure::BinaryMissing {
            binary: program.clone(),
        })?;

        tracing::info!(
            build_dir = %self.build_dir.display(),
            command = ?self.command,
            mode = %mode,
            test = %test,
            "Building target"
        );

        let output = Command::new(binary)
            .args(args)
            .current_dir(&self.build_dir)
            .env("FAULTLINE_MODE", mode.as_str())
            .env("FAULTLINE_TEST", test)
            .stdin(Stdio::null())
            .output()
            .await?;

        if output.status.success() {
            tracing::info!("Build succeeded");
            return Ok(());
        }

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let lines: Vec<&str> = text.lines().collect();
        let output_tail = lines[lines.len().saturating_sub(OUTPUT_TAIL_LINES)..]
            .iter()
            .map(|l| l.to_string())
            .collect();

        tracing::error!(status = %output.status, "Build failed");
        Err(SupervisorError::Build {
            message: format!("{} exited with {}", program, output.status),
            output_tail,
        })
    }
}

/// Skips the build; images are expected to exist already
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBuild;

impl Builder for NoBuild {
    async fn build(&mut self, mode: FaultMode, test: &str) -> Result<()> {
        tracing::debug!(mode = %mode, test = %test, "Build skipped");
        Ok(())
    }
}
