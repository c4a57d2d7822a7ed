//! Supervisor errors

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use faultline_channel::ChannelError;

/// Fatal problems starting a process, raised before any target state exists
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchFailure {
    #[error("Port {port} is already bound")]
    PortBusy { port: u16 },

    #[error("Binary not found: {binary}")]
    BinaryMissing { binary: String },

    #[error("Image not found: {}", path.display())]
    ImageMissing { path: PathBuf },

    #[error("Failed to spawn {binary}: {reason}")]
    SpawnFailed { binary: String, reason: String },

    #[error("Debug stub on port {port} not listening after {waited:?}")]
    StubUnavailable { port: u16, waited: Duration },
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Launch(#[from] LaunchFailure),

    #[error("Build failed: {message}")]
    Build {
        message: String,
        output_tail: Vec<String>,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
