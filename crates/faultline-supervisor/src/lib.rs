//! Faultline Process Supervisor
//!
//! Owns the emulator and debugger processes for one session:
//! - `reset` reclaims the debug-stub port from stale runs
//! - `launch_target` builds and boots the emulator with its stub listening
//! - `launch_debugger` starts the debugger with a transcript channel
//! - `teardown` stops both, debugger first

mod builder;
mod config;
mod error;
mod port;
mod process;
mod spawner;
mod supervisor;

#[cfg(any(test, feature = "testing"))]
pub mod scripted;

pub use builder::{Builder, CommandBuilder, NoBuild};
pub use config::SupervisorConfig;
pub use error::{LaunchFailure, SupervisorError};
pub use port::is_port_free;
pub use process::{ProcessHandle, ProcessRole};
pub use spawner::{LaunchSpec, OsSpawner, Spawner};
pub use supervisor::ProcessSupervisor;

pub type Result<T> = std::result::Result<T, SupervisorError>;
