//! Process handles

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Child;

use faultline_channel::TranscriptChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    Emulator,
    Debugger,
}

impl ProcessRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessRole::Emulator => "emulator",
            ProcessRole::Debugger => "debugger",
        }
    }

    /// Transcript source name for this role's channel
    pub fn channel_name(&self) -> &'static str {
        match self {
            ProcessRole::Emulator => "console",
            ProcessRole::Debugger => "gdb",
        }
    }
}

impl std::fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

type Probe = Box<dyn Fn() -> bool + Send + Sync>;
type Stop = Box<dyn Fn() + Send + Sync>;

enum Backing {
    Os(Child),
    InMemory { running: Probe, stop: Stop },
    Exited,
}

/// One spawned process and its transcript channel.
///
/// Termination is idempotent. OS children are killed on drop; in-memory
/// peers are stopped on drop.
pub struct ProcessHandle {
    role: ProcessRole,
    pid: Option<u32>,
    channel: TranscriptChannel,
    backing: Backing,
}

impl ProcessHandle {
    pub fn os(role: ProcessRole, child: Child, channel: TranscriptChannel) -> Self {
        Self {
            role,
            pid: child.id(),
            channel,
            backing: Backing::Os(child),
        }
    }

    pub fn in_memory<R, S>(role: ProcessRole, channel: TranscriptChannel, running: R, stop: S) -> Self
    where
        R: Fn() -> bool + Send + Sync + 'static,
        S: Fn() + Send + Sync + 'static,
    {
        Self {
            role,
            pid: None,
            channel,
            backing: Backing::InMemory {
                running: Box::new(running),
                stop: Box::new(stop),
            },
        }
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn channel(&self) -> &TranscriptChannel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut TranscriptChannel {
        &mut self.channel
    }

    pub fn is_alive(&mut self) -> bool {
        match &mut self.backing {
            Backing::Os(child) => matches!(child.try_wait(), Ok(None)),
            Backing::InMemory { running, .. } => running(),
            Backing::Exited => false,
        }
    }

    /// Exit status text when the process has already exited
    pub(crate) fn exit_status(&mut self) -> Option<String> {
        match &mut self.backing {
            Backing::Os(child) => match child.try_wait() {
                Ok(Some(status)) => Some(status.to_string()),
                _ => None,
            },
            Backing::InMemory { running, .. } => {
                (!running()).then(|| "peer stopped".to_string())
            }
            Backing::Exited => Some("terminated".to_string()),
        }
    }

    /// Wait up to `grace` for a voluntary exit, then kill
    pub async fn terminate(&mut self, grace: Duration) {
        match std::mem::replace(&mut self.backing, Backing::Exited) {
            Backing::Os(mut child) => {
                if let Ok(Some(status)) = child.try_wait() {
                    tracing::debug!(role = %self.role, pid = ?self.pid, %status, "Process already exited");
                } else {
                    match tokio::time::timeout(grace, child.wait()).await {
                        Ok(Ok(status)) => {
                            tracing::debug!(role = %self.role, pid = ?self.pid, %status, "Process exited");
                        }
                        _ => {
                            if let Err(e) = child.kill().await {
                                tracing::warn!(role = %self.role, pid = ?self.pid, error = %e, "Failed to kill process");
                            } else {
                                tracing::debug!(role = %self.role, pid = ?self.pid, "Process killed");
                            }
                        }
                    }
                }
            }
            Backing::InMemory { stop, .. } => stop(),
            Backing::Exited => return,
        }
        self.channel.close_input().await;
        tracing::info!(role = %self.role, pid = ?self.pid, "Process terminated");
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Backing::InMemory { stop, .. } = &self.backing {
            stop();
        }
    }
}

/// Deliver a signal to a pid we recorded ourselves
#[cfg(unix)]
pub(crate) fn send_signal(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .ok()
        .filter(|p| *p > 1)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "refusing pid"))?;
    // SAFETY: kill(2) takes plain integers and touches no memory of ours
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_channel::scripted::{self, Script};
    use faultline_channel::Transcript;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_in_memory_terminate_is_idempotent() {
        let (channel, peer) = scripted::channel("gdb", Script::new(), Transcript::new());
        let peer = Arc::new(peer);
        let running = Arc::clone(&peer);
        let stop = Arc::clone(&peer);
        let mut handle = ProcessHandle::in_memory(
            ProcessRole::Debugger,
            channel,
            move || running.is_running(),
            move || stop.stop(),
        );

        assert!(handle.is_alive());
        handle.terminate(Duration::ZERO).await;
        handle.terminate(Duration::ZERO).await;
        assert!(!handle.is_alive());
        assert_eq!(handle.exit_status().as_deref(), Some("terminated"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_os_process_killed_after_grace() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let stdin = child.stdin.take().unwrap();
        let stdout = child.stdout.take().unwrap();
        let channel = TranscriptChannel::spawn(
            "sleep",
            Box::new(stdin),
            vec![Box::new(stdout)],
            Transcript::new(),
        );
        let mut handle = ProcessHandle::os(ProcessRole::Emulator, child, channel);
        assert!(handle.pid().is_some());
        assert!(handle.is_alive());

        handle.terminate(Duration::from_millis(50)).await;
        assert!(!handle.is_alive());
    }

    #[cfg(unix)]
    #[test]
    fn test_refuses_special_pids() {
        assert!(send_signal(0, libc::SIGKILL).is_err());
        assert!(send_signal(1, libc::SIGKILL).is_err());
    }
}
