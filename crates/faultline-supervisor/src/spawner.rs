//! Process spawning

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use faultline_channel::{Transcript, TranscriptChannel};

use crate::error::LaunchFailure;
use crate::port;
use crate::process::{ProcessHandle, ProcessRole};
use crate::Result;

/// Everything needed to start one process
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub role: ProcessRole,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Port the process must be listening on before it counts as started
    pub ready_port: Option<u16>,
    pub ready_timeout: Duration,
}

/// Turns a `LaunchSpec` into a running process with a transcript channel
pub trait Spawner: Send {
    fn spawn(
        &mut self,
        spec: LaunchSpec,
        transcript: Transcript,
    ) -> impl Future<Output = Result<ProcessHandle>> + Send;
}

/// Spawns real OS processes with piped stdio
#[derive(Debug, Clone, Copy, Default)]
pub struct OsSpawner;

impl Spawner for OsSpawner {
    async fn spawn(&mut self, spec: LaunchSpec, transcript: Transcript) -> Result<ProcessHandle> {
        let binary = which::which(&spec.program).map_err(|_| LaunchFailure::BinaryMissing {
            binary: spec.program.clone(),
        })?;

        let mut cmd = Command::new(&binary);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("TERM", "dumb")
            .kill_on_drop(true);

        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }

        let spawn_failed = |reason: String| LaunchFailure::SpawnFailed {
            binary: spec.program.clone(),
            reason,
        };

        let mut child = cmd.spawn().map_err(|e| spawn_failed(e.to_string()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_failed("stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_failed("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_failed("stderr not captured".to_string()))?;

        #[allow(unused_mut)]
        let mut channel = TranscriptChannel::spawn(
            spec.role.channel_name(),
            Box::new(stdin),
            vec![Box::new(stdout), Box::new(stderr)],
            transcript,
        );

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            channel.set_interrupt_hook(move || crate::process::send_signal(pid, libc::SIGINT));
        }

        tracing::info!(
            role = %spec.role,
            pid = ?child.id(),
            program = %binary.display(),
            args = ?spec.args,
            "Spawned process"
        );

        let mut handle = ProcessHandle::os(spec.role, child, channel);

        if let Some(ready_port) = spec.ready_port {
            port::wait_until_listening(ready_port, spec.ready_timeout, || {
                match handle.exit_status() {
                    Some(status) => Err(spawn_failed(format!(
                        "exited before listening on port {}: {}",
                        ready_port, status
                    ))),
                    None => Ok(()),
                }
            })
            .await?;
            tracing::info!(role = %spec.role, port = ready_port, "Debug stub listening");
        }

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(program: &str, args: &[&str]) -> LaunchSpec {
        LaunchSpec {
            role: ProcessRole::Debugger,
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: None,
            env: Vec::new(),
            ready_port: None,
            ready_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let result = OsSpawner
            .spawn(spec("nonexistent_debugger_12345", &[]), Transcript::new())
            .await;
        match result {
            Err(crate::SupervisorError::Launch(LaunchFailure::BinaryMissing { binary })) => {
                assert_eq!(binary, "nonexistent_debugger_12345");
            }
            other => panic!("unexpected result: {:?}", other.map(|h| h.role())),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawned_channel_round_trip() {
        let transcript = Transcript::new();
        let mut handle = OsSpawner
            .spawn(spec("cat", &[]), transcript.clone())
            .await
            .unwrap();

        handle.channel_mut().send("hello (gdb) ").await.unwrap();
        let m = handle
            .channel_mut()
            .expect_one(&"(gdb) ".into(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(m.before.contains("hello"));

        handle.terminate(Duration::ZERO).await;
        assert_eq!(transcript.sent_to("gdb"), vec!["hello (gdb) "]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_before_listening() {
        let port = {
            let probe = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
            probe.local_addr().unwrap().port()
        };
        let mut launch = spec("true", &[]);
        launch.role = ProcessRole::Emulator;
        launch.ready_port = Some(port);
        launch.ready_timeout = Duration::from_secs(5);

        let result = OsSpawner.spawn(launch, Transcript::new()).await;
        assert!(matches!(
            result,
            Err(crate::SupervisorError::Launch(LaunchFailure::SpawnFailed { .. }))
        ));
    }
}
