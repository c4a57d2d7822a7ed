//! Process supervisor

use std::path::{Path, PathBuf};
use std::time::Duration;

use faultline_channel::{Transcript, TranscriptChannel};
use faultline_snapshot::FaultMode;

use crate::builder::{Builder, CommandBuilder};
use crate::config::SupervisorConfig;
use crate::error::LaunchFailure;
use crate::port;
use crate::process::{ProcessHandle, ProcessRole};
use crate::spawner::{LaunchSpec, OsSpawner, Spawner};
use crate::Result;

pub struct ProcessSupervisor<S: Spawner = OsSpawner, B: Builder = CommandBuilder> {
    config: SupervisorConfig,
    spawner: S,
    builder: B,
    /// Shared by both channels
    transcript: Transcript,
    emulator: Option<ProcessHandle>,
    debugger: Option<ProcessHandle>,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let builder = CommandBuilder::new(config.build_dir.clone(), config.build_command.clone());
        Self::with_parts(config, OsSpawner, builder)
    }
}

impl<S: Spawner, B: Builder> ProcessSupervisor<S, B> {
    pub fn with_parts(config: SupervisorConfig, spawner: S, builder: B) -> Self {
        Self {
            config,
            spawner,
            builder,
            transcript: Transcript::new(),
            emulator: None,
            debugger: None,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn spawner(&self) -> &S {
        &self.spawner
    }

    /// Transcript of both channels for the current run
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Start a fresh transcript for the next run
    pub fn new_transcript(&mut self) -> Transcript {
        self.transcript = Transcript::new();
        self.transcript.clone()
    }

    /// Kill leftovers from a previous run on our port and wait for it to free up
    pub async fn reset(&mut self) -> Result<()> {
        let port = self.config.port;
        let stale = self.read_pid_file();

        self.teardown().await;

        #[cfg(unix)]
        for (role, pid) in &stale {
            if !self.owns_stale(*role, *pid) {
                tracing::warn!(role = %role, pid, "Pid no longer ours, not signalling");
                continue;
            }
            match crate::process::send_signal(*pid, libc::SIGKILL) {
                Ok(()) => tracing::info!(role = %role, pid, "Killed stale process"),
                Err(e) => tracing::debug!(role = %role, pid, error = %e, "Stale process already gone"),
            }
        }
        #[cfg(not(unix))]
        if !stale.is_empty() {
            tracing::warn!(count = stale.len(), "Cannot signal stale processes on this platform");
        }

        if !port::is_port_free(port) {
            tracing::warn!(port, "Stub port still bound, killing stale emulator");
            self.kill_port_holders().await;
        }

        port::wait_until_free(port, self.config.timeout()).await?;
        tracing::info!(port, "Stub port free");
        Ok(())
    }

    /// Build, then boot the emulator halted with its debug stub on the port
    pub async fn launch_target(&mut self, mode: FaultMode, test: &str) -> Result<()> {
        let port = self.config.port;
        self.builder.build(mode, test).await?;

        if !port::is_port_free(port) {
            return Err(LaunchFailure::PortBusy { port }.into());
        }
        for path in self.config.disk_paths() {
            if !path.exists() {
                return Err(LaunchFailure::ImageMissing { path }.into());
            }
        }

        let spec = LaunchSpec {
            role: ProcessRole::Emulator,
            program: self.config.emulator_binary.clone(),
            args: self.config.emulator_command_args(),
            cwd: Some(self.config.build_dir.clone()),
            env: Vec::new(),
            ready_port: Some(port),
            ready_timeout: self.config.timeout(),
        };
        let handle = self.spawner.spawn(spec, self.transcript.clone()).await?;
        tracing::info!(pid = ?handle.pid(), port, test = %test, "Emulator launched");

        self.emulator = Some(handle);
        self.write_pid_file()?;
        Ok(())
    }

    /// Start the debugger against the kernel image
    pub async fn launch_debugger(&mut self) -> Result<()> {
        let kernel = self.config.kernel_path();
        if !kernel.exists() {
            return Err(LaunchFailure::ImageMissing { path: kernel }.into());
        }

        let spec = LaunchSpec {
            role: ProcessRole::Debugger,
            program: self.config.debugger_binary.clone(),
            args: self.config.debugger_command_args(),
            cwd: Some(self.config.build_dir.clone()),
            env: Vec::new(),
            ready_port: None,
            ready_timeout: self.config.timeout(),
        };
        let handle = self.spawner.spawn(spec, self.transcript.clone()).await?;
        tracing::info!(pid = ?handle.pid(), "Debugger launched");

        self.debugger = Some(handle);
        self.write_pid_file()?;
        Ok(())
    }

    /// Stop the debugger, then the emulator. Safe to call repeatedly.
    pub async fn teardown(&mut self) {
        if let Some(mut debugger) = self.debugger.take() {
            if debugger.is_alive() {
                if let Err(e) = debugger.channel_mut().send("quit").await {
                    tracing::debug!(error = %e, "Debugger did not take quit");
                }
            }
            debugger.terminate(self.config.teardown_grace()).await;
        }

        if let Some(mut emulator) = self.emulator.take() {
            emulator.terminate(Duration::ZERO).await;
        }

        let pid_file = self.config.pid_file();
        match std::fs::remove_file(&pid_file) {
            Ok(()) => tracing::debug!(path = %pid_file.display(), "Removed pid file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %pid_file.display(), error = %e, "Failed to remove pid file"),
        }
    }

    /// Debugger and console channels, once both processes are up
    pub fn channels_mut(&mut self) -> Option<(&mut TranscriptChannel, &mut TranscriptChannel)> {
        match (self.debugger.as_mut(), self.emulator.as_mut()) {
            (Some(debugger), Some(emulator)) => {
                Some((debugger.channel_mut(), emulator.channel_mut()))
            }
            _ => None,
        }
    }

    pub fn is_alive(&mut self, role: ProcessRole) -> bool {
        let handle = match role {
            ProcessRole::Emulator => self.emulator.as_mut(),
            ProcessRole::Debugger => self.debugger.as_mut(),
        };
        handle.map_or(false, |h| h.is_alive())
    }

    fn pid_file_path(&self) -> PathBuf {
        self.config.pid_file()
    }

    fn write_pid_file(&self) -> Result<()> {
        let mut contents = String::new();
        for handle in [&self.emulator, &self.debugger].into_iter().flatten() {
            if let Some(pid) = handle.pid() {
                contents.push_str(&format!("{} {}\n", handle.role(), pid));
            }
        }
        if contents.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.config.work_dir)?;
        std::fs::write(self.pid_file_path(), contents)?;
        Ok(())
    }

    fn read_pid_file(&self) -> Vec<(ProcessRole, u32)> {
        let Ok(contents) = std::fs::read_to_string(self.pid_file_path()) else {
            return Vec::new();
        };
        contents
            .lines()
            .filter_map(|line| {
                let (role, pid) = line.split_once(' ')?;
                let role = match role {
                    "emulator" => ProcessRole::Emulator,
                    "debugger" => ProcessRole::Debugger,
                    _ => return None,
                };
                Some((role, pid.trim().parse().ok()?))
            })
            .collect()
    }

    /// Whether `pid` still runs the binary we launched for `role` on our port
    fn owns_stale(&self, role: ProcessRole, pid: u32) -> bool {
        match process_cmdline(pid) {
            Some(args) => matches_launch(&args, role, &self.config),
            None => false,
        }
    }

    async fn kill_port_holders(&self) {
        let pattern = format!("tcp::{}", self.config.port);
        match tokio::process::Command::new("pkill")
            .args(["-9", "-f", &pattern])
            .status()
            .await
        {
            Ok(status) => tracing::debug!(%status, pattern = %pattern, "pkill finished"),
            Err(e) => tracing::warn!(error = %e, "pkill unavailable"),
        }
    }
}

/// Arguments of a running process; `None` when it is gone or unreadable
fn process_cmdline(pid: u32) -> Option<Vec<String>> {
    let raw = std::fs::read(format!("/proc/{}/cmdline", pid)).ok()?;
    let args: Vec<String> = raw
        .split(|b| *b == 0)
        .filter(|a| !a.is_empty())
        .map(|a| String::from_utf8_lossy(a).into_owned())
        .collect();
    (!args.is_empty()).then_some(args)
}

fn matches_launch(args: &[String], role: ProcessRole, config: &SupervisorConfig) -> bool {
    let binary = match role {
        ProcessRole::Emulator => &config.emulator_binary,
        ProcessRole::Debugger => &config.debugger_binary,
    };
    let Some(name) = Path::new(binary).file_name() else {
        return false;
    };
    let Some(program) = args.first() else {
        return false;
    };
    if Path::new(program).file_name() != Some(name) {
        return false;
    }
    match role {
        ProcessRole::Emulator => {
            let stub = format!("tcp::{}", config.port);
            args.iter().any(|a| a == &stub || a.ends_with(&format!(",{}", stub)))
        }
        ProcessRole::Debugger => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::NoBuild;
    use crate::scripted::ScriptedSpawner;
    use crate::SupervisorError;
    use faultline_channel::scripted::Script;
    use std::net::TcpListener;

    fn free_port() -> u16 {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        listener.local_addr().unwrap().port()
    }

    fn config(dir: &std::path::Path, port: u16) -> SupervisorConfig {
        for image in ["kernel", "xv6.img", "fs.img"] {
            std::fs::write(dir.join(image), b"").unwrap();
        }
        SupervisorConfig {
            port,
            build_dir: dir.to_path_buf(),
            work_dir: dir.to_path_buf(),
            timeout_seconds: 1,
            teardown_grace_ms: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_reset_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let port = free_port();
        let mut supervisor =
            ProcessSupervisor::with_parts(config(dir.path(), port), ScriptedSpawner::new(), NoBuild);

        supervisor.reset().await.unwrap();
        supervisor.reset().await.unwrap();
        assert!(port::is_port_free(port));
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn test_matches_launch() {
        let cfg = SupervisorConfig {
            port: 26000,
            ..Default::default()
        };
        let emulator = args(&["/usr/bin/qemu-system-x86_64", "-S", "-gdb", "tcp::26000"]);
        assert!(matches_launch(&emulator, ProcessRole::Emulator, &cfg));

        let other_port = args(&["qemu-system-x86_64", "-gdb", "tcp::26001"]);
        assert!(!matches_launch(&other_port, ProcessRole::Emulator, &cfg));

        let debugger = args(&["x86_64-elf-gdb", "-q", "kernel"]);
        assert!(matches_launch(&debugger, ProcessRole::Debugger, &cfg));
        assert!(!matches_launch(&debugger, ProcessRole::Emulator, &cfg));

        assert!(!matches_launch(&args(&["sleep", "30"]), ProcessRole::Debugger, &cfg));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_reset_spares_reused_pid() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), free_port());
        let mut bystander = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(cfg.pid_file(), format!("emulator {}\n", bystander.id())).unwrap();

        let mut supervisor = ProcessSupervisor::with_parts(cfg, ScriptedSpawner::new(), NoBuild);
        supervisor.reset().await.unwrap();

        let status = bystander.try_wait().unwrap();
        bystander.kill().unwrap();
        bystander.wait().unwrap();
        assert!(status.is_none());
    }

    #[tokio::test]
    async fn test_launch_rejects_busy_port() {
        let dir = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut supervisor =
            ProcessSupervisor::with_parts(config(dir.path(), port), ScriptedSpawner::new(), NoBuild);

        let result = supervisor.launch_target(FaultMode::Kernel, "trap_test").await;
        assert!(matches!(
            result,
            Err(SupervisorError::Launch(LaunchFailure::PortBusy { .. }))
        ));
        drop(listener);
    }

    #[tokio::test]
    async fn test_missing_image() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), free_port());
        std::fs::remove_file(dir.path().join("fs.img")).unwrap();
        let mut supervisor = ProcessSupervisor::with_parts(cfg, ScriptedSpawner::new(), NoBuild);

        match supervisor.launch_target(FaultMode::Kernel, "trap_test").await {
            Err(SupervisorError::Launch(LaunchFailure::ImageMissing { path })) => {
                assert!(path.ends_with("fs.img"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!supervisor.is_alive(ProcessRole::Emulator));
    }

    #[tokio::test]
    async fn test_launch_and_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let spawner = ScriptedSpawner::new()
            .with_script(ProcessRole::Debugger, Script::new().greeting("(gdb) "))
            .with_script(ProcessRole::Emulator, Script::new().greeting("SeaBIOS\n"));
        let mut supervisor =
            ProcessSupervisor::with_parts(config(dir.path(), free_port()), spawner, NoBuild);

        supervisor.launch_target(FaultMode::Kernel, "trap_test").await.unwrap();
        assert!(supervisor.channels_mut().is_none());
        supervisor.launch_debugger().await.unwrap();

        let (gdb, _console) = supervisor.channels_mut().unwrap();
        gdb.expect_one(&"(gdb) ".into(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(supervisor.is_alive(ProcessRole::Debugger));
        assert!(supervisor.is_alive(ProcessRole::Emulator));

        supervisor.teardown().await;
        supervisor.teardown().await;
        assert!(!supervisor.is_alive(ProcessRole::Debugger));
        assert!(!supervisor.is_alive(ProcessRole::Emulator));
        assert!(!supervisor.spawner().is_running(ProcessRole::Debugger));
        assert!(!supervisor.spawner().is_running(ProcessRole::Emulator));
        assert_eq!(supervisor.transcript().sent_to("gdb"), vec!["quit"]);
    }

    #[tokio::test]
    async fn test_launch_failure_from_spawner() {
        let dir = tempfile::tempdir().unwrap();
        let spawner = ScriptedSpawner::new().failing(
            ProcessRole::Debugger,
            LaunchFailure::BinaryMissing {
                binary: "x86_64-elf-gdb".to_string(),
            },
        );
        let mut supervisor =
            ProcessSupervisor::with_parts(config(dir.path(), free_port()), spawner, NoBuild);
        supervisor.launch_target(FaultMode::User, "div_zero").await.unwrap();

        assert!(matches!(
            supervisor.launch_debugger().await,
            Err(SupervisorError::Launch(LaunchFailure::BinaryMissing { .. }))
        ));
        supervisor.teardown().await;
        assert!(!supervisor.spawner().is_running(ProcessRole::Emulator));
    }
}
