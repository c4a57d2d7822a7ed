//! Supervisor configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Remote-debugging stub port
    pub port: u16,
    pub debugger_binary: String,
    /// Debugger arguments; `{kernel}` expands to the kernel image path
    pub debugger_args: Vec<String>,
    pub emulator_binary: String,
    /// Emulator arguments; `{port}` and `{diskN}` are expanded
    pub emulator_args: Vec<String>,
    /// Kernel image with symbols, relative to `build_dir`
    pub kernel_image: PathBuf,
    /// Disk images, relative to `build_dir`
    pub disk_images: Vec<PathBuf>,
    pub build_dir: PathBuf,
    pub build_command: Vec<String>,
    /// Where pid files and session logs go
    pub work_dir: PathBuf,
    pub timeout_seconds: u64,
    /// How long the debugger gets to quit before it is killed
    pub teardown_grace_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            port: 26000,
            debugger_binary: "x86_64-elf-gdb".to_string(),
            debugger_args: vec!["-q".to_string(), "{kernel}".to_string()],
            emulator_binary: "qemu-system-x86_64".to_string(),
            emulator_args: [
                "-nographic",
                "-cpu",
                "qemu64,+rdtscp",
                "-nic",
                "none",
                "-hda",
                "{disk0}",
                "-hdb",
                "{disk1}",
                "-smp",
                "2",
                "-m",
                "512",
                "-S",
                "-gdb",
                "tcp::{port}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            kernel_image: PathBuf::from("kernel"),
            disk_images: vec![PathBuf::from("xv6.img"), PathBuf::from("fs.img")],
            build_dir: PathBuf::from("."),
            build_command: vec!["make".to_string()],
            work_dir: PathBuf::from("."),
            timeout_seconds: 10,
            teardown_grace_ms: 500,
        }
    }
}

impl SupervisorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    /// Resolve a path against the build directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.build_dir.join(path)
        }
    }

    pub fn kernel_path(&self) -> PathBuf {
        self.resolve(&self.kernel_image)
    }

    pub fn disk_paths(&self) -> Vec<PathBuf> {
        self.disk_images.iter().map(|p| self.resolve(p)).collect()
    }

    pub fn pid_file(&self) -> PathBuf {
        self.work_dir.join(format!("faultline-{}.pids", self.port))
    }

    pub fn emulator_command_args(&self) -> Vec<String> {
        self.emulator_args.iter().map(|a| self.expand(a)).collect()
    }

    pub fn debugger_command_args(&self) -> Vec<String> {
        self.debugger_args.iter().map(|a| self.expand(a)).collect()
    }

    fn expand(&self, arg: &str) -> String {
        let mut out = arg.replace("{port}", &self.port.to_string());
        if out.contains("{kernel}") {
            out = out.replace("{kernel}", &self.kernel_image.to_string_lossy());
        }
        for (i, disk) in self.disk_images.iter().enumerate() {
            let key = format!("{{disk{}}}", i);
            if out.contains(&key) {
                out = out.replace(&key, &disk.to_string_lossy());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_lines() {
        let config = SupervisorConfig {
            port: 26001,
            ..Default::default()
        };
        let args = config.emulator_command_args();
        assert!(args.contains(&"tcp::26001".to_string()));
        assert!(args.contains(&"xv6.img".to_string()));
        assert!(args.contains(&"fs.img".to_string()));
        assert!(args.contains(&"-S".to_string()));
        assert_eq!(config.debugger_command_args(), vec!["-q", "kernel"]);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: SupervisorConfig = toml::from_str(
            r#"
            port = 27000
            build_dir = "/src/xv6"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 27000);
        assert_eq!(config.debugger_binary, "x86_64-elf-gdb");
        assert_eq!(config.kernel_path(), PathBuf::from("/src/xv6/kernel"));
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }
}
