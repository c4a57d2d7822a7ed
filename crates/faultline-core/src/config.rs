//! Faultline configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use faultline_diagnosis::DiagnosisConfig;
use faultline_session::SessionSettings;
use faultline_supervisor::SupervisorConfig;

use crate::error::CoreError;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the run history database
    pub database_path: PathBuf,
    pub supervisor: SupervisorConfig,
    pub session: SessionSettings,
    pub diagnosis: DiagnosisConfig,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            database_path: data_dir.join("faultline.db"),
            supervisor: SupervisorConfig::default(),
            session: SessionSettings::default(),
            diagnosis: DiagnosisConfig::default(),
        }
    }

    /// Load a TOML file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text).map_err(|source| CoreError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Config loaded");
        config.validated()
    }

    /// `path` when given, otherwise `faultline.toml` in the current directory
    /// if it exists, otherwise defaults
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let local = Path::new("faultline.toml");
                if local.exists() {
                    Self::load(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn validated(self) -> Result<Self> {
        if self.supervisor.port == 0 {
            return Err(CoreError::Config("supervisor.port must be non-zero".to_string()));
        }
        if self.supervisor.timeout_seconds == 0 {
            return Err(CoreError::Config(
                "supervisor.timeout_seconds must be non-zero".to_string(),
            ));
        }
        if self.session.shell_prompt.is_empty() {
            return Err(CoreError::Config("session.shell_prompt must not be empty".to_string()));
        }
        Ok(self)
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("faultline"))
            .unwrap_or_else(|| PathBuf::from(".faultline"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

// Simple dirs implementation for the data directory
mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }
}
