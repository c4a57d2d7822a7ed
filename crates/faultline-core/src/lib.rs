//! Faultline Core
//!
//! Wires the pipeline together: configuration, the session runner, run
//! history and the diagnosis service.

mod config;
mod error;
mod history;
mod investigator;

pub use config::Config;
pub use error::CoreError;
pub use history::RunHistory;
pub use investigator::{Investigation, Investigator};

// Re-export core components
pub use faultline_diagnosis::{
    DiagnosisConfig, DiagnosisError, DiagnosisRequest, DiagnosisResult, DiagnosisService,
    GeminiClient, PatchArtifact, Severity, UnifiedDiff,
};
pub use faultline_session::{
    RunRequest, Session, SessionFailure, SessionOutcome, SessionRunner, SessionSettings,
    SessionState, Stage,
};
pub use faultline_snapshot::{CrashSnapshot, FaultMode};
pub use faultline_storage::{Database, DiagnosisRecord, RunRecord, StorageError};
pub use faultline_supervisor::{ProcessSupervisor, SupervisorConfig};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
