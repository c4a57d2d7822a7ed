//! Faultline Crash Diagnosis
//!
//! Turns a `CrashSnapshot` into a diagnosis request, sends it to a
//! generateContent-style service and validates the patch that comes back.

mod client;
mod config;
mod error;
mod patch;
mod request;
mod result;

pub use client::{parse_envelope, DiagnosisService, GeminiClient};
pub use config::DiagnosisConfig;
pub use error::{DiagnosisError, PatchError};
pub use patch::{PatchArtifact, UnifiedDiff};
pub use request::DiagnosisRequest;
pub use result::{DiagnosisResult, Severity};

pub type Result<T> = std::result::Result<T, DiagnosisError>;
