//! Diagnosis error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiagnosisError {
    #[error("API key not set: export {var}")]
    MissingApiKey { var: String },

    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Envelope(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Diagnosis failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DiagnosisError {
    /// Transport problems and bad answers are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DiagnosisError::Http(_)
                | DiagnosisError::Status { .. }
                | DiagnosisError::Envelope(_)
                | DiagnosisError::Json(_)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("Patch is empty")]
    Empty,

    #[error("Patch has no ---/+++ file headers")]
    MissingHeaders,

    #[error("Patch has no @@ hunk")]
    MissingHunk,
}
