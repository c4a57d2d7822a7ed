//! Diagnosis service configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosisConfig {
    pub enabled: bool,
    /// Base URL the model name is appended to
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub max_retries: u32,
    /// First backoff delay; doubled per attempt
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_seconds: u64,
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            max_retries: 5,
            base_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            request_timeout_seconds: 30,
        }
    }
}

impl DiagnosisConfig {
    /// `{endpoint}/{model}:generateContent`. The `./` keeps the model name
    /// from being read as a URL scheme.
    pub fn url(&self) -> Result<Url> {
        let base = format!("{}/", self.endpoint.trim_end_matches('/'));
        Ok(Url::parse(&base)?.join(&format!("./{}:generateContent", self.model))?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Delay before retry number `attempt` (0-indexed)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.base_backoff_ms.saturating_mul(1u64 << attempt.min(30));
        Duration::from_millis(delay.min(self.max_backoff_ms))
    }
}
