//! Diagnosis service client

use serde_json::Value;
use std::future::Future;
use url::Url;

use crate::config::DiagnosisConfig;
use crate::error::DiagnosisError;
use crate::request::DiagnosisRequest;
use crate::result::DiagnosisResult;
use crate::Result;

const BODY_EXCERPT: usize = 500;

/// Anything that can turn a request into a diagnosis
pub trait DiagnosisService: Send + Sync {
    fn diagnose(
        &self,
        request: &DiagnosisRequest,
    ) -> impl Future<Output = Result<DiagnosisResult>> + Send;
}

/// Client for a generateContent-style JSON endpoint
pub struct GeminiClient {
    config: DiagnosisConfig,
    url: Url,
    api_key: String,
    http: reqwest::Client,
}

impl GeminiClient {
    /// Reads the API key from the variable named in the config
    pub fn from_config(config: DiagnosisConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| DiagnosisError::MissingApiKey {
                var: config.api_key_env.clone(),
            })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: DiagnosisConfig, api_key: impl Into<String>) -> Result<Self> {
        let url = config.url()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("faultline/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config,
            url,
            api_key: api_key.into(),
            http,
        })
    }

    pub fn config(&self) -> &DiagnosisConfig {
        &self.config
    }

    async fn attempt(&self, payload: &Value) -> Result<DiagnosisResult> {
        let response = self
            .http
            .post(self.url.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(DiagnosisError::Status {
                status: status.as_u16(),
                body: body.chars().take(BODY_EXCERPT).collect(),
            });
        }
        parse_envelope(&body)
    }
}

impl DiagnosisService for GeminiClient {
    async fn diagnose(&self, request: &DiagnosisRequest) -> Result<DiagnosisResult> {
        let payload = request.to_payload();
        let attempts = self.config.max_retries.max(1);

        tracing::info!(
            session_id = %request.session_id,
            model = %self.config.model,
            "Requesting diagnosis"
        );

        let mut last = String::new();
        for attempt in 0..attempts {
            match self.attempt(&payload).await {
                Ok(result) => {
                    tracing::info!(
                        session_id = %request.session_id,
                        attempt = attempt + 1,
                        severity = %result.severity,
                        "Diagnosis received"
                    );
                    return Ok(result);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(attempt = attempt + 1, error = %e, "Diagnosis attempt failed");
                    last = e.to_string();
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.config.backoff(attempt)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(DiagnosisError::Exhausted { attempts, last })
    }
}

/// Extract the structured answer from a generateContent response body
pub fn parse_envelope(body: &str) -> Result<DiagnosisResult> {
    let envelope: Value = serde_json::from_str(body)?;
    let text = envelope
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .ok_or_else(|| match envelope.pointer("/promptFeedback/blockReason") {
            Some(reason) => DiagnosisError::Envelope(format!("prompt blocked: {}", reason)),
            None => DiagnosisError::Envelope("no candidate text".to_string()),
        })?;

    let text = text.trim();
    let json = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(text);
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Severity;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn answer() -> Value {
        json!({
            "rootCause": "NULL pointer dereference",
            "faultyFunction": "main (trap_test.c)",
            "faultyLine": "trap_test.c:11",
            "severity": "High",
            "analysisSummary": "cr2 is 0x0 and rip is in main",
            "suggestedFixPatch": "--- a/trap_test.c\n+++ b/trap_test.c\n@@ -11 +11 @@\n-  *p = 1;\n+  if (p) *p = 1;\n"
        })
    }

    fn envelope(text: &str) -> String {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] }).to_string()
    }

    fn request() -> DiagnosisRequest {
        DiagnosisRequest {
            session_id: "s1".to_string(),
            fingerprint: "f".to_string(),
            system_prompt: "sys".to_string(),
            user_query: "query".to_string(),
        }
    }

    #[test]
    fn test_parse_envelope() {
        let result = parse_envelope(&envelope(&answer().to_string())).unwrap();
        assert_eq!(result.severity, Severity::High);
        assert_eq!(result.faulty_line, "trap_test.c:11");

        let fenced = format!("```json\n{}\n```", answer());
        assert!(parse_envelope(&envelope(&fenced)).is_ok());
    }

    #[test]
    fn test_parse_envelope_errors() {
        assert!(matches!(
            parse_envelope(r#"{"candidates": []}"#),
            Err(DiagnosisError::Envelope(_))
        ));
        match parse_envelope(r#"{"promptFeedback": {"blockReason": "SAFETY"}}"#) {
            Err(DiagnosisError::Envelope(reason)) => assert!(reason.contains("SAFETY")),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            parse_envelope(&envelope("not json")),
            Err(DiagnosisError::Json(_))
        ));
        assert!(matches!(parse_envelope("<html>"), Err(DiagnosisError::Json(_))));
    }

    /// Serves `responses` in order, one per connection
    async fn serve(responses: Vec<(u16, String)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                read_request(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}/v1beta/models", addr), hits)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let Ok(n) = socket.read(&mut buf).await else {
                return;
            };
            if n == 0 {
                return;
            }
            data.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&data);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    fn config(endpoint: String, max_retries: u32) -> DiagnosisConfig {
        DiagnosisConfig {
            endpoint,
            max_retries,
            base_backoff_ms: 10,
            request_timeout_seconds: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let (endpoint, hits) = serve(vec![
            (503, "{\"error\": \"overloaded\"}".to_string()),
            (200, envelope("{\"truncated\": ")),
            (200, envelope(&answer().to_string())),
        ])
        .await;
        let client = GeminiClient::with_api_key(config(endpoint, 5), "test-key").unwrap();

        let result = client.diagnose(&request()).await.unwrap();
        assert_eq!(result.faulty_function, "main (trap_test.c)");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let (endpoint, hits) = serve(vec![
            (500, "boom".to_string()),
            (500, "boom".to_string()),
            (200, envelope(&answer().to_string())),
        ])
        .await;
        let client = GeminiClient::with_api_key(config(endpoint, 2), "test-key").unwrap();

        match client.diagnose(&request()).await {
            Err(DiagnosisError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert!(last.contains("500"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_api_key() {
        let config = DiagnosisConfig {
            api_key_env: "FAULTLINE_TEST_UNSET_API_KEY".to_string(),
            ..Default::default()
        };
        match GeminiClient::from_config(config) {
            Err(DiagnosisError::MissingApiKey { var }) => {
                assert_eq!(var, "FAULTLINE_TEST_UNSET_API_KEY")
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("client built without a key"),
        }
    }
}
