//! Remote submission client for the ValidaNFe storage API.
//!
//! Submission never returns `Err`: every outcome, including transport
//! failures, is folded into a [`RemoteResponse`] so the caller can
//! classify and route the document. Only gateway statuses (502, 503,
//! 504), timeouts and connection failures are retried; a plain 500 is
//! returned as-is because the original operators treated it as a
//! deterministic server bug, not a transient fault.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::outcome::RemoteResponse;
use crate::validator;

const GUARDA_ENDPOINT: &str = "/GuardaNFe/EnviarXml";

/// Configuration for the submission client.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// API base URL, without the endpoint path.
    pub base_url: String,
    /// API token sent in the X-API-KEY header.
    pub token: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Number of retry attempts for transient failures.
    pub retry_attempts: u32,
    /// Initial retry delay in milliseconds.
    pub retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds (exponential backoff cap).
    pub max_retry_delay_ms: u64,
    /// User agent string.
    pub user_agent: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.validanfe.com".to_string(),
            token: String::new(),
            timeout_seconds: 30,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 30000,
            user_agent: format!("nfe-pipeline/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Seam for the submission stage so the coordinator can be exercised
/// without a live endpoint.
#[async_trait]
pub trait RemoteSubmitter: Send + Sync {
    /// Submit one document body under its original file name.
    async fn submit(&self, file_name: &str, content: &str) -> RemoteResponse;

    /// Cheap reachability probe against the API host.
    async fn test_connection(&self) -> bool;
}

/// HTTP client for the ValidaNFe API.
pub struct ValidaNfeClient {
    client: Client,
    config: RemoteConfig,
}

impl ValidaNfeClient {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn submit_url(&self) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), GUARDA_ENDPOINT)
    }

    /// Single POST attempt, wrapped in an outer timeout.
    async fn send_once(&self, url: &str, file_name: &str, content: &str) -> Result<Response> {
        let part = Part::text(content.to_string())
            .file_name(file_name.to_string())
            .mime_str("application/xml")
            .map_err(PipelineError::Http)?;
        let form = Form::new().part("xmlFile", part);

        let request = self
            .client
            .post(url)
            .header("X-API-KEY", &self.config.token)
            .multipart(form)
            .send();

        timeout(Duration::from_secs(self.config.timeout_seconds), request)
            .await
            .map_err(|_| PipelineError::Timeout {
                url: url.to_string(),
                timeout_seconds: self.config.timeout_seconds,
            })?
            .map_err(PipelineError::Http)
    }

    /// POST with retry on transient failures only.
    async fn send_with_retry(&self, url: &str, file_name: &str, content: &str) -> Result<Response> {
        let mut attempt = 0u32;

        loop {
            match self.send_once(url, file_name, content).await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if retryable_status(status) && attempt < self.config.retry_attempts {
                        warn!(
                            file = file_name,
                            status,
                            attempt,
                            "gateway error, retrying submission"
                        );
                        self.wait_before_retry(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Ok(response);
                }
                Err(error) => {
                    if error.is_transient() && attempt < self.config.retry_attempts {
                        warn!(
                            file = file_name,
                            attempt,
                            %error,
                            "transport error, retrying submission"
                        );
                        self.wait_before_retry(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    async fn wait_before_retry(&self, attempt: u32) {
        let delay_ms = self.config.retry_delay_ms * 2_u64.pow(attempt);
        let capped = delay_ms.min(self.config.max_retry_delay_ms);
        sleep(Duration::from_millis(capped)).await;
    }
}

#[async_trait]
impl RemoteSubmitter for ValidaNfeClient {
    async fn submit(&self, file_name: &str, content: &str) -> RemoteResponse {
        let started = Instant::now();

        if self.config.token.trim().is_empty() {
            return RemoteResponse::failure("API token not configured", started.elapsed());
        }

        // The same structural precheck the validator runs; nothing that
        // obviously is not a fiscal document leaves the machine.
        if let Some(problem) = validator::precheck_content(content) {
            return RemoteResponse::failure(problem, started.elapsed());
        }
        if content.len() as u64 > validator::MAX_DOCUMENT_BYTES {
            return RemoteResponse::failure("file exceeds the 5 MB limit", started.elapsed());
        }

        let url = self.submit_url();
        debug!(file = file_name, url = %url, bytes = content.len(), "submitting document");

        match self.send_with_retry(&url, file_name, content).await {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                classify_response(status, &body, started.elapsed())
            }
            Err(PipelineError::Timeout { .. }) => {
                RemoteResponse::failure("timed out contacting the API", started.elapsed())
            }
            Err(PipelineError::Http(e)) if e.is_connect() => {
                RemoteResponse::failure("could not connect to the API", started.elapsed())
            }
            Err(e) => RemoteResponse::failure(e.to_string(), started.elapsed()),
        }
    }

    async fn test_connection(&self) -> bool {
        let probe = self
            .client
            .head(&self.config.base_url)
            .header("X-API-KEY", &self.config.token)
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        match probe {
            // Any non-server-error answer means the host is reachable.
            Ok(response) => response.status().as_u16() < 500,
            Err(e) => {
                debug!(%e, "connection probe failed");
                false
            }
        }
    }
}

/// Gateway statuses that indicate a transient upstream condition.
pub fn retryable_status(status: u16) -> bool {
    matches!(status, 502 | 503 | 504)
}

/// Map a final HTTP response onto the submission outcome. 409 counts as
/// success: the document was already stored, resubmission is idempotent.
pub fn classify_response(status: StatusCode, body: &str, elapsed: Duration) -> RemoteResponse {
    let code = status.as_u16();
    let payload = serde_json::from_str::<serde_json::Value>(body).ok();

    let (success, message) = match code {
        200 | 201 => {
            if payload.is_some() {
                (true, "document stored successfully".to_string())
            } else {
                (true, "document stored successfully (non-JSON response)".to_string())
            }
        }
        409 => (true, "document was already submitted".to_string()),
        400 => (
            false,
            format!("validation failed: {}", body_excerpt(body, "invalid data")),
        ),
        401 | 403 => (false, "invalid or expired API token".to_string()),
        404 => (false, "endpoint not found (404), check the API URL".to_string()),
        413 => (false, "file rejected as too large (413)".to_string()),
        429 => (false, "API rate limit reached, try again later".to_string()),
        500 => (false, "internal server error (500)".to_string()),
        502 => (false, "bad gateway (502), server temporarily unavailable".to_string()),
        503 => (false, "service unavailable (503), server overloaded".to_string()),
        504 => (false, "gateway timeout (504)".to_string()),
        _ => (false, extract_error_message(code, body, payload.as_ref())),
    };

    RemoteResponse {
        success,
        message,
        status_code: Some(code),
        elapsed,
        payload,
    }
}

/// Pull a human-readable message out of an error body, JSON or not.
fn extract_error_message(
    code: u16,
    body: &str,
    payload: Option<&serde_json::Value>,
) -> String {
    if let Some(value) = payload {
        for key in ["message", "error", "detail"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return format!("HTTP {code}: {text}");
            }
        }
    }
    if body.trim().is_empty() {
        format!("HTTP error {code}")
    } else {
        format!("HTTP {code}: {}", body_excerpt(body, ""))
    }
}

fn body_excerpt(body: &str, fallback: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return fallback.to_string();
    }
    trimmed.chars().take(100).collect()
}
