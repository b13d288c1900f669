//! Order server API client.
//!
//! `OrderApi` is the seam the sync engine and the order client talk to;
//! `HttpOrderApi` is the reqwest implementation used in production.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::models::{OrderSubmission, SubmitReceipt};

/// Header carrying the client's local id so replays can be deduplicated.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

const PUBLIC_ORDERS_PATH: &str = "/api/orders/public";
const HEALTH_PATH: &str = "/api/health";

/// Timeout for the lightweight health check.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("order rejected (HTTP {status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("server error (HTTP {status}): {detail}")]
    Server { status: u16, detail: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl SubmitError {
    /// Whether the order should stay queued and be retried later.
    ///
    /// Only a payload rejection (4xx other than 408/429) is final for a
    /// direct submission.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

pub trait OrderApi: Send + Sync + 'static {
    fn submit_order(
        &self,
        submission: &OrderSubmission,
        idempotency_key: Option<&str>,
    ) -> impl Future<Output = Result<SubmitReceipt, SubmitError>> + Send;
}

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the order server URL:
/// - ensure a scheme is present (https, or http for localhost)
/// - strip trailing slashes
/// - strip a trailing `/api` segment
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn transport_error(base: &str, err: &reqwest::Error) -> SubmitError {
    if err.is_timeout() {
        return SubmitError::Timeout;
    }
    if err.is_connect() {
        return SubmitError::Network(format!("cannot reach order server at {base}"));
    }
    if err.is_builder() {
        return SubmitError::Network(format!("invalid order server URL: {base}"));
    }
    SubmitError::Network(format!("network error communicating with {base}: {err}"))
}

/// Pull a readable message out of an error body.
fn error_detail(status: StatusCode, body_text: &str) -> String {
    let trimmed = body_text.trim();
    if let Ok(json) = serde_json::from_str::<Value>(trimmed) {
        if let Some(errors) = json.get("errors").and_then(Value::as_array) {
            let joined = errors
                .iter()
                .map(|e| {
                    match (
                        e.get("field").and_then(Value::as_str),
                        e.get("message").and_then(Value::as_str),
                    ) {
                        (Some(f), Some(m)) => format!("{f}: {m}"),
                        _ => e.to_string(),
                    }
                })
                .collect::<Vec<_>>()
                .join("; ");
            if !joined.is_empty() {
                return joined;
            }
        }
        if let Some(message) = json
            .get("error")
            .or_else(|| json.get("message"))
            .and_then(Value::as_str)
        {
            return message.to_string();
        }
    }
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_string()
    } else {
        trimmed.to_string()
    }
}

/// Map a non-2xx status to a submit error.
///
/// 408 and 429 are transient and stay retryable; any other 4xx is a final
/// rejection of the payload.
fn status_error(status: StatusCode, detail: String) -> SubmitError {
    match status {
        StatusCode::REQUEST_TIMEOUT => SubmitError::Timeout,
        StatusCode::TOO_MANY_REQUESTS => SubmitError::Server {
            status: status.as_u16(),
            detail,
        },
        s if s.is_client_error() => SubmitError::Rejected {
            status: s.as_u16(),
            detail,
        },
        s if s.is_server_error() => SubmitError::Server {
            status: s.as_u16(),
            detail,
        },
        s => SubmitError::InvalidResponse(format!("unexpected HTTP {}: {detail}", s.as_u16())),
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct HttpOrderApi {
    client: Client,
    base_url: String,
}

impl HttpOrderApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;
        Ok(Self {
            client,
            base_url: normalize_base_url(base_url),
        })
    }

    /// `HEAD /api/health` with a short timeout. Any failure counts as offline.
    pub async fn check_health(&self) -> bool {
        let url = format!("{}{HEALTH_PATH}", self.base_url);
        match self.client.head(&url).timeout(HEALTH_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "health check failed");
                false
            }
        }
    }
}

impl OrderApi for HttpOrderApi {
    async fn submit_order(
        &self,
        submission: &OrderSubmission,
        idempotency_key: Option<&str>,
    ) -> Result<SubmitReceipt, SubmitError> {
        let url = format!("{}{PUBLIC_ORDERS_PATH}", self.base_url);
        let mut req = self.client.post(&url).json(submission);
        if let Some(key) = idempotency_key {
            req = req.header(IDEMPOTENCY_HEADER, key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| transport_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp
            .text()
            .await
            .map_err(|e| transport_error(&self.base_url, &e))?;

        if status.is_success() {
            return serde_json::from_str::<SubmitReceipt>(&body_text).map_err(|e| {
                warn!(status = status.as_u16(), error = %e, "Unparseable order acknowledgement");
                SubmitError::InvalidResponse(format!("invalid JSON from order server: {e}"))
            });
        }

        Err(status_error(status, error_detail(status, &body_text)))
    }
}
