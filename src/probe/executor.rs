use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::Method;
use thiserror::Error;
use tracing::warn;

use crate::db::models::{CheckResult, MonitoredService};

const PROBE_USER_AGENT: &str = concat!("watchpost-probe/", env!("CARGO_PKG_VERSION"));

/// Transport-level probe failure modes. Never escapes the executor: every
/// variant ends up as the error message of a failed `CheckResult`.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("invalid http method: {0}")]
    InvalidMethod(String),
    #[error("failed to build http client: {0}")]
    ClientBuild(String),
    #[error("request timed out after {0}s")]
    Timeout(u64),
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("failed to read response body: {0}")]
    BodyRead(String),
}

/// Executes HTTP(S) probes and classifies their outcomes.
///
/// `execute` never fails: every failure mode (bad configuration, connect
/// error, timeout, unexpected response) is materialized as a failed
/// `CheckResult` with a populated error message.
pub struct ProbeExecutor {
    location: String,
}

impl ProbeExecutor {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub async fn execute(&self, service: &MonitoredService) -> CheckResult {
        let check_time = Utc::now();
        let started = Instant::now();

        let outcome = self.run(service).await;
        let latency_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(observed) => {
                let (success, error_message) = classify(service, &observed);
                if !success {
                    warn!(
                        service_id = service.id,
                        response_code = observed.status,
                        latency_ms,
                        error = error_message.as_deref().unwrap_or(""),
                        "probe check failed"
                    );
                }
                CheckResult {
                    id: 0,
                    service_id: service.id,
                    check_time,
                    success,
                    response_code: observed.status as i32,
                    latency_ms,
                    response_body: None,
                    error_message,
                    ssl_valid: service.url.starts_with("https://"),
                    ssl_expires_at: None,
                    location: self.location.clone(),
                }
            }
            Err(error) => {
                warn!(
                    service_id = service.id,
                    latency_ms,
                    error = %error,
                    "probe did not complete"
                );
                CheckResult {
                    id: 0,
                    service_id: service.id,
                    check_time,
                    success: false,
                    response_code: 0,
                    latency_ms,
                    response_body: None,
                    error_message: Some(error.to_string()),
                    ssl_valid: false,
                    ssl_expires_at: None,
                    location: self.location.clone(),
                }
            }
        }
    }

    /// Sends the request and collects the raw response.
    async fn run(&self, service: &MonitoredService) -> Result<ObservedResponse, ProbeError> {
        let method = Method::from_bytes(service.http_method.to_uppercase().as_bytes())
            .map_err(|_| ProbeError::InvalidMethod(service.http_method.clone()))?;

        let timeout = Duration::from_secs(service.timeout_seconds.max(1));
        // A throwaway client per probe keeps the timeout strictly
        // per-service; connection reuse matters less than isolation here.
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(PROBE_USER_AGENT)
            .build()
            .map_err(|e| ProbeError::ClientBuild(e.to_string()))?;

        let mut request = client.request(method, &service.url);
        if !service.query_params.is_empty() {
            request = request.query(&service.query_params);
        }
        for (name, value) in &service.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &service.body {
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(service.timeout_seconds)
            } else if e.is_connect() {
                ProbeError::ConnectFailed(e.to_string())
            } else {
                ProbeError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        // The body is read for content matching; latency therefore covers
        // full response completion, matching what a caller would experience.
        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::BodyRead(e.to_string()))?;

        Ok(ObservedResponse { status, body })
    }
}

struct ObservedResponse {
    status: u16,
    body: String,
}

fn classify(service: &MonitoredService, observed: &ObservedResponse) -> (bool, Option<String>) {
    if observed.status != service.expected_status_code {
        return (
            false,
            Some(format!(
                "expected status {}, got {}",
                service.expected_status_code, observed.status
            )),
        );
    }
    if let Some(fragment) = &service.expected_body_fragment {
        if !observed.body.contains(fragment.as_str()) {
            return (
                false,
                Some(format!("expected body to contain \"{fragment}\"")),
            );
        }
    }
    (true, None)
}
