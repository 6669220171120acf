//! HTTP transport
//!
//! Default [`Transport`] implementation backed by a shared `reqwest` client.
//!
//! # design principles
//! - **Transports only move bytes** - status classification and body decoding
//!   belong to the dispatcher and the configured parser
//! - **Transient failures become errors** - connection failures, timeouts,
//!   HTTP 429 and 502-504 are reported as transient [`RuntimeError`]s and
//!   retried here with exponential backoff
//! - **Everything else is a response** - 401, 403, 404 and other statuses are
//!   returned as [`ProviderResponse`] for the dispatcher to classify

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};

use crate::error::{Result, RuntimeError};
use crate::traits::Transport;
use crate::types::{Method, ProviderResponse, RequestSpec};
use crate::utils::log_sanitizer::truncate_for_log;

/// 连接超时
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 整体请求超时（每次请求的兜底值，逐操作超时由 dispatcher 控制）
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of transparent retries for transient failures.
pub const DEFAULT_TRANSPORT_RETRIES: u32 = 2;

/// HTTP transport with transparent retry of transient failures.
pub struct HttpTransport {
    provider: String,
    client: Client,
    max_retries: u32,
}

impl HttpTransport {
    /// Create a transport with default timeouts and retry budget.
    ///
    /// # Panics
    /// Panics if the TLS backend cannot be initialized.
    pub fn new(provider: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            provider: provider.into(),
            client,
            max_retries: DEFAULT_TRANSPORT_RETRIES,
        }
    }

    /// Set the maximum number of transparent retries (0 disables retry).
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 由 spec 构造 reqwest 请求
    ///
    /// URL 使用规范化查询串，与签名时的字节一致。
    fn build_request(&self, spec: &RequestSpec) -> RequestBuilder {
        let url = spec.url();
        let mut builder = match spec.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Put => self.client.put(&url),
            Method::Patch => self.client.patch(&url),
            Method::Delete => self.client.delete(&url),
        };

        for (name, value) in &spec.headers {
            builder = builder.header(name, value);
        }

        if let Some(body) = &spec.body {
            builder = builder.json(body);
        }

        builder
    }

    /// 执行单次 HTTP 请求
    async fn execute_once(&self, spec: &RequestSpec) -> Result<ProviderResponse> {
        log::debug!("[{}] {} {}", self.provider, spec.method, spec.url());

        // Send request
        let response = self.build_request(spec).send().await.map_err(|e| {
            if e.is_timeout() {
                RuntimeError::Timeout {
                    provider: self.provider.clone(),
                    detail: e.to_string(),
                }
            } else {
                RuntimeError::Transport {
                    provider: self.provider.clone(),
                    detail: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        log::debug!("[{}] Response Status: {status}", self.provider);

        // Extract Retry-After header (before consuming response body)
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        // Returns RateLimited error for HTTP 429
        if status == 429 {
            let body = response.text().await.unwrap_or_default();
            log::warn!(
                "[{}] Rate limited (HTTP 429), retry_after={retry_after:?}",
                self.provider
            );
            return Err(RuntimeError::RateLimited {
                provider: self.provider.clone(),
                retry_after,
                raw_message: Some(body),
            });
        }

        // Return Transport error for 502/503/504 (can be retried)
        if matches!(status, 502..=504) {
            let body = response.text().await.unwrap_or_default();
            log::warn!("[{}] Server error (HTTP {status})", self.provider);
            return Err(RuntimeError::Transport {
                provider: self.provider.clone(),
                detail: format!("HTTP {status}: {body}"),
            });
        }

        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        // Read response body
        let body = response.text().await.map_err(|e| RuntimeError::Transport {
            provider: self.provider.clone(),
            detail: format!("Failed to read response body: {e}"),
        })?;

        log::debug!(
            "[{}] Response Body: {}",
            self.provider,
            truncate_for_log(&body)
        );

        Ok(ProviderResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    /// Execute the request, transparently retrying transient failures.
    ///
    /// Each attempt rebuilds the request from the spec, so retry never
    /// depends on cloning an already-consumed request.
    ///
    /// # Retry strategy
    /// - Only transient errors are retried (transport, timeout, rate limit)
    /// - Exponential backoff: 100ms, 200ms, 400ms, 800ms, ... (maximum 10 seconds)
    /// - Rate-limit responses honor `Retry-After` (capped at 30 seconds)
    async fn execute(&self, spec: &RequestSpec) -> Result<ProviderResponse> {
        if self.max_retries == 0 {
            // Do not retry, execute directly
            return self.execute_once(spec).await;
        }

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            match self.execute_once(spec).await {
                Ok(resp) => return Ok(resp),
                Err(e) if attempt < self.max_retries && e.is_transient() => {
                    let delay = retry_delay(&e, attempt);
                    log::warn!(
                        "[{}] Request failed (attempt {}/{}), retrying in {:.1}s: {}",
                        self.provider,
                        attempt + 1,
                        self.max_retries,
                        delay.as_secs_f32(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| RuntimeError::Transport {
            provider: self.provider.clone(),
            detail: "All retries exhausted with no error captured".to_string(),
        }))
    }
}

/// Calculate retry delay
///
/// Use this value (capped at 30s) when the error is `RateLimited` and contains `retry_after`.
/// Otherwise exponential backoff is used.
fn retry_delay(error: &RuntimeError, attempt: u32) -> Duration {
    if let RuntimeError::RateLimited {
        retry_after: Some(secs),
        ..
    } = error
    {
        Duration::from_secs((*secs).min(30))
    } else {
        backoff_delay(attempt)
    }
}

/// Calculate exponential backoff delay
///
/// Backoff strategy: 100ms, 200ms, 400ms, 800ms, 1.6s, ...
/// Maximum delay limit is 10 seconds
fn backoff_delay(attempt: u32) -> Duration {
    let capped_attempt = attempt.min(20); // Prevent 2^attempt from overflowing
    let delay_ms = 100_u64.saturating_mul(1_u64 << capped_attempt);
    let delay_ms = delay_ms.min(10_000); // Maximum 10 seconds
    Duration::from_millis(delay_ms)
}
