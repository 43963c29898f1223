//! Network layer: the transport primitive, the HTTP client, request pacing and
//! protocol helpers.
//!
//! - [`Transport`] is the seam everything above it talks to; the session layer
//!   only ever sees raw bodies through it.
//! - [`HttpClient`] implements it on top of a pooled reqwest client
//!   with pacing and bounded retries for connection failures.
//! - [`endpoint`], [`json`] and [`html`] hold the path table, envelope decoding
//!   and HTML body helpers.
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use zentao::net::HttpClient;
//!
//! let client = HttpClient::new("zentao")
//!     .with_rate_limit(200)
//!     .with_max_retries(2)
//!     .with_timeout(Duration::from_secs(10));
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder, StatusCode, header::HeaderMap};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

pub mod endpoint;
pub mod html;
pub mod json;

/// Pooled connections, compression, no cookie store (the session travels as a
/// query parameter).
fn build_client() -> Client {
    Client::builder()
        .user_agent(concat!("zentao-rs/", env!("CARGO_PKG_VERSION")))
        .pool_max_idle_per_host(10)
        .gzip(true)
        .brotli(true)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Raw request primitive. Bodies are returned as-is; interpreting them
/// (session expiry, envelopes) is the caller's job.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` and return the body of a successful (2xx) response.
    async fn get(&self, url: &str) -> Result<Bytes>;

    /// POST `form` url-encoded to `url` and return the body of a 2xx response.
    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<Bytes>;
}

/// The part of a URL that is safe to log (no query string, no token).
pub(crate) fn log_target(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Exponential backoff after an HTTP 429, capped at 64 seconds.
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2_u64.saturating_pow(attempt.min(6)))
}

/// Enforces a minimum delay between requests sharing a key.
#[derive(Debug)]
pub struct RateLimiter {
    last_request: Mutex<HashMap<String, Instant>>,
    default_delay: Duration,
}

impl Clone for RateLimiter {
    fn clone(&self) -> Self {
        Self {
            last_request: Mutex::new(HashMap::new()),
            default_delay: self.default_delay,
        }
    }
}

impl RateLimiter {
    /// A limiter with `delay_ms` between requests; 0 never waits.
    pub fn new(delay_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(HashMap::new()),
            default_delay: Duration::from_millis(delay_ms),
        }
    }

    /// Sleeps until `key`'s last request is at least the configured delay ago.
    pub async fn wait(&self, key: &str) {
        if self.default_delay.is_zero() {
            return;
        }

        let now = Instant::now();
        let wait_duration = {
            let last_map = self.last_request.lock();
            last_map.get(key).and_then(|&last| {
                let elapsed = now.duration_since(last);
                (elapsed < self.default_delay).then(|| self.default_delay - elapsed)
            })
        };

        if let Some(duration) = wait_duration {
            tokio::time::sleep(duration).await;
        }

        self.last_request
            .lock()
            .insert(key.to_string(), Instant::now());
    }
}

/// HTTP transport with pacing, a per-request timeout and bounded retries.
///
/// Only connection-level failures and HTTP 429 are retried. Every other
/// non-success status fails immediately with [`Error::Transport`] carrying
/// the status and a body excerpt.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
    name: String,
    rate_limiter: RateLimiter,
    max_retries: u32,
    timeout: Duration,
    headers: HeaderMap,
}

impl HttpClient {
    /// A client with no pacing, 2 retries and a 30 second timeout.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            client: build_client(),
            name: name.into(),
            rate_limiter: RateLimiter::new(0),
            max_retries: 2,
            timeout: Duration::from_secs(30),
            headers: HeaderMap::new(),
        }
    }

    pub fn with_rate_limit(mut self, delay_ms: u64) -> Self {
        self.rate_limiter = RateLimiter::new(delay_ms);
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Adds a header to every request. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.parse::<reqwest::header::HeaderName>(),
            value.parse::<reqwest::header::HeaderValue>(),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Sends with retries. Timeouts are retried only when `idempotent`, since
    /// a request that timed out may already have been applied.
    async fn send<F>(&self, url: &str, idempotent: bool, build: F) -> Result<Bytes>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut attempts = 0;

        loop {
            self.rate_limiter.wait(&self.name).await;

            let request = build().headers(self.headers.clone()).timeout(self.timeout);
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.bytes().await?);
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS && attempts < self.max_retries {
                        attempts += 1;
                        let delay = backoff_delay(attempts);
                        tracing::warn!(
                            target_path = log_target(url),
                            attempt = attempts,
                            "rate limited by backend, backing off for {:?}",
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    let body = response.bytes().await.unwrap_or_default();
                    return Err(Error::http_status(status.as_u16(), &body));
                }
                Err(e)
                    if (e.is_connect() || (idempotent && e.is_timeout()))
                        && attempts < self.max_retries =>
                {
                    attempts += 1;
                    tracing::warn!(
                        target_path = log_target(url),
                        attempt = attempts,
                        error = %e.without_url(),
                        "request failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn get(&self, url: &str) -> Result<Bytes> {
        tracing::debug!(target_path = log_target(url), "GET");
        self.send(url, true, || self.client.get(url)).await
    }

    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<Bytes> {
        tracing::debug!(target_path = log_target(url), fields = form.len(), "POST");
        self.send(url, false, || self.client.post(url).form(form)).await
    }
}
