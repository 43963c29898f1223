//! Client configuration.
//!
//! [`ClientConfig`] is built with the generated [`ClientConfigBuilder`] or
//! deserialized by a collaborator from whatever file format it uses. Only the
//! base URL and credentials are required; every limit has a default.
//!
//! ```rust
//! use zentao::config::ClientConfig;
//!
//! let config = ClientConfig::builder()
//!     .base_url("https://pm.example.com/zentao")
//!     .account("alice")
//!     .password("secret")
//!     .page_size(50usize)
//!     .build()
//!     .unwrap();
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.page_size, 50);
//! assert_eq!(config.max_pages, 100);
//! ```

use derive_builder::Builder;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::error::{Error, Result};

fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_max_transport_retries() -> u32 {
    2
}
fn default_page_size() -> usize {
    100
}
fn default_max_pages() -> usize {
    100
}
fn default_deep_search_candidates() -> usize {
    10
}
fn default_deep_search_threshold() -> f64 {
    50.0
}
fn default_image_timeout_ms() -> u64 {
    15_000
}
fn default_image_concurrency() -> usize {
    8
}

/// Connection settings, credentials and guard limits.
#[derive(Clone, Builder, Deserialize)]
#[builder(setter(into))]
pub struct ClientConfig {
    /// Backend root, e.g. `https://pm.example.com/zentao`.
    pub base_url: String,

    pub account: String,

    pub password: String,

    /// Per-request transport timeout.
    #[builder(default = "default_request_timeout_ms()")]
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Minimum spacing between requests; 0 disables pacing.
    #[builder(default)]
    #[serde(default)]
    pub min_request_interval_ms: u64,

    /// Retries for connection failures and HTTP 429. Session expiry is never
    /// retried at this level.
    #[builder(default = "default_max_transport_retries()")]
    #[serde(default = "default_max_transport_retries")]
    pub max_transport_retries: u32,

    #[builder(default = "default_page_size()")]
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Hard cap on pages requested per aggregation.
    #[builder(default = "default_max_pages()")]
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// How many weak matches a deep search may refine with detail fetches.
    #[builder(default = "default_deep_search_candidates()")]
    #[serde(default = "default_deep_search_candidates")]
    pub deep_search_candidates: usize,

    /// Only matches scoring below this are refined by a deep search.
    #[builder(default = "default_deep_search_threshold()")]
    #[serde(default = "default_deep_search_threshold")]
    pub deep_search_threshold: f64,

    #[builder(default = "default_image_timeout_ms()")]
    #[serde(default = "default_image_timeout_ms")]
    pub image_timeout_ms: u64,

    /// Concurrent downloads in parallel mode.
    #[builder(default = "default_image_concurrency()")]
    #[serde(default = "default_image_concurrency")]
    pub image_concurrency: usize,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Checks credentials, base URL and limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.account.trim().is_empty() {
            return Err(Error::config("account must not be empty"));
        }
        if self.password.is_empty() {
            return Err(Error::config("password must not be empty"));
        }
        let url = self.parsed_base_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "base_url must use http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.page_size == 0 {
            return Err(Error::config("page_size must be at least 1"));
        }
        if self.max_pages == 0 {
            return Err(Error::config("max_pages must be at least 1"));
        }
        if self.image_concurrency == 0 {
            return Err(Error::config("image_concurrency must be at least 1"));
        }
        if self.request_timeout_ms == 0 || self.image_timeout_ms == 0 {
            return Err(Error::config("timeouts must be greater than zero"));
        }
        Ok(())
    }

    /// The base URL with a trailing slash, so relative paths join beneath it.
    pub fn parsed_base_url(&self) -> Result<Url> {
        let trimmed = self.base_url.trim();
        if trimmed.is_empty() {
            return Err(Error::config("base_url must not be empty"));
        }
        let with_slash = if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{}/", trimmed)
        };
        Url::parse(&with_slash)
            .map_err(|e| Error::config(format!("invalid base_url '{}': {}", trimmed, e)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_millis(self.image_timeout_ms)
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("account", &self.account)
            .field("password", &"***")
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("min_request_interval_ms", &self.min_request_interval_ms)
            .field("max_transport_retries", &self.max_transport_retries)
            .field("page_size", &self.page_size)
            .field("max_pages", &self.max_pages)
            .field("deep_search_candidates", &self.deep_search_candidates)
            .field("deep_search_threshold", &self.deep_search_threshold)
            .field("image_timeout_ms", &self.image_timeout_ms)
            .field("image_concurrency", &self.image_concurrency)
            .finish()
    }
}

impl From<ClientConfigBuilderError> for Error {
    fn from(e: ClientConfigBuilderError) -> Self {
        Error::config(e.to_string())
    }
}
