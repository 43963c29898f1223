//! Error types and result handling for backend operations.
//!
//! All fallible operations return a [`Result<T>`], an alias for
//! `std::result::Result<T, Error>`.
//!
//! # Error Categories
//!
//! - **Configuration**: missing or invalid credentials, base URL or limits
//! - **Session**: login failures, or a session that is still expired after one renewal
//! - **Transport**: network failures and non-success HTTP statuses unrelated to the session
//! - **Upstream data**: envelopes or payloads that do not have the expected shape
//! - **Partial batch**: some items of a batch failed while the others succeeded
//!
//! Messages never contain the session token. Transport errors carry the HTTP
//! status and a short excerpt of the response body for diagnosis.
//!
//! # Examples
//!
//! ```rust
//! use zentao::{Error, Result};
//!
//! fn describe(result: Result<()>) -> &'static str {
//!     match result {
//!         Ok(()) => "ok",
//!         Err(Error::Session(_)) => "log in again",
//!         Err(Error::Transport { .. }) => "backend unreachable",
//!         Err(_) => "other failure",
//!     }
//! }
//!
//! assert_eq!(describe(Err(Error::session("expired"))), "log in again");
//! ```

use thiserror::Error;

/// Maximum number of characters of a response body kept in an error message.
const EXCERPT_CHARS: usize = 200;

/// Type alias for Results with this crate's [`enum@Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for every backend operation.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration (credentials, base URL, limits).
    ///
    /// ```rust
    /// use zentao::Error;
    ///
    /// let error = Error::config("account must not be empty");
    /// assert!(error.to_string().contains("account"));
    /// ```
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Login failed, or the backend still reported an expired session after
    /// one forced renewal. Fatal to the in-flight call.
    #[error("Session error: {0}")]
    Session(String),

    /// Network or HTTP failure not related to session state.
    ///
    /// `status` is `None` when no response was received at all.
    #[error("Transport error: {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// The backend answered, but the envelope or payload was malformed.
    #[error("Upstream data error: {0}")]
    UpstreamData(String),

    /// Some items of a batch failed. Produced only when a caller asks for
    /// all-or-nothing semantics on a per-item report.
    #[error("Partial batch failure: {failed} of {total} items failed")]
    PartialBatch { failed: usize, total: usize },
}

impl Error {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Creates a session error.
    ///
    /// ```rust
    /// use zentao::Error;
    ///
    /// let error = Error::session("login rejected: wrong password");
    /// assert_eq!(error.to_string(), "Session error: login rejected: wrong password");
    /// ```
    pub fn session(msg: impl Into<String>) -> Self {
        Error::Session(msg.into())
    }

    /// Creates a transport error without an HTTP status.
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport {
            status: None,
            message: msg.into(),
        }
    }

    /// Creates a transport error for a non-success HTTP response, keeping a
    /// bounded excerpt of the body.
    ///
    /// ```rust
    /// use zentao::Error;
    ///
    /// let error = Error::http_status(502, b"Bad Gateway");
    /// match error {
    ///     Error::Transport { status, message } => {
    ///         assert_eq!(status, Some(502));
    ///         assert!(message.contains("Bad Gateway"));
    ///     }
    ///     _ => unreachable!(),
    /// }
    /// ```
    pub fn http_status(status: u16, body: &[u8]) -> Self {
        Error::Transport {
            status: Some(status),
            message: format!("HTTP {}: {}", status, excerpt(body)),
        }
    }

    /// Creates an upstream data error.
    pub fn upstream(msg: impl Into<String>) -> Self {
        Error::UpstreamData(msg.into())
    }

    /// Creates a partial batch failure summary.
    pub fn partial_batch(failed: usize, total: usize) -> Self {
        Error::PartialBatch { failed, total }
    }

    /// Returns the HTTP status attached to a transport error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport { status, .. } => *status,
            _ => None,
        }
    }

    /// Replaces every occurrence of `secret` in the message with `***`.
    pub(crate) fn redact(self, secret: &str) -> Self {
        if secret.is_empty() {
            return self;
        }
        let scrub = |s: String| s.replace(secret, "***");
        match self {
            Error::Configuration(m) => Error::Configuration(scrub(m)),
            Error::Session(m) => Error::Session(scrub(m)),
            Error::Transport { status, message } => Error::Transport {
                status,
                message: scrub(message),
            },
            Error::UpstreamData(m) => Error::UpstreamData(scrub(m)),
            other @ Error::PartialBatch { .. } => other,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        // The request URL carries the session token as a query parameter.
        let status = e.status().map(|s| s.as_u16());
        let kind = if e.is_timeout() {
            "timed out"
        } else if e.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        Error::Transport {
            status,
            message: format!("{}: {}", kind, e.without_url()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::UpstreamData(format!("invalid JSON: {}", e))
    }
}

/// Returns at most [`EXCERPT_CHARS`] characters of a (possibly binary) body.
pub(crate) fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    let mut out: String = trimmed.chars().take(EXCERPT_CHARS).collect();
    if trimmed.chars().count() > EXCERPT_CHARS {
        out.push('…');
    }
    out
}
