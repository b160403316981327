//! Unified error type for the qingyan workspace.

use thiserror::Error;

/// Enumerates all error kinds that can occur between the relay and upstream.
///
/// The type is `Clone` because a single failure is delivered twice: once to
/// the session's event sink and once through its handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Base URL or credentials are missing. Raised before any network call.
    #[error("configuration error: {0}")]
    Config(String),

    /// Upstream answered 2xx but the payload reports failure (non-zero
    /// `status`, missing token, malformed body).
    #[error("upstream protocol error: {message}")]
    Protocol { status: u16, message: String },

    /// The upstream returned a non-success HTTP status.
    #[error("upstream HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Connection, read or timeout failure on the transport.
    #[error("http error: {0}")]
    Http(String),

    /// A bounded wait elapsed without producing a value.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The caller aborted the session.
    #[error("relay session cancelled")]
    Cancelled,

    /// The worker pool no longer accepts sessions.
    #[error("relay pool is shut down")]
    Shutdown,
}

impl RelayError {
    /// Status code reported to the HTTP-layer caller for this failure.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Config(_) | Self::Http(_) => 500,
            Self::Protocol { status, .. } | Self::Upstream { status, .. } => *status,
            Self::Timeout(_) => 504,
            Self::Cancelled => 499,
            Self::Shutdown => 503,
        }
    }

    /// Client-safe description without the variant prefix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Config(m) | Self::Http(m) | Self::Timeout(m) => m.clone(),
            Self::Protocol { message, .. } => message.clone(),
            Self::Upstream { .. } | Self::Cancelled | Self::Shutdown => self.to_string(),
        }
    }

    /// Returns `true` if the error is likely transient and worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { status, .. } => matches!(status, 408 | 429 | 500 | 502 | 503 | 504),
            Self::Http(_) | Self::Timeout(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol {
            status: 502,
            message: format!("malformed upstream JSON: {e}"),
        }
    }
}

#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Truncate an upstream body to at most `max_chars` characters for logs and
/// error messages, marking the cut with `…`.
#[must_use]
pub fn body_preview(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}
