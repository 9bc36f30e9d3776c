use thiserror::Error;

/// Errors raised while talking to the remote image board.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The response was not the JSON shape we expect.
    #[error("Malformed response from {url}: {message}")]
    Decode { url: String, message: String },

    /// HTTP 429.
    #[error("Rate limited by {url}")]
    RateLimited {
        url: String,
        /// `Retry-After` in seconds, when the server sent one.
        retry_after: Option<u64>,
    },

    /// Any other HTTP or network failure.
    #[error("Request to {url} failed: {message}")]
    Request {
        url: String,
        status: Option<u16>,
        message: String,
    },

    /// A URL could not be built or parsed.
    #[error("Invalid URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    /// A proxy list could not be loaded.
    #[error("Failed to load proxy list from {origin}: {message}")]
    ProxyList { origin: String, message: String },
}

impl RemoteError {
    #[inline]
    pub fn decode(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            url: url.into(),
            message: message.into(),
        }
    }

    #[inline]
    pub fn request(url: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Request {
            url: url.into(),
            status,
            message: message.into(),
        }
    }

    /// Check if this error is a rate limit error.
    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether another attempt might succeed.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. } | Self::RateLimited { .. } | Self::Request { .. }
        )
    }
}

/// Extract a short error message suitable for display.
///
/// Takes the first line of an error message, which is useful for errors
/// that carry multi-line response bodies.
#[inline]
pub fn short_error_message(e: &impl std::error::Error) -> String {
    let full = e.to_string();
    full.lines().next().unwrap_or(&full).to_string()
}

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, RemoteError>;
