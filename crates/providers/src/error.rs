//! Provider failure taxonomy.

/// Errors raised by provider adapters and the poller.
///
/// `Auth` and `Quota` are configuration problems: the job fails fast and an
/// operator has to act. `Request { retryable: true }` may be retried within
/// the same job's attempt budget, never across jobs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("provider rejected credentials: {0}")]
    Auth(String),

    #[error("provider quota exhausted: {0}")]
    Quota(String),

    #[error("provider request failed: {message}")]
    Request { message: String, retryable: bool },

    #[error("provider timed out after {attempts} poll attempts")]
    Timeout { attempts: u32 },

    #[error("provider reported generation failure: {0}")]
    Generation(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Request { retryable: true, .. })
    }

    /// Map a non-success HTTP status to the taxonomy.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("HTTP {status}: {}", truncate(body, 200));
        match status {
            401 | 403 => Self::Auth(detail),
            402 | 429 => Self::Quota(detail),
            400 | 404 | 405 | 413 | 422 => Self::rejected(detail),
            _ => Self::transient(detail),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::InvalidResponse(err.to_string());
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), &err.to_string());
        }
        // Connect failures, timeouts and dropped bodies.
        Self::transient(err.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
