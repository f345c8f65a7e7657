use std::time::Duration;
use thiserror::Error;

/// Errors returned by the consumer-facing buffer API.
#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No tokio runtime available: {0}")]
    Runtime(String),

    #[error("Item index {index} is out of range (session has {len} items)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Item {index} cannot be retried while {state}")]
    NotRetryable { index: usize, state: String },

    #[error("Analysis buffer has been shut down")]
    ShutDown,

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for BufferError {
    fn from(err: anyhow::Error) -> Self {
        BufferError::Other(err.to_string())
    }
}

/// The raw failure a remote analysis call reports.
///
/// This is what the rate-limit classifier inspects. It carries no transport
/// details beyond an optional HTTP status, the body text, and an optional
/// `Retry-After` value in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSignal {
    pub status: Option<u16>,
    pub body: String,
    pub retry_after_secs: Option<u64>,
}

impl ErrorSignal {
    /// A non-success HTTP response.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            body: body.into(),
            retry_after_secs: None,
        }
    }

    /// A failure before any response arrived (connect error, I/O, bad payload).
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            body: message.into(),
            retry_after_secs: None,
        }
    }

    /// The call did not finish within `after`.
    pub fn timeout(after: Duration) -> Self {
        Self::transport(format!("Request timed out after {}s", after.as_secs()))
    }

    /// Attach a `Retry-After` header value.
    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }
}

impl std::fmt::Display for ErrorSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.body),
            None => write!(f, "{}", self.body),
        }
    }
}

impl std::error::Error for ErrorSignal {}

impl From<anyhow::Error> for ErrorSignal {
    fn from(err: anyhow::Error) -> Self {
        ErrorSignal::transport(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_status() {
        let signal = ErrorSignal::http(429, "Too many requests");
        assert_eq!(signal.to_string(), "HTTP 429: Too many requests");
    }

    #[test]
    fn display_transport_is_body_only() {
        let signal = ErrorSignal::transport("connection refused");
        assert_eq!(signal.to_string(), "connection refused");
    }

    #[test]
    fn from_anyhow_keeps_context_chain() {
        let err = anyhow::anyhow!("socket closed").context("reading response");
        let signal = ErrorSignal::from(err);
        assert_eq!(signal.status, None);
        assert_eq!(signal.body, "reading response: socket closed");
    }

    #[test]
    fn timeout_message_mentions_duration() {
        let signal = ErrorSignal::timeout(Duration::from_secs(60));
        assert!(signal.body.contains("60s"));
    }
}
