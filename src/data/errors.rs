use thiserror::Error;

/// Error taxonomy for the data and provider layer.
///
/// The split matters for retry behavior: transient errors (network, timeout,
/// 5xx, 429) are retried with backoff, everything else is surfaced or skipped
/// depending on the caller.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("API error: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimit { retry_after: u64 },

    #[error("No data available for {symbol} between {start} and {end}")]
    NoData {
        symbol: String,
        start: String,
        end: String,
    },

    #[error("Timeout: operation took longer than {timeout_seconds}s")]
    Timeout { timeout_seconds: u64 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for data operations
pub type DataResult<T> = Result<T, DataError>;

impl DataError {
    /// Transient errors worth retrying: network failures, timeouts,
    /// server errors (5xx) and rate limiting (429).
    pub fn is_retryable(&self) -> bool {
        match self {
            DataError::Network(_) => true,
            DataError::RateLimit { .. } => true,
            DataError::Timeout { .. } => true,
            DataError::Api { status_code, .. } => *status_code >= 500 || *status_code == 429,
            _ => false,
        }
    }

    pub fn parse_error<S: Into<String>>(message: S) -> Self {
        DataError::Parse {
            message: message.into(),
        }
    }

    pub fn api_error<S: Into<String>>(status_code: u16, message: S) -> Self {
        DataError::Api {
            status_code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DataError::api_error(503, "upstream down").is_retryable());
        assert!(DataError::api_error(429, "slow down").is_retryable());
        assert!(DataError::RateLimit { retry_after: 5 }.is_retryable());
        assert!(DataError::Timeout { timeout_seconds: 30 }.is_retryable());

        assert!(!DataError::api_error(404, "not found").is_retryable());
        assert!(!DataError::Config("missing key".into()).is_retryable());
        assert!(!DataError::parse_error("bad payload").is_retryable());
    }
}
