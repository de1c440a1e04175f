use thiserror::Error;

/// Failure taxonomy for upstream market-data calls.
///
/// Absence of data is not an error: capability methods return `Ok(None)`
/// for missing symbols. Everything here is a genuine failure.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("[{source_key}] network failure: {message}")]
    Network { source_key: String, message: String },

    #[error("[{source_key}] rate limited: {message}")]
    RateLimited { source_key: String, message: String },

    #[error("[{source_key}] unexpected payload shape: {message}")]
    Normalization { source_key: String, message: String },

    #[error("[{source_key}] not configured: {message}")]
    Configuration { source_key: String, message: String },

    #[error("[{source_key}] unsupported: {message}")]
    Unsupported { source_key: String, message: String },

    /// Every source was tried and failed; carries one line per source.
    #[error("all sources failed: {}", messages.join("; "))]
    Aggregate { messages: Vec<String> },
}

const BAN_MARKERS: [&str; 7] = [
    "banned",
    "blocked",
    "forbidden",
    "rate limit",
    "too many requests",
    "429",
    "封禁",
];

impl FetchError {
    pub fn network(source_key: &str, message: impl ToString) -> Self {
        let message = message.to_string();
        // Upstreams report bans through transport-level errors often
        // enough that the message text decides the category.
        if Self::looks_like_ban(&message) {
            FetchError::RateLimited {
                source_key: source_key.to_string(),
                message,
            }
        } else {
            FetchError::Network {
                source_key: source_key.to_string(),
                message,
            }
        }
    }

    pub fn rate_limited(source_key: &str, message: impl ToString) -> Self {
        FetchError::RateLimited {
            source_key: source_key.to_string(),
            message: message.to_string(),
        }
    }

    pub fn normalization(source_key: &str, message: impl ToString) -> Self {
        FetchError::Normalization {
            source_key: source_key.to_string(),
            message: message.to_string(),
        }
    }

    pub fn configuration(source_key: &str, message: impl ToString) -> Self {
        FetchError::Configuration {
            source_key: source_key.to_string(),
            message: message.to_string(),
        }
    }

    pub fn unsupported(source_key: &str, message: impl ToString) -> Self {
        FetchError::Unsupported {
            source_key: source_key.to_string(),
            message: message.to_string(),
        }
    }

    pub fn looks_like_ban(message: &str) -> bool {
        let lower = message.to_lowercase();
        BAN_MARKERS.iter().any(|m| lower.contains(m))
    }

    /// Transport-level failures are worth retrying; semantic failures are
    /// not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network { .. })
    }

    /// How hard this failure counts against the source's circuit breaker.
    /// Ban-like signals burn the budget twice as fast.
    pub fn breaker_weight(&self) -> u32 {
        match self {
            FetchError::RateLimited { .. } => 2,
            FetchError::Network { .. } | FetchError::Normalization { .. } => 1,
            // Config problems mark the source unavailable elsewhere;
            // they should not flap the breaker.
            FetchError::Configuration { .. } | FetchError::Unsupported { .. } => 0,
            FetchError::Aggregate { .. } => 0,
        }
    }

    pub fn source_key(&self) -> Option<&str> {
        match self {
            FetchError::Network { source_key, .. }
            | FetchError::RateLimited { source_key, .. }
            | FetchError::Normalization { source_key, .. }
            | FetchError::Configuration { source_key, .. }
            | FetchError::Unsupported { source_key, .. } => Some(source_key),
            FetchError::Aggregate { .. } => None,
        }
    }
}

pub type FetchResult<T> = Result<T, FetchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ban_phrases_reclassify_network_errors() {
        let err = FetchError::network("eastmoney", "HTTP 429 Too Many Requests");
        assert!(matches!(err, FetchError::RateLimited { .. }));
        assert_eq!(err.breaker_weight(), 2);

        let err = FetchError::network("eastmoney", "connection reset by peer");
        assert!(matches!(err, FetchError::Network { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn unsupported_does_not_count_against_breaker() {
        let err = FetchError::unsupported("eastmoney", "不支持美股");
        assert_eq!(err.breaker_weight(), 0);
        assert!(!err.is_retryable());
    }

    #[test]
    fn aggregate_lists_every_source() {
        let err = FetchError::Aggregate {
            messages: vec!["eastmoney: boom".into(), "sina: bust".into()],
        };
        let text = err.to_string();
        assert!(text.contains("eastmoney: boom"));
        assert!(text.contains("sina: bust"));
    }
}
