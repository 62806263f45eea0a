use thiserror::Error;

/// All errors generated in `signal-screener`.
///
/// None of these are fatal: every failure degrades to a stale but consistent
/// display rather than touching the signal store.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ScreenerError {
    #[error("network error: {0}")]
    Network(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("server rejected request ({status}): {reason}")]
    ServerRejection { status: u16, reason: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("settings persistence failed: {0}")]
    Persistence(String),
}

impl ScreenerError {
    /// Determine if an error is retried by the next snapshot poll or reconnect.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_transient(&self) -> bool {
        match self {
            ScreenerError::Network(_) => true,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ScreenerError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            Self::Protocol(value.to_string())
        } else {
            Self::Network(value.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ScreenerError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Network(value.to_string())
    }
}

impl From<serde_json::Error> for ScreenerError {
    fn from(value: serde_json::Error) -> Self {
        Self::Protocol(value.to_string())
    }
}

impl From<url::ParseError> for ScreenerError {
    fn from(value: url::ParseError) -> Self {
        Self::Validation(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screener_error_is_transient() {
        struct TestCase {
            input: ScreenerError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: network failures are retried by the poll/reconnect loops
                input: ScreenerError::Network("connection refused".to_string()),
                expected: true,
            },
            TestCase {
                // TC1: validation errors are surfaced inline, never retried
                input: ScreenerError::Validation("short >= long".to_string()),
                expected: false,
            },
            TestCase {
                // TC2: server rejections keep local state unchanged
                input: ScreenerError::ServerRejection {
                    status: 400,
                    reason: "Symbol already exists".to_string(),
                },
                expected: false,
            },
            TestCase {
                // TC3: malformed push messages are dropped
                input: ScreenerError::Protocol("missing field `symbol`".to_string()),
                expected: false,
            },
            TestCase {
                // TC4: persistence failures fall back to defaults
                input: ScreenerError::Persistence("read-only file system".to_string()),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_transient();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_json_errors_are_protocol_errors() {
        let error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(ScreenerError::from(error), ScreenerError::Protocol(_)));
    }
}
