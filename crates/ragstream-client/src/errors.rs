/// Failures produced by a [`QueryTransport`](crate::transport::QueryTransport).
///
/// The variant is decided where the failure happens (connect, status check,
/// body read) so the client never has to guess retryability from message text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request or the first response byte did not arrive in time.
    #[error("request timed out")]
    Timeout,
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),
    /// The connection dropped while the body was being read.
    #[error("connection reset: {0}")]
    ConnectionReset(String),
    /// The server answered with a non-success status.
    #[error("server responded with status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    /// Anything else (request construction, invalid URL, decoding).
    #[error("transport failure: {0}")]
    Other(String),
}

impl TransportError {
    /// Creates an HTTP status error.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// Whether the failure is transient and the request may be re-sent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Connect(_) | Self::ConnectionReset(_) => true,
            Self::HttpStatus { status, .. } => matches!(status, 502 | 503),
            Self::Other(_) => false,
        }
    }

    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            Self::ConnectionReset(err.to_string())
        } else if err.is_request() {
            // reqwest reports mid-flight I/O errors (reset, broken pipe) as request errors.
            Self::ConnectionReset(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

/// Terminal failure of a query, already phrased for the person using the app.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum QueryFailure {
    /// HTTP 401.
    #[error("Invalid or expired API key. Check your API key in settings.")]
    InvalidCredential,
    /// HTTP 429.
    #[error("Rate limit exceeded. Please slow down and try again in a moment.")]
    RateLimited,
    /// Network-class failure that outlived every retry.
    #[error("Cannot reach the server after {attempts} attempt(s). Check your connection and try again.")]
    Unreachable { attempts: u32, detail: String },
    /// 502/503 that outlived every retry.
    #[error("The service is temporarily unavailable (status {status}) after {attempts} attempt(s).")]
    Unavailable { status: u16, attempts: u32 },
    /// Any other non-success status.
    #[error("Request failed with status {status}: {message}")]
    Http { status: u16, message: String },
    /// Error frame sent by the server; shown verbatim.
    #[error("{0}")]
    Server(String),
    /// Non-retryable transport failure.
    #[error("Request could not be sent: {0}")]
    Request(String),
}

impl QueryFailure {
    /// Classifies a transport error once retrying is no longer possible.
    ///
    /// `attempts` counts every network attempt made for the call, including the first.
    pub fn from_transport(err: &TransportError, attempts: u32) -> Self {
        match err {
            TransportError::HttpStatus { status: 401, .. } => Self::InvalidCredential,
            TransportError::HttpStatus { status: 429, .. } => Self::RateLimited,
            TransportError::HttpStatus {
                status: status @ (502 | 503),
                ..
            } => Self::Unavailable {
                status: *status,
                attempts,
            },
            TransportError::HttpStatus { status, body } => Self::Http {
                status: *status,
                message: server_message(body),
            },
            TransportError::Timeout
            | TransportError::Connect(_)
            | TransportError::ConnectionReset(_) => Self::Unreachable {
                attempts,
                detail: err.to_string(),
            },
            TransportError::Other(message) => Self::Request(message.clone()),
        }
    }
}

/// Pulls `detail`/`error`/`message` out of a JSON error body, else returns the body.
fn server_message(body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for key in ["detail", "error", "message"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    if trimmed.is_empty() {
        "<empty body>".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Error returned by [`StreamingQueryClient`](crate::StreamingQueryClient) operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The question was empty or whitespace only.
    #[error("question must not be empty")]
    EmptyQuestion,
    /// No API key could be resolved from the credential store.
    #[error("no API key configured")]
    MissingCredential,
    /// Another query is still in flight on this client.
    #[error("a query is already streaming on this client")]
    Busy,
    /// `retry()` was called before any query was sent.
    #[error("no previous query to retry")]
    NoPreviousRequest,
    /// The query ended with a terminal failure.
    #[error(transparent)]
    Failed(QueryFailure),
}

impl From<QueryFailure> for QueryError {
    fn from(value: QueryFailure) -> Self {
        QueryError::Failed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification_is_typed() {
        assert!(TransportError::Timeout.is_retryable());
        assert!(TransportError::Connect("refused".into()).is_retryable());
        assert!(TransportError::ConnectionReset("eof".into()).is_retryable());
        assert!(TransportError::status(502, "").is_retryable());
        assert!(TransportError::status(503, "").is_retryable());
        assert!(!TransportError::status(500, "").is_retryable());
        assert!(!TransportError::status(401, "").is_retryable());
        assert!(!TransportError::status(429, "").is_retryable());
        assert!(!TransportError::Other("bad url".into()).is_retryable());
    }

    #[test]
    fn auth_and_rate_limit_map_to_dedicated_failures() {
        assert_eq!(
            QueryFailure::from_transport(&TransportError::status(401, "nope"), 1),
            QueryFailure::InvalidCredential
        );
        assert_eq!(
            QueryFailure::from_transport(&TransportError::status(429, ""), 1),
            QueryFailure::RateLimited
        );
        assert!(
            QueryFailure::InvalidCredential
                .to_string()
                .contains("Invalid or expired API key")
        );
    }

    #[test]
    fn exhausted_network_failure_reports_attempts() {
        let failure = QueryFailure::from_transport(&TransportError::Connect("refused".into()), 3);
        assert!(matches!(failure, QueryFailure::Unreachable { attempts: 3, .. }));
        assert!(failure.to_string().starts_with("Cannot reach the server"));
    }

    #[test]
    fn http_failure_extracts_detail_from_json_body() {
        let failure = QueryFailure::from_transport(
            &TransportError::status(422, r#"{"detail":"question too long"}"#),
            1,
        );
        assert_eq!(
            failure,
            QueryFailure::Http {
                status: 422,
                message: "question too long".into()
            }
        );
    }
}
