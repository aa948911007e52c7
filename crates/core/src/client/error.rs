//! Normalized service errors.
//!
//! Transport and HTTP failures are folded into one small enum with a
//! human-readable message so raw `reqwest` errors never leave the client.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The service could not be reached at all.
    #[error("agent service unreachable: {0}")]
    Unreachable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// The service answered with a non-success status.
    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },

    /// The service answered with a body we could not decode.
    #[error("unexpected response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

impl ServiceError {
    /// Whether this error means the service is down rather than that it
    /// rejected the request.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ServiceError::Unreachable(_) | ServiceError::Timeout(_))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Convert a `reqwest::Error` into a [`ServiceError`].
pub fn from_reqwest(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout(e.to_string())
    } else if e.is_decode() {
        ServiceError::Decode {
            endpoint: e.url().map(|u| u.path().to_string()).unwrap_or_default(),
            message: e.to_string(),
        }
    } else {
        ServiceError::Unreachable(e.to_string())
    }
}

/// Pull the most useful message out of an error response body.
///
/// The service reports failures as `{"detail": ...}`, `{"error": ...}` or
/// `{"message": ...}`; anything else is returned as trimmed text.
pub fn error_message_from_body(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["detail", "error", "message"] {
            match value.get(field) {
                Some(serde_json::Value::String(s)) => return s.clone(),
                Some(other) if !other.is_null() => return other.to_string(),
                _ => {}
            }
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty error response".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_detail_field() {
        assert_eq!(
            error_message_from_body(r#"{"detail": "model not found"}"#),
            "model not found"
        );
        assert_eq!(error_message_from_body(r#"{"error": "bad input"}"#), "bad input");
    }

    #[test]
    fn test_error_message_structured_detail() {
        let msg = error_message_from_body(r#"{"detail": [{"loc": ["text"]}]}"#);
        assert!(msg.contains("loc"));
    }

    #[test]
    fn test_error_message_plain_text() {
        assert_eq!(error_message_from_body("  Bad Gateway \n"), "Bad Gateway");
        assert_eq!(error_message_from_body(""), "empty error response");
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(ServiceError::Unreachable("refused".into()).is_connectivity());
        assert!(ServiceError::Timeout("5s".into()).is_connectivity());
        assert!(!ServiceError::Status {
            status: 500,
            message: "boom".into()
        }
        .is_connectivity());
    }
}
