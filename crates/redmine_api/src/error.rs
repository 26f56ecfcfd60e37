//! Error model used by Redmine API client operations.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RedmineError>;

/// Represents the failure modes of a Redmine API call: HTTP errors carrying the validation messages Redmine returns, rejected API keys, timeouts, network issues, serialization problems and anything else.
#[derive(Debug, Error)]
pub enum RedmineError {
    #[error("http {status}: {}", describe_messages(.messages, .body))]
    Http {
        status: StatusCode,
        messages: Vec<String>,
        body: String,
    },
    #[error("authentication error: {0}")]
    Authentication(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unexpected error: {0}")]
    Other(String),
}

impl RedmineError {
    /// Builds an HTTP error from a response body, extracting the `errors` array Redmine sends on 422.
    pub fn http(status: StatusCode, body: impl Into<String>) -> Self {
        let body = body.into();
        let messages = extract_error_messages(&body);
        RedmineError::Http {
            status,
            messages,
            body,
        }
    }

    /// Returns the HTTP status when the error came from a non-success response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            RedmineError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for RedmineError {
    /// Converts reqwest errors into semantic RedmineError variants.
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RedmineError::Timeout(err.to_string())
        } else if err.is_status() {
            let status = err.status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            RedmineError::Http {
                status,
                messages: Vec::new(),
                body: err.to_string(),
            }
        } else if err.is_connect() {
            RedmineError::Network(err.to_string())
        } else if err.is_decode() {
            RedmineError::Serialization(err.to_string())
        } else {
            RedmineError::Other(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RedmineError {
    /// Converts serde_json decode/encode failures into serialization errors.
    fn from(err: serde_json::Error) -> Self {
        RedmineError::Serialization(err.to_string())
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<String>,
}

fn extract_error_messages(body: &str) -> Vec<String> {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.errors)
        .unwrap_or_default()
}

fn describe_messages(messages: &[String], body: &str) -> String {
    if messages.is_empty() {
        body.trim().to_string()
    } else {
        messages.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_collects_validation_messages() {
        let err = RedmineError::http(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"errors":["Hours cannot be blank","Activity cannot be blank"]}"#,
        );
        assert_eq!(err.status(), Some(StatusCode::UNPROCESSABLE_ENTITY));
        assert_eq!(
            err.to_string(),
            "http 422 Unprocessable Entity: Hours cannot be blank; Activity cannot be blank"
        );
    }

    #[test]
    fn http_error_falls_back_to_raw_body() {
        let err = RedmineError::http(StatusCode::BAD_GATEWAY, "upstream down\n");
        assert_eq!(err.to_string(), "http 502 Bad Gateway: upstream down");
    }

    #[test]
    fn non_http_errors_have_no_status() {
        assert!(RedmineError::Timeout("slow".into()).status().is_none());
    }
}
