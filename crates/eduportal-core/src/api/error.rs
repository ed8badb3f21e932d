use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// The session is gone: refresh failed or the refreshed token was rejected.
    #[error("Authentication failed - please log in again")]
    AuthenticationFailed,

    /// 401 from the backend before any recovery was attempted.
    #[error("{0}")]
    Unauthorized(String),

    /// 429, carrying the backend's throttling message.
    #[error("{0}")]
    RateLimited(String),

    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("{message}")]
    ServerError { status: u16, message: String },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Why a token refresh did not produce a credential. Cloneable so every
/// waiter on a shared refresh receives the same outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("refresh rejected with status {0}")]
    Rejected(u16),

    #[error("refresh request failed: {0}")]
    Transport(String),

    #[error("refresh returned an unusable token: {0}")]
    InvalidToken(String),

    #[error("session ended while the refresh was in flight")]
    Superseded,
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Keys the backend uses for a single human-readable message
const MESSAGE_KEYS: [&str; 4] = ["detail", "message", "error", "non_field_errors"];

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Pull the backend's message out of an error payload. Falls back to the
    /// first field error (`{"email": ["already registered"]}`).
    pub fn extract_message(body: &str) -> Option<String> {
        let value: Value = serde_json::from_str(body).ok()?;
        let object = value.as_object()?;

        for key in MESSAGE_KEYS {
            if let Some(message) = object.get(key).and_then(first_text) {
                return Some(message);
            }
        }
        object.values().find_map(first_text)
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let message = Self::extract_message(body).unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("Request failed with status {}", status)
            } else {
                Self::truncate_body(body)
            }
        });
        match status {
            401 => ApiError::Unauthorized(message),
            429 => ApiError::RateLimited(message),
            500..=599 => ApiError::ServerError { status, message },
            _ => ApiError::Rejected { status, message },
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized(_) => Some(401),
            ApiError::RateLimited(_) => Some(429),
            ApiError::Rejected { status, .. } | ApiError::ServerError { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::AuthenticationFailed)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Transport(e.to_string())
    }
}

fn first_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(first_text),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_detail_verbatim() {
        let err = ApiError::from_status(400, r#"{"detail": "Plan name already taken."}"#);
        assert_eq!(err.to_string(), "Plan name already taken.");
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn test_extracts_first_field_error() {
        let body = r#"{"email": ["user with this email already exists."]}"#;
        assert_eq!(
            ApiError::extract_message(body).as_deref(),
            Some("user with this email already exists.")
        );
        let body = r#"{"non_field_errors": ["Passwords do not match."], "code": 3}"#;
        assert_eq!(
            ApiError::extract_message(body).as_deref(),
            Some("Passwords do not match.")
        );
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ApiError::from_status(401, r#"{"detail":"Token is invalid"}"#),
            ApiError::Unauthorized(m) if m == "Token is invalid"
        ));
        assert!(matches!(
            ApiError::from_status(429, ""),
            ApiError::RateLimited(m) if m == "Request failed with status 429"
        ));
        assert!(matches!(
            ApiError::from_status(502, ""),
            ApiError::ServerError { status: 502, message } if message == "Request failed with status 502"
        ));
    }

    #[test]
    fn test_throttle_message_is_kept() {
        let body = r#"{"detail":"Request was throttled. Expected available in 42 seconds."}"#;
        let err = ApiError::from_status(429, body);
        assert_eq!(
            err.to_string(),
            "Request was throttled. Expected available in 42 seconds."
        );
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn test_non_json_body_is_truncated() {
        let body = "x".repeat(800);
        let err = ApiError::from_status(500, &body);
        let message = err.to_string();
        assert!(message.starts_with(&"x".repeat(500)));
        assert!(message.ends_with("(truncated, 800 total bytes)"));
    }
}
