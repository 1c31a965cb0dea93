//! Error types for the grievance service
//!
//! Every variant maps to an HTTP status and a stable machine-readable
//! reason string so clients can branch without parsing messages.

use hyper::StatusCode;

/// Main error type for complaint, audit and transport operations
#[derive(Debug, thiserror::Error)]
pub enum GrievanceError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GrievanceError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Duplicate(_) => StatusCode::CONFLICT,
            Self::InvalidTransition(_) => StatusCode::CONFLICT,
            Self::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-checkable reason included in every error body
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::Duplicate(_) => "duplicate",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::RateLimitExceeded(_) => "rate_limited",
            Self::NotFound(_) => "not_found",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::Persistence(_) => "persistence_error",
            Self::Config(_) => "config_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message safe to return to clients.
    ///
    /// Persistence and internal failures are not echoed verbatim since they
    /// may carry driver details.
    pub fn public_message(&self) -> String {
        match self {
            Self::Persistence(_) => "A storage error occurred".to_string(),
            Self::Internal(_) | Self::Config(_) => "Internal server error".to_string(),
            Self::Validation(m)
            | Self::Duplicate(m)
            | Self::InvalidTransition(m)
            | Self::NotFound(m)
            | Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::UpstreamUnavailable(m) => m.clone(),
            Self::RateLimitExceeded(_) => "Rate limit exceeded. Please try again later.".to_string(),
        }
    }

    /// Convert to status code and JSON body for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, serde_json::Value) {
        let status = self.status_code();
        let body = serde_json::json!({
            "success": false,
            "error": self.public_message(),
            "reason": self.reason(),
        });
        (status, body)
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for GrievanceError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GrievanceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for GrievanceError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for GrievanceError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<bson::ser::Error> for GrievanceError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Persistence(format!("BSON encode: {}", err))
    }
}

impl From<bson::de::Error> for GrievanceError {
    fn from(err: bson::de::Error) -> Self {
        Self::Persistence(format!("BSON decode: {}", err))
    }
}

impl From<redis::RedisError> for GrievanceError {
    fn from(err: redis::RedisError) -> Self {
        Self::UpstreamUnavailable(format!("Redis: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for GrievanceError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {}", err))
    }
}

/// Result type alias for grievance operations
pub type Result<T> = std::result::Result<T, GrievanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            GrievanceError::Validation("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GrievanceError::Duplicate("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            GrievanceError::RateLimitExceeded("x".into()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            GrievanceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            GrievanceError::Persistence("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_body_hides_driver_details() {
        let (status, body) =
            GrievanceError::Persistence("connection refused at 10.0.0.4".into())
                .into_status_code_and_body();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["reason"], "persistence_error");
        assert!(!body["error"].as_str().unwrap().contains("10.0.0.4"));
    }

    #[test]
    fn test_rate_limit_body_message() {
        let (_, body) = GrievanceError::RateLimitExceeded("general".into())
            .into_status_code_and_body();
        let msg = body["error"].as_str().unwrap().to_lowercase();
        assert!(msg.contains("rate limit exceeded"));
        assert_eq!(body["success"], false);
    }
}
