//! Error types for the calculator service and their HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Body returned for every failed request
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

/// Failures raised by an [`crate::analyzer::ImageAnalyzer`]
///
/// Retryable variants are `RateLimited`, `Server` and `Network`; see
/// [`AnalyzerError::is_retryable`].
#[derive(Debug, thiserror::Error)]
pub enum AnalyzerError {
    #[error("Analyzer is not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl AnalyzerError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_) | Self::Server(_) | Self::Network(_)
        )
    }
}

/// Errors surfaced by the calculate endpoint
#[derive(Debug, thiserror::Error)]
pub enum CalculatorError {
    #[error("Malformed image input: {0}")]
    MalformedInput(String),

    #[error("Unsupported image: {0}")]
    UnsupportedImage(String),

    #[error("Analysis failed: {0}")]
    Analyzer(AnalyzerError),
}

// An analyzer that cannot decode the bitmap is reporting bad input, not its own failure
impl From<AnalyzerError> for CalculatorError {
    fn from(err: AnalyzerError) -> Self {
        match err {
            AnalyzerError::Image(detail) => Self::UnsupportedImage(detail),
            other => Self::Analyzer(other),
        }
    }
}

impl CalculatorError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedInput(_) | Self::UnsupportedImage(_) => StatusCode::BAD_REQUEST,
            Self::Analyzer(AnalyzerError::NotConfigured(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Analyzer(AnalyzerError::RateLimited(_)) => StatusCode::TOO_MANY_REQUESTS,
            Self::Analyzer(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CalculatorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Calculation failed");
        } else {
            tracing::warn!(error = %self, "Rejected calculation request");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
                code: status.as_u16(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            CalculatorError::MalformedInput("no comma".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CalculatorError::UnsupportedImage("unknown".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CalculatorError::from(AnalyzerError::NotConfigured("no key".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            CalculatorError::from(AnalyzerError::Server("boom".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_analyzer_image_error_is_unsupported_image() {
        let err = CalculatorError::from(AnalyzerError::Image("truncated PNG body".into()));
        assert!(matches!(err, CalculatorError::UnsupportedImage(_)));
        assert_eq!(err.to_string(), "Unsupported image: truncated PNG body");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AnalyzerError::Server("502".into()).is_retryable());
        assert!(AnalyzerError::Network("reset".into()).is_retryable());
        assert!(AnalyzerError::RateLimited("429".into()).is_retryable());
        assert!(!AnalyzerError::InvalidRequest("400".into()).is_retryable());
        assert!(!AnalyzerError::Parse("bad json".into()).is_retryable());
    }
}
