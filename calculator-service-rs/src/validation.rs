//! Calculate request validation
//!
//! Content-type and JSON-schema checks for `POST /calculate`, applied as
//! middleware before the handler's JSON extractor sees the body.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::error::ErrorResponse;
use crate::{AppState, CALCULATE_PATH};

/// Default maximum request payload size (10MB)
pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Schema for the calculate request body
pub static CALCULATE_REQUEST_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    let schema = json!({
        "type": "object",
        "required": ["image", "dict_of_vars"],
        "properties": {
            "image": {
                "type": "string",
                "minLength": 1
            },
            "dict_of_vars": {
                "type": "object",
                "additionalProperties": {
                    "type": ["string", "number"]
                }
            }
        }
    });

    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .expect("Invalid calculate request schema")
});

/// Validation error for API requests
#[derive(Debug, thiserror::Error)]
pub enum ApiValidationError {
    #[error("Invalid request format: {0}")]
    InvalidFormat(String),

    #[error("Content type must be {0}")]
    ContentType(String),

    #[error("Request payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Schema validation error: {0}")]
    Schema(String),
}

impl ApiValidationError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidFormat(_) | Self::Schema(_) => StatusCode::BAD_REQUEST,
            Self::ContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl IntoResponse for ApiValidationError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::warn!(error = %self, "Request failed validation");
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

/// Validate the Content-Type header
pub fn validate_content_type(headers: &HeaderMap, expected: &str) -> Result<(), ApiValidationError> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !content_type.starts_with(expected) {
        return Err(ApiValidationError::ContentType(format!(
            "'{}', got '{}'",
            expected, content_type
        )));
    }

    Ok(())
}

/// Validate a calculate request body against [`CALCULATE_REQUEST_SCHEMA`]
pub fn validate_calculate_request(payload: &Value) -> Result<(), ApiValidationError> {
    if let Err(errors) = CALCULATE_REQUEST_SCHEMA.validate(payload) {
        let details: Vec<String> = errors
            .map(|err| {
                let path = err.instance_path.to_string();
                if path.is_empty() {
                    err.to_string()
                } else {
                    format!("{} at {}", err, path)
                }
            })
            .collect();

        return Err(ApiValidationError::Schema(if details.is_empty() {
            "Schema validation failed".to_string()
        } else {
            details.join("; ")
        }));
    }

    Ok(())
}

/// Parse a raw body as JSON
pub fn parse_json_body(bytes: &[u8], limit: usize) -> Result<Value, ApiValidationError> {
    if bytes.len() > limit {
        return Err(ApiValidationError::PayloadTooLarge(format!(
            "Payload size ({} bytes) exceeds maximum allowed size ({} bytes)",
            bytes.len(),
            limit
        )));
    }

    serde_json::from_slice::<Value>(bytes)
        .map_err(|e| ApiValidationError::InvalidFormat(format!("Invalid JSON: {}", e)))
}

/// Middleware layer config for payload limits
pub fn payload_limit_config(limit: usize) -> tower_http::limit::RequestBodyLimitLayer {
    tower_http::limit::RequestBodyLimitLayer::new(limit)
}

/// Middleware validating `POST /calculate` bodies; other requests pass through
pub async fn validate_request_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiValidationError> {
    if req.method() != Method::POST || req.uri().path() != CALCULATE_PATH {
        return Ok(next.run(req).await);
    }

    validate_content_type(req.headers(), "application/json")?;

    let limit = state.max_payload_size();
    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, limit).await.map_err(|e| {
        ApiValidationError::PayloadTooLarge(format!("Failed to read request body: {}", e))
    })?;

    let value = parse_json_body(&bytes, limit)?;
    validate_calculate_request(&value)?;

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}
