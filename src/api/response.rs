use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogError;
use crate::share::ShareError;

// ============================================================================
// Error body
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

// ============================================================================
// Unified error type for handlers
// ============================================================================

/// A handler error: a client failure (4xx) or a server error (5xx).
/// Both render as `{"error": message}`.
#[derive(Debug)]
pub enum ApiError {
    Fail(StatusCode, String),
    Error(StatusCode, String),
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error) = match self {
            ApiError::Fail(code, msg) | ApiError::Error(code, msg) => (code, msg),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::BAD_REQUEST, message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::UNAUTHORIZED, message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::NOT_FOUND, message.into())
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::REQUEST_TIMEOUT, message.into())
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        ApiError::Fail(StatusCode::PAYLOAD_TOO_LARGE, message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Error(StatusCode::INTERNAL_SERVER_ERROR, message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Fail(code, _) | ApiError::Error(code, _) => *code,
        }
    }
}

// Upstream details are logged here and never sent to the client.

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound => ApiError::not_found("File not found"),
            CatalogError::InvalidInput(msg) => ApiError::bad_request(msg),
            e => {
                tracing::error!(error = %e, "File operation failed");
                ApiError::internal("Internal server error")
            }
        }
    }
}

impl From<ShareError> for ApiError {
    fn from(e: ShareError) -> Self {
        match e {
            ShareError::NotFound => ApiError::not_found("File not found or expired"),
            e => {
                tracing::error!(error = %e, "Share link resolution failed");
                ApiError::internal("Internal server error")
            }
        }
    }
}

// ============================================================================
// Custom extractors (reject with ApiError)
// ============================================================================

/// Drop-in replacement for `axum::extract::Query` that rejects with an `ApiError`.
pub struct AppQuery<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequestParts<S> for AppQuery<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, ApiError> {
        let query = parts.uri.query().unwrap_or_default();
        serde_qs::from_str(query)
            .map(AppQuery)
            .map_err(|e| ApiError::bad_request(friendly_query_error(&e.to_string())))
    }
}

/// Translate serde/serde_qs error messages into human-friendly descriptions.
fn friendly_query_error(raw: &str) -> String {
    let cleaned = raw
        .replace("u32", "non-negative integer")
        .replace("u64", "non-negative integer")
        .replace("i32", "integer")
        .replace("i64", "integer");

    format!("Invalid query parameter: {cleaned}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_friendly_query_error_names_types() {
        let msg = friendly_query_error("invalid type: string, expected u64");
        assert_eq!(
            msg,
            "Invalid query parameter: invalid type: string, expected non-negative integer"
        );
    }

    #[test]
    fn test_upstream_errors_are_generic() {
        let err: ApiError = CatalogError::Metadata(crate::storage::DatabaseError::Conflict(
            "secret detail".into(),
        ))
        .into();
        match err {
            ApiError::Error(code, msg) => {
                assert_eq!(code, StatusCode::INTERNAL_SERVER_ERROR);
                assert!(!msg.contains("secret"));
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }
}
