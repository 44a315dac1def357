use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::response::ApiError;
use crate::AppState;

/// The caller's user id, as asserted by the gateway in front of this service
/// through the configured identity header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, ApiError> {
        parts
            .headers
            .get(state.config.user_id_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| AuthUser(id.to_string()))
            .ok_or_else(|| ApiError::unauthorized("Unauthorized"))
    }
}
