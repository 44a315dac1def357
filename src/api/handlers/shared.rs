use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use std::sync::Arc;

use crate::api::response::ApiError;
use crate::object_store::content_disposition;
use crate::share::Delivery;
use crate::AppState;

/// Public download by share token.
/// Route: GET /api/files/shared/:token
pub async fn get_shared_file(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    let shared = state.shares.resolve(&token).await?;

    let data = match shared.delivery {
        Delivery::Redirect(url) => return Ok(Redirect::temporary(&url).into_response()),
        Delivery::Bytes(data) => data,
    };

    let file = shared.record;
    let mut response = (StatusCode::OK, data).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        file.mime_type
            .parse()
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );

    if let Ok(value) = content_disposition(&file.original_name).parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    // Share links are bearer capabilities; keep them out of shared caches.
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("private, no-store"));

    Ok(response)
}
