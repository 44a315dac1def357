use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::response::ApiError;
use crate::object_store::{ObjectStoreError, ResponseOverrides};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedLinkParams {
    pub expires: i64,
    pub signature: String,
    #[serde(rename = "response-content-type")]
    pub content_type: Option<String>,
    #[serde(rename = "response-content-disposition")]
    pub content_disposition: Option<String>,
}

impl SignedLinkParams {
    /// Both headers or neither; a link carrying one of them was not issued here.
    fn overrides(&self) -> Result<Option<ResponseOverrides>, ()> {
        match (&self.content_type, &self.content_disposition) {
            (Some(content_type), Some(content_disposition)) => Ok(Some(ResponseOverrides {
                content_type: content_type.clone(),
                content_disposition: content_disposition.clone(),
            })),
            (None, None) => Ok(None),
            _ => Err(()),
        }
    }
}

/// Serve a blob through a signed link issued by the local backend.
/// Route: GET /blobs/:key
pub async fn serve_blob(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    params: Option<Query<SignedLinkParams>>,
) -> Result<Response, ApiError> {
    let signer = state
        .local_links
        .as_ref()
        .ok_or_else(|| ApiError::not_found("Not found"))?;

    // Every rejection looks the same to the caller.
    let Some(Query(params)) = params else {
        return Err(ApiError::not_found("Link is invalid or expired"));
    };
    let Ok(overrides) = params.overrides() else {
        return Err(ApiError::not_found("Link is invalid or expired"));
    };
    if let Err(e) = signer.verify(&key, params.expires, overrides.as_ref(), &params.signature) {
        tracing::debug!(storage_key = %key, error = %e, "Rejected blob link");
        return Err(ApiError::not_found("Link is invalid or expired"));
    }

    let data = state.object_store.get(&key).await.map_err(|e| match e {
        ObjectStoreError::NotFound(_) | ObjectStoreError::InvalidKey(_) => {
            ApiError::not_found("Link is invalid or expired")
        }
        e => {
            tracing::error!(storage_key = %key, error = %e, "Failed to read blob");
            ApiError::internal("Failed to retrieve file")
        }
    })?;

    let mut response = (StatusCode::OK, data).into_response();
    let headers = response.headers_mut();

    let content_type = match &overrides {
        Some(o) => o.content_type.clone(),
        None => mime_guess::from_path(&key)
            .first_or_octet_stream()
            .to_string(),
    };
    headers.insert(
        header::CONTENT_TYPE,
        content_type
            .parse()
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    if let Some(value) = overrides.and_then(|o| o.content_disposition.parse().ok()) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    // Blobs never change under a key; cache until the link itself expires.
    let max_age = (params.expires - chrono::Utc::now().timestamp()).max(0);
    if let Ok(value) = format!("private, max-age={max_age}").parse() {
        headers.insert(header::CACHE_CONTROL, value);
    }

    Ok(response)
}
