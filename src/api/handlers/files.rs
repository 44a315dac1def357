use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::response::{ApiError, AppQuery};
use crate::api::AuthUser;
use crate::catalog::ListedFile;
use crate::storage::models::FileRecord;
use crate::upload::{UploadOutcome, UploadRequest};
use crate::AppState;

/// Longest lifetime an upload may request (ten years).
const MAX_EXPIRES_IN_SECS: u64 = 10 * 365 * 24 * 60 * 60;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FileView {
    pub id: u64,
    pub created_at: String,
    pub updated_at: String,
    pub owner_id: String,
    /// Object store key
    pub filename: String,
    pub original_name: String,
    pub size: u64,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub file: FileView,
}

#[derive(Debug, Serialize)]
pub struct FilesResponse {
    pub files: Vec<FileView>,
}

#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub share_url: String,
    pub file: FileView,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    AuthUser(owner_id): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let max_size = state.config.max_upload_size;
    let too_large = || {
        ApiError::payload_too_large(format!(
            "File exceeds maximum upload size of {max_size} bytes"
        ))
    };

    let mut file_data = None;
    let mut file_name: Option<String> = None;
    let mut file_content_type: Option<String> = None;
    let mut expires_in: Option<Duration> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            too_large()
        } else {
            ApiError::bad_request(format!("Invalid multipart data: {}", e.body_text()))
        }
    })? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                file_content_type = field.content_type().map(|s| s.to_string());

                let data = field.bytes().await.map_err(|e| {
                    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
                        too_large()
                    } else {
                        ApiError::bad_request(format!("Failed to read file: {}", e.body_text()))
                    }
                })?;

                if data.len() as u64 > max_size {
                    return Err(too_large());
                }
                file_data = Some(data);
            }
            "expires_in" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid expires_in: {e}")))?;
                expires_in = Some(parse_expires_in(&text)?);
            }
            _ => {
                // Ignore unknown fields
            }
        }
    }

    let data = file_data.ok_or_else(|| ApiError::bad_request("No file uploaded"))?;
    let original_name = file_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "upload".to_string());

    // Determine MIME type: from multipart Content-Type, or guess from filename, or fallback
    let content_type = file_content_type
        .filter(|ct| ct != "application/octet-stream")
        .or_else(|| mime_guess::from_path(&original_name).first().map(|m| m.to_string()))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let outcome = state
        .uploads
        .upload(UploadRequest {
            owner_id,
            original_name,
            content_type,
            data,
            expires_in,
        })
        .await;

    match outcome {
        UploadOutcome::Committed(uploaded) => Ok(Json(UploadResponse {
            message: "File uploaded successfully".to_string(),
            file: file_view(&uploaded.record, Some(uploaded.url)),
        })),
        UploadOutcome::Compensated(e) => {
            tracing::error!(error = %e, "Upload failed");
            Err(ApiError::internal("Failed to upload file"))
        }
        UploadOutcome::TimedOut => Err(ApiError::timeout(
            "Upload timed out; the file may or may not have been stored",
        )),
    }
}

pub async fn list_files(
    State(state): State<Arc<AppState>>,
    AuthUser(owner_id): AuthUser,
) -> Result<Json<FilesResponse>, ApiError> {
    let files = state.catalog.list(&owner_id).await?;
    Ok(Json(FilesResponse {
        files: files.iter().map(listed_view).collect(),
    }))
}

pub async fn search_files(
    State(state): State<Arc<AppState>>,
    AuthUser(owner_id): AuthUser,
    AppQuery(params): AppQuery<SearchParams>,
) -> Result<Json<FilesResponse>, ApiError> {
    let files = state.catalog.search(&owner_id, &params.query).await?;
    Ok(Json(FilesResponse {
        files: files.iter().map(|f| file_view(f, None)).collect(),
    }))
}

pub async fn share_file(
    State(state): State<Arc<AppState>>,
    AuthUser(owner_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ShareResponse>, ApiError> {
    let id = parse_file_id(&id)?;
    let link = state.catalog.share(&owner_id, id).await?;
    Ok(Json(ShareResponse {
        file: file_view(&link.record, Some(link.download_url)),
        share_url: link.share_url,
    }))
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    AuthUser(owner_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_file_id(&id)?;
    state.catalog.delete(&owner_id, id).await?;
    Ok(Json(MessageResponse {
        message: "File deleted successfully".to_string(),
    }))
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_file_id(raw: &str) -> Result<u64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("Invalid file ID format"))
}

fn parse_expires_in(raw: &str) -> Result<Duration, ApiError> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 && secs <= MAX_EXPIRES_IN_SECS => Ok(Duration::from_secs(secs)),
        _ => Err(ApiError::bad_request(format!(
            "expires_in must be a number of seconds between 1 and {MAX_EXPIRES_IN_SECS}"
        ))),
    }
}

fn listed_view(listed: &ListedFile) -> FileView {
    file_view(&listed.record, listed.url.clone())
}

fn file_view(file: &FileRecord, url: Option<String>) -> FileView {
    FileView {
        id: file.id,
        created_at: file.created_at.to_rfc3339(),
        updated_at: file.updated_at.to_rfc3339(),
        owner_id: file.owner_id.clone(),
        filename: file.storage_key.clone(),
        original_name: file.original_name.clone(),
        size: file.byte_size,
        mime_type: file.mime_type.clone(),
        share_token: file.share_token.clone(),
        expires_at: file.expires_at.map(|t| t.to_rfc3339()),
        url,
    }
}
