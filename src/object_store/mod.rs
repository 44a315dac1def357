mod gcs;
mod local;
mod signing;

pub use gcs::GcsStore;
pub use local::LocalStore;
pub use signing::{LinkSigner, SignatureError};

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid object key: {0}")]
    InvalidKey(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

/// Abstraction over object storage backends.
/// Keys are opaque names generated at upload; the metadata store maps them to files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes, content_type: &str)
        -> Result<(), ObjectStoreError>;
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;
    /// Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError>;
    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError>;
    /// A URL granting read access to `key` for `ttl`. With `overrides`, the
    /// link is served with those response headers instead of the backend's.
    async fn presigned_get(
        &self,
        key: &str,
        ttl: Duration,
        overrides: Option<&ResponseOverrides>,
    ) -> Result<String, ObjectStoreError>;
}

/// Response headers baked into a presigned link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseOverrides {
    pub content_type: String,
    pub content_disposition: String,
}

impl ResponseOverrides {
    /// Download as `original_name` with its recorded content type.
    pub fn attachment(content_type: &str, original_name: &str) -> Self {
        Self {
            content_type: content_type.to_string(),
            content_disposition: content_disposition(original_name),
        }
    }
}

/// `attachment` with an ASCII fallback name and the exact name in RFC 5987 form.
pub fn content_disposition(original_name: &str) -> String {
    let fallback: String = original_name
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded = utf8_percent_encode(original_name, NON_ALPHANUMERIC);
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
