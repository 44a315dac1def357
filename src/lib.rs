//! file-share - Upload, share and expire files behind an HTTP API
//!
//! This crate provides per-user file storage with public share links:
//! - Uploads that write blob and metadata concurrently, compensating on failure
//! - Swappable object storage backends (local filesystem, GCS)
//! - redb embedded database for metadata (ACID, MVCC, crash-safe)
//! - Cached per-user listings, invalidated on every write
//! - A background sweeper that reclaims expired files
//! - REST API with multipart upload support

pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod object_store;
pub mod share;
pub mod storage;
pub mod sweeper;
pub mod token;
pub mod upload;
#[cfg(test)]
pub mod testutil;

use std::sync::Arc;

use catalog::Catalog;
use config::Config;
use object_store::{LinkSigner, ObjectStore};
use share::ShareResolver;
use upload::UploadCoordinator;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub uploads: UploadCoordinator,
    pub catalog: Catalog,
    pub shares: ShareResolver,
    pub object_store: Arc<dyn ObjectStore>,
    /// Verifier for `/blobs` links; set only for the local backend
    pub local_links: Option<LinkSigner>,
}
