//! Owner-facing file management: listing, search, share-link issue and delete.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{self, Cache};
use crate::config::Config;
use crate::object_store::{ObjectStore, ObjectStoreError, ResponseOverrides};
use crate::storage::models::FileRecord;
use crate::storage::{self, DatabaseError, MetadataStore};
use crate::token::{self, RandomError};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("File not found")]
    NotFound,
    #[error("{0}")]
    InvalidInput(String),
    #[error("Object store error: {0}")]
    Store(#[from] ObjectStoreError),
    #[error("Metadata error: {0}")]
    Metadata(#[from] DatabaseError),
    #[error(transparent)]
    Random(#[from] RandomError),
}

/// A record as shown to its owner, with a download URL when one could be made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListedFile {
    pub record: FileRecord,
    pub url: Option<String>,
}

#[derive(Debug)]
pub struct SharedLink {
    pub record: FileRecord,
    pub share_url: String,
    pub download_url: String,
}

#[derive(Clone)]
pub struct Catalog {
    db: Arc<dyn MetadataStore>,
    store: Arc<dyn ObjectStore>,
    cache: Arc<dyn Cache>,
    config: Config,
}

impl Catalog {
    pub fn new(
        db: Arc<dyn MetadataStore>,
        store: Arc<dyn ObjectStore>,
        cache: Arc<dyn Cache>,
        config: &Config,
    ) -> Self {
        Self {
            db,
            store,
            cache,
            config: config.clone(),
        }
    }

    /// The owner's visible files, newest upload last.
    ///
    /// Served from cache when possible, minus entries that expired since. On a
    /// miss every record's blob is checked: records whose blob is confirmed
    /// gone are deleted and left out.
    pub async fn list(&self, owner_id: &str) -> Result<Vec<ListedFile>, CatalogError> {
        let cache_key = cache::user_files_key(owner_id);

        match self.cache.get(&cache_key).await {
            Ok(Some(cached)) => match serde_json::from_str::<Vec<ListedFile>>(&cached) {
                Ok(files) => {
                    // Entries may have expired since the listing was cached.
                    let now = Utc::now();
                    let files: Vec<_> = files
                        .into_iter()
                        .filter(|f| f.record.is_visible(now))
                        .collect();
                    debug!(owner_id = %owner_id, count = files.len(), "Listing served from cache");
                    return Ok(files);
                }
                Err(e) => warn!(owner_id = %owner_id, error = %e, "Discarding unreadable cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(owner_id = %owner_id, error = %e, "Cache read failed"),
        }

        let now = Utc::now();
        let owner = owner_id.to_string();
        let records = storage::blocking(&self.db, move |db| db.list_files_by_owner(&owner)).await?;

        let link_ttl = self.config.uploads.link_ttl;
        let mut listed = Vec::with_capacity(records.len());
        let mut complete = true;
        for record in records.into_iter().filter(|r| r.is_visible(now)) {
            match self.store.exists(&record.storage_key).await {
                Ok(true) => {
                    let headers = download_headers(&record);
                    let url = match self
                        .store
                        .presigned_get(&record.storage_key, link_ttl, Some(&headers))
                        .await
                    {
                        Ok(url) => Some(url),
                        Err(e) => {
                            warn!(file_id = record.id, error = %e, "Failed to presign download URL");
                            complete = false;
                            None
                        }
                    };
                    listed.push(ListedFile { record, url });
                }
                Ok(false) => {
                    warn!(
                        file_id = record.id,
                        storage_key = %record.storage_key,
                        "Listed file has no blob, removing record"
                    );
                    let id = record.id;
                    if let Err(e) = storage::blocking(&self.db, move |db| db.delete_file(id)).await {
                        warn!(file_id = id, error = %e, "Failed to remove dangling record");
                    }
                }
                Err(e) => {
                    warn!(file_id = record.id, error = %e, "Blob existence check failed, listing without URL");
                    complete = false;
                    listed.push(ListedFile { record, url: None });
                }
            }
        }

        if complete {
            match serde_json::to_string(&listed) {
                Ok(json) => {
                    if let Err(e) = self.cache.set(&cache_key, json, self.config.cache_ttl).await {
                        warn!(owner_id = %owner_id, error = %e, "Cache write failed");
                    }
                }
                Err(e) => warn!(owner_id = %owner_id, error = %e, "Failed to encode listing"),
            }
        }

        Ok(listed)
    }

    /// Visible records whose original name contains `query`, ignoring case.
    pub async fn search(&self, owner_id: &str, query: &str) -> Result<Vec<FileRecord>, CatalogError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CatalogError::InvalidInput("Search query is required".into()));
        }

        let (owner, query) = (owner_id.to_string(), query.to_string());
        let found = storage::blocking(&self.db, move |db| db.search_files(&owner, &query)).await?;

        let now = Utc::now();
        Ok(found
            .into_iter()
            .filter(|r| r.is_visible(now))
            .collect())
    }

    /// The public share link of an owned file, issuing a token on first use.
    pub async fn share(&self, owner_id: &str, id: u64) -> Result<SharedLink, CatalogError> {
        let candidate = token::generate_share_token()?;
        let (owner, issued) = (owner_id.to_string(), candidate.clone());
        let record = storage::blocking(&self.db, move |db| {
            db.assign_share_token(id, &owner, &issued)
        })
        .await?
        .filter(|r| !r.is_expired(Utc::now()))
            .ok_or(CatalogError::NotFound)?;

        let share_token = match record.share_token.as_deref() {
            Some(t) => t.to_string(),
            None => return Err(CatalogError::NotFound),
        };
        if share_token == candidate {
            cache::invalidate_user(self.cache.as_ref(), owner_id).await;
            debug!(file_id = id, owner_id = %owner_id, "Issued share token");
        }

        let download_url = self
            .store
            .presigned_get(
                &record.storage_key,
                self.config.uploads.link_ttl,
                Some(&download_headers(&record)),
            )
            .await?;

        Ok(SharedLink {
            share_url: self.config.share_url(&share_token),
            download_url,
            record,
        })
    }

    /// Delete an owned file: blob first, then record, then cached listings.
    pub async fn delete(&self, owner_id: &str, id: u64) -> Result<(), CatalogError> {
        let owner = owner_id.to_string();
        let record = storage::blocking(&self.db, move |db| db.get_owned_file(id, &owner))
            .await?
            .ok_or(CatalogError::NotFound)?;

        self.store.delete(&record.storage_key).await?;
        storage::blocking(&self.db, move |db| db.delete_file(id)).await?;
        cache::invalidate_user(self.cache.as_ref(), owner_id).await;

        debug!(file_id = id, owner_id = %owner_id, "Deleted file");
        Ok(())
    }
}

fn download_headers(record: &FileRecord) -> ResponseOverrides {
    ResponseOverrides::attachment(&record.mime_type, &record.original_name)
}
